//! Stored filter rule bodies.

use bastion_core::FilterId;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::models::{parse_datetime, FilterRules};

/// SHA-256 of a rule body, hex encoded.
pub fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Repository for rule bodies.
pub struct RulesRepo;

impl RulesRepo {
    /// Replace the stored rules of a filter.
    pub fn save(conn: &Connection, filter_id: FilterId, version: &str, rules: &[String]) -> Result<()> {
        let body = rules.join("\n");

        conn.execute(
            "INSERT INTO filter_rules (filter_id, version, rules, rules_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))
             ON CONFLICT(filter_id) DO UPDATE SET
                version = ?2, rules = ?3, rules_count = ?4, updated_at = datetime('now')",
            params![filter_id, version, body, rules.len() as i64],
        )?;

        Ok(())
    }

    /// Get the stored rules of a filter.
    pub fn get(conn: &Connection, filter_id: FilterId) -> Result<Option<FilterRules>> {
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT version, rules, updated_at FROM filter_rules WHERE filter_id = ?1",
                [filter_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        Ok(row.map(|(version, body, updated_at)| FilterRules {
            filter_id,
            version,
            rules: split_rules(&body),
            updated_at: parse_datetime(&updated_at),
        }))
    }

    /// Rule counts per filter, ordered by filter id.
    pub fn counts(conn: &Connection) -> Result<Vec<(FilterId, usize, DateTime<Utc>)>> {
        let mut stmt = conn.prepare(
            "SELECT filter_id, rules_count, updated_at FROM filter_rules ORDER BY filter_id",
        )?;

        let counts = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, FilterId>(0)?,
                    row.get::<_, i64>(1)?.max(0) as usize,
                    parse_datetime(&row.get::<_, String>(2)?),
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }

    /// Delete the stored rules of a filter.
    pub fn delete(conn: &Connection, filter_id: FilterId) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM filter_rules WHERE filter_id = ?1", [filter_id])?;
        Ok(deleted > 0)
    }
}

fn split_rules(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    body.lines().map(str::to_string).collect()
}
