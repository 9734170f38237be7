//! Custom filters repository.

use bastion_core::{Filter, FilterId, CUSTOM_FILTERS_START_ID};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{Result, StorageError};
use crate::models::{parse_datetime, NewCustomFilter, StoredCustomFilter};

const COLUMNS: &str = "filter_id, url, filter, checksum, removed, created_at, updated_at";

/// Repository for user-subscribed filters.
pub struct CustomFiltersRepo;

impl CustomFiltersRepo {
    /// Next free custom filter id.
    ///
    /// Tombstoned records still hold their id so it is never reused before
    /// cleanup.
    fn next_id(conn: &Connection) -> Result<FilterId> {
        let max: Option<i64> =
            conn.query_row("SELECT MAX(filter_id) FROM custom_filters", [], |row| {
                row.get(0)
            })?;
        let floor = i64::from(CUSTOM_FILTERS_START_ID) - 1;
        let next = max.unwrap_or(floor).max(floor) + 1;
        FilterId::try_from(next)
            .map_err(|_| StorageError::Config(format!("custom filter id overflow: {}", next)))
    }

    /// Allocate the next free id and insert the filter `build` returns for
    /// it, in one transaction.
    ///
    /// A plain insert: an id collision fails instead of replacing a record.
    pub fn insert_new<F>(conn: &Connection, checksum: &str, build: F) -> Result<Filter>
    where
        F: FnOnce(FilterId) -> Filter,
    {
        let tx = conn.unchecked_transaction()?;
        let filter_id = Self::next_id(&tx)?;
        let mut filter = build(filter_id);
        filter.filter_id = filter_id;

        let url = filter.custom_url.clone().unwrap_or_default();
        tx.execute(
            "INSERT INTO custom_filters (filter_id, url, filter, checksum)
             VALUES (?1, ?2, ?3, ?4)",
            params![filter_id, url, serde_json::to_string(&filter)?, checksum],
        )?;
        tx.commit()?;

        Ok(filter)
    }

    /// Insert a custom filter, or replace the one with the same id.
    pub fn upsert(conn: &Connection, record: &NewCustomFilter) -> Result<()> {
        let url = record.filter.custom_url.clone().unwrap_or_default();
        let filter_json = serde_json::to_string(&record.filter)?;

        conn.execute(
            "INSERT INTO custom_filters (filter_id, url, filter, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(filter_id) DO UPDATE SET
                url = ?2, filter = ?3, checksum = ?4, updated_at = datetime('now')",
            params![record.filter.filter_id, url, filter_json, record.checksum],
        )?;

        Ok(())
    }

    /// Get a custom filter by id, including tombstones.
    pub fn get(conn: &Connection, filter_id: FilterId) -> Result<Option<StoredCustomFilter>> {
        let sql = format!("SELECT {} FROM custom_filters WHERE filter_id = ?1", COLUMNS);
        let row = conn
            .query_row(&sql, [filter_id], read_row)
            .optional()?;
        row.map(into_record).transpose()
    }

    /// All custom filters ordered by id, including tombstones.
    pub fn get_all(conn: &Connection) -> Result<Vec<StoredCustomFilter>> {
        let sql = format!("SELECT {} FROM custom_filters ORDER BY filter_id", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map([], read_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_record).collect()
    }

    /// Flag a custom filter as removed. Returns false if it does not exist.
    pub fn mark_removed(conn: &Connection, filter_id: FilterId) -> Result<bool> {
        let updated = conn.execute(
            "UPDATE custom_filters SET removed = 1, updated_at = datetime('now')
             WHERE filter_id = ?1",
            [filter_id],
        )?;
        Ok(updated > 0)
    }

    /// Delete all tombstoned filters and return their ids.
    pub fn delete_removed(conn: &Connection) -> Result<Vec<FilterId>> {
        let mut stmt =
            conn.prepare("SELECT filter_id FROM custom_filters WHERE removed = 1 ORDER BY filter_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, FilterId>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        conn.execute("DELETE FROM custom_filters WHERE removed = 1", [])?;
        Ok(ids)
    }
}

type RawRow = (FilterId, String, String, String, bool, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get::<_, i32>(4)? != 0,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_record(raw: RawRow) -> Result<StoredCustomFilter> {
    let (filter_id, url, filter_json, checksum, removed, created_at, updated_at) = raw;
    Ok(StoredCustomFilter {
        filter_id,
        url,
        filter: serde_json::from_str(&filter_json)?,
        checksum,
        removed,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}
