//! Filter list versions.
//!
//! Filter versions published by the metadata service are dotted numeric
//! strings with a variable number of components (`"2.0.91.12"`, `"1.2.0"`).
//! They are compared component by component, with missing components treated
//! as zero.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Version of a filter list.
///
/// Keeps the original string so that versions round-trip unchanged through
/// persisted state and snapshots.
#[derive(Debug, Clone, Default)]
pub struct FilterVersion {
    raw: String,
    parts: Option<Vec<u64>>,
}

impl FilterVersion {
    /// Parses a version string. Unparsable input is kept but sorts lowest.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parts = parse_parts(&raw);
        Self { raw, parts }
    }

    /// The `0.0.0.0` sentinel that every published version is newer than.
    pub fn zero() -> Self {
        Self::parse("0.0.0.0")
    }

    /// Returns the original version string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the version string could be parsed.
    pub fn is_valid(&self) -> bool {
        self.parts.is_some()
    }

    /// Returns true if `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &FilterVersion) -> bool {
        self > other
    }
}

fn parse_parts(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .split('.')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect()
}

impl PartialEq for FilterVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FilterVersion {}

impl PartialOrd for FilterVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilterVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.parts, &other.parts) {
            (None, None) => self.raw.cmp(&other.raw),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => {
                let len = left.len().max(right.len());
                for i in 0..len {
                    let l = left.get(i).copied().unwrap_or(0);
                    let r = right.get(i).copied().unwrap_or(0);
                    match l.cmp(&r) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                Ordering::Equal
            }
        }
    }
}

impl fmt::Display for FilterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for FilterVersion {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl Serialize for FilterVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for FilterVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_version_detected() {
        let local = FilterVersion::parse("1.2.0");
        assert!(!FilterVersion::parse("1.1.9").is_newer_than(&local));
        assert!(FilterVersion::parse("1.3.0").is_newer_than(&local));
    }

    #[test]
    fn test_equal_versions_are_not_newer() {
        let local = FilterVersion::parse("2.0.91.12");
        assert!(!FilterVersion::parse("2.0.91.12").is_newer_than(&local));
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(FilterVersion::parse("1.2"), FilterVersion::parse("1.2.0.0"));
        assert!(FilterVersion::parse("1.2.0.1") > FilterVersion::parse("1.2"));
    }

    #[test]
    fn test_four_part_versions() {
        assert!(FilterVersion::parse("2.0.91.13") > FilterVersion::parse("2.0.91.12"));
        assert!(FilterVersion::parse("2.1.0.0") > FilterVersion::parse("2.0.99.99"));
    }

    #[test]
    fn test_zero_is_older_than_everything_published() {
        let zero = FilterVersion::zero();
        assert_eq!(zero.as_str(), "0.0.0.0");
        assert!(FilterVersion::parse("0.0.0.1").is_newer_than(&zero));
    }

    #[test]
    fn test_invalid_version_sorts_lowest() {
        let invalid = FilterVersion::parse("not-a-version");
        assert!(!invalid.is_valid());
        assert!(FilterVersion::zero() > invalid);
        assert!(FilterVersion::parse("1.0").is_newer_than(&FilterVersion::parse("")));
    }

    #[test]
    fn test_serde_keeps_raw_string() {
        let version = FilterVersion::parse("1.0.3.7");
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"1.0.3.7\"");

        let back: FilterVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_str(), "1.0.3.7");
    }
}
