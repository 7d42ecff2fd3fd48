//! Java-style properties files
//!
//! The warehouse connection settings arrive as a flat `key=value` file
//! maintained outside this repository. Lines starting with `#` or `!` are
//! comments, blank lines are skipped, and each entry is split at the first
//! `=` or `:` with both sides trimmed. A line without a separator is an error
//! rather than being silently dropped.

use crate::error::{CommonError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Parsed key/value property set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    /// Parse properties from text
    pub fn parse(input: &str) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (idx, raw) in input.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }

            let Some(split_at) = line.find(['=', ':']) else {
                return Err(CommonError::MalformedProperty {
                    line: idx + 1,
                    reason: "expected 'key=value'".to_string(),
                });
            };

            let key = line[..split_at].trim();
            if key.is_empty() {
                return Err(CommonError::MalformedProperty {
                    line: idx + 1,
                    reason: "empty key".to_string(),
                });
            }

            let value = line[split_at + 1..].trim();
            entries.insert(key.to_string(), value.to_string());
        }

        Ok(Self { entries })
    }

    /// Read and parse a properties file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CommonError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Look up a key that must be present with a non-empty value
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(CommonError::MissingProperty(key.to_string())),
        }
    }

    /// Look up a required key and parse it
    pub fn require_parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.require(key)?;
        value.parse().map_err(|e: T::Err| CommonError::InvalidProperty {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# warehouse connection
db_host=warehouse.internal
db_port = 5432
db_name=analytics
db_user=loader
db_password=s3cr=t
! legacy comment style

environment:PROD
";

    #[test]
    fn test_parse_sample() {
        let props = Properties::parse(SAMPLE).unwrap();
        assert_eq!(props.len(), 6);
        assert_eq!(props.get("db_host"), Some("warehouse.internal"));
        assert_eq!(props.get("db_port"), Some("5432"));
        assert_eq!(props.get("environment"), Some("PROD"));
    }

    #[test]
    fn test_value_keeps_later_separators() {
        let props = Properties::parse(SAMPLE).unwrap();
        assert_eq!(props.get("db_password"), Some("s3cr=t"));
    }

    #[test]
    fn test_line_without_separator_is_rejected() {
        let err = Properties::parse("db_host=x\njunk\n").unwrap_err();
        assert!(matches!(err, CommonError::MalformedProperty { line: 2, .. }));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        assert!(Properties::parse("=value").is_err());
    }

    #[test]
    fn test_require_missing_and_empty() {
        let props = Properties::parse("db_user=\n").unwrap();
        assert!(matches!(
            props.require("db_user"),
            Err(CommonError::MissingProperty(_))
        ));
        assert!(matches!(
            props.require("db_host"),
            Err(CommonError::MissingProperty(_))
        ));
    }

    #[test]
    fn test_require_parsed() {
        let props = Properties::parse("db_port=5432\nbad_port=fifty\n").unwrap();
        assert_eq!(props.require_parsed::<u16>("db_port").unwrap(), 5432);
        assert!(matches!(
            props.require_parsed::<u16>("bad_port"),
            Err(CommonError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Properties::from_file(dir.path().join("absent.properties")).unwrap_err();
        assert!(matches!(err, CommonError::Io { .. }));
    }
}
