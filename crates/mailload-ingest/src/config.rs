//! Run configuration
//!
//! Two sources feed a run:
//!
//! - **Warehouse properties** (`db_host`, `db_port`, `db_name`, `db_user`,
//!   `db_password`, `environment`) come from the externally managed
//!   properties file and become a [`WarehouseConfig`].
//! - **Loader settings** (tables, columns, psql, timeouts) and the mail
//!   search filter come from CLI flags or `MAILLOAD_*` variables and become a
//!   [`LoaderSettings`] and a [`MessageQuery`].
//!
//! Both are validated up front so a bad value fails the run before the
//! workspace or the warehouse is touched.

use crate::error::{IngestError, Result};
use mailload_common::properties::Properties;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default staging table name; created as a session-local temp table.
pub const DEFAULT_STAGING_TABLE: &str = "mailload_staging";

/// Default Gmail REST API base URL.
pub const DEFAULT_GMAIL_API_URL: &str = "https://gmail.googleapis.com";

/// Default search recency window.
pub const DEFAULT_NEWER_THAN: &str = "1d";

/// Default bulk-copy client.
pub const DEFAULT_PSQL_PROGRAM: &str = "psql";

/// Upper bound on one bulk-load session, in seconds.
pub const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 3600;

/// Timeout for each message source request, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Environment
// ============================================================================

/// Deployment environment; decides which destination table receives rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PROD" | "PRODUCTION" => Ok(Environment::Prod),
            "DEV" | "DEVELOPMENT" => Ok(Environment::Dev),
            other => Err(IngestError::config(format!(
                "unknown environment '{other}' (expected PROD or DEV)"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Dev => write!(f, "DEV"),
            Environment::Prod => write!(f, "PROD"),
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// A validated SQL identifier, optionally schema-qualified
///
/// Segments must match `[A-Za-z_][A-Za-z0-9_$]*`, so identifiers can be
/// rendered into statements without quoting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn valid_segment(segment: &str) -> bool {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    }
}

impl FromStr for Identifier {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let segments: Vec<&str> = s.split('.').collect();
        if segments.len() > 2 || !segments.iter().all(|seg| Self::valid_segment(seg)) {
            return Err(IngestError::config(format!("invalid SQL identifier '{s}'")));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a comma-separated column list
pub fn parse_columns(list: &str) -> Result<Vec<Identifier>> {
    let columns = list
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(Identifier::from_str)
        .collect::<Result<Vec<_>>>()?;

    if columns.is_empty() {
        return Err(IngestError::config("column list is empty"));
    }
    if let Some(col) = columns.iter().find(|c| c.as_str().contains('.')) {
        return Err(IngestError::config(format!(
            "column '{col}' must not be schema-qualified"
        )));
    }
    if columns.iter().any(|c| c.as_str().eq_ignore_ascii_case("insert_timestamp")) {
        return Err(IngestError::config(
            "column list must not include insert_timestamp; it is added during the load",
        ));
    }

    Ok(columns)
}

// ============================================================================
// Warehouse
// ============================================================================

/// Connection parameters for the warehouse session
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Environment plus connection, as resolved from the properties file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseConfig {
    pub environment: Environment,
    pub connection: ConnectionParams,
}

impl WarehouseConfig {
    /// Build from parsed properties
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let environment = props.require("environment")?.parse()?;
        let connection = ConnectionParams {
            host: props.require("db_host")?.to_string(),
            port: props.require_parsed("db_port")?,
            dbname: props.require("db_name")?.to_string(),
            user: props.require("db_user")?.to_string(),
            password: props.require("db_password")?.to_string(),
        };

        Ok(Self {
            environment,
            connection,
        })
    }

    /// Read the properties file and build the warehouse config
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_properties(&Properties::from_file(path)?)
    }
}

// ============================================================================
// Load target
// ============================================================================

/// Destination tables per environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTables {
    pub prod: Identifier,
    pub dev: Identifier,
}

impl DestinationTables {
    /// The table that receives rows in `environment`
    pub fn for_environment(&self, environment: Environment) -> &Identifier {
        match environment {
            Environment::Prod => &self.prod,
            Environment::Dev => &self.dev,
        }
    }
}

/// Shape of the load: where rows land and which CSV columns they carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTarget {
    pub staging_table: Identifier,
    pub destinations: DestinationTables,
    /// CSV columns in file order; the destination has these plus `insert_timestamp`
    pub columns: Vec<Identifier>,
    /// When set, only rows with a non-null key are stamped
    pub key_column: Option<Identifier>,
}

impl LoadTarget {
    /// Validate raw settings into a load target
    pub fn parse(
        staging_table: &str,
        prod_table: &str,
        dev_table: &str,
        columns: &str,
        key_column: Option<&str>,
    ) -> Result<Self> {
        let staging_table: Identifier = staging_table.parse()?;
        if staging_table.as_str().contains('.') {
            return Err(IngestError::config(
                "staging table is a temp table and cannot be schema-qualified",
            ));
        }

        let columns = parse_columns(columns)?;
        let key_column = match key_column.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => {
                let key: Identifier = key.parse()?;
                if !columns.contains(&key) {
                    return Err(IngestError::config(format!(
                        "key column '{key}' is not in the column list"
                    )));
                }
                Some(key)
            },
            None => None,
        };

        Ok(Self {
            staging_table,
            destinations: DestinationTables {
                prod: prod_table.parse()?,
                dev: dev_table.parse()?,
            },
            columns,
            key_column,
        })
    }
}

/// How the bulk-copy client is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsqlSettings {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl Default for PsqlSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PSQL_PROGRAM),
            timeout: Duration::from_secs(DEFAULT_LOAD_TIMEOUT_SECS),
        }
    }
}

// ============================================================================
// Message search
// ============================================================================

/// Fixed search filter for candidate messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub label: String,
    pub newer_than: String,
}

impl MessageQuery {
    pub fn new(label: impl Into<String>, newer_than: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let newer_than = newer_than.into();

        if label.trim().is_empty() || label.contains(char::is_whitespace) {
            return Err(IngestError::config(format!("invalid search label '{label}'")));
        }
        let valid_window = newer_than.is_ascii()
            && newer_than.len() >= 2
            && newer_than[..newer_than.len() - 1].chars().all(|c| c.is_ascii_digit())
            && newer_than.ends_with(['d', 'm', 'y']);
        if !valid_window {
            return Err(IngestError::config(format!(
                "invalid recency window '{newer_than}' (expected e.g. 1d, 2m, 1y)"
            )));
        }

        Ok(Self { label, newer_than })
    }

    /// Render as a mail search expression
    pub fn search_expression(&self) -> String {
        format!("label:{} newer_than:{}", self.label, self.newer_than)
    }
}

// ============================================================================
// Run settings
// ============================================================================

/// Workspace and load shape; shared by full runs and load retries
#[derive(Debug, Clone)]
pub struct LoaderSettings {
    pub workspace_dir: PathBuf,
    pub target: LoadTarget,
    pub psql: PsqlSettings,
}
