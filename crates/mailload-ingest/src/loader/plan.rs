//! Typed load plan and its psql rendering
//!
//! A [`LoadPlan`] is an ordered list of [`Statement`]s. Building the plan and
//! rendering it are separate so the sequence can be checked without a
//! database.

use crate::config::{Environment, Identifier, LoadTarget};
use crate::error::{IngestError, Result};
use std::fmt;
use std::path::PathBuf;

/// Name of the column stamped on every staged row.
pub const INSERT_TIMESTAMP_COLUMN: &str = "insert_timestamp";

/// One step of the staged load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Session-local staging table shaped like the destination's CSV columns
    CreateStaging {
        staging: Identifier,
        columns: Vec<Identifier>,
        source: Identifier,
    },
    /// Client-side bulk copy of one CSV file
    CopyFile { staging: Identifier, path: String },
    AddTimestampColumn { staging: Identifier },
    /// Stamp staged rows with the session's transaction time
    StampRows {
        staging: Identifier,
        key_column: Option<Identifier>,
    },
    /// Append every staged row to the destination
    Append {
        destination: Identifier,
        staging: Identifier,
        columns: Vec<Identifier>,
    },
}

fn column_list(columns: &[Identifier]) -> String {
    columns
        .iter()
        .map(Identifier::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateStaging {
                staging,
                columns,
                source,
            } => write!(
                f,
                "CREATE TEMP TABLE {staging} AS (SELECT {} FROM {source} LIMIT 0);",
                column_list(columns)
            ),
            // psql meta-command: one line, no terminating semicolon
            Statement::CopyFile { staging, path } => write!(
                f,
                "\\copy {staging} FROM {} WITH (FORMAT csv, DELIMITER ',', HEADER true)",
                quote_literal(path)
            ),
            Statement::AddTimestampColumn { staging } => write!(
                f,
                "ALTER TABLE {staging} ADD COLUMN {INSERT_TIMESTAMP_COLUMN} timestamp;"
            ),
            Statement::StampRows {
                staging,
                key_column: Some(key),
            } => write!(
                f,
                "UPDATE {staging} SET {INSERT_TIMESTAMP_COLUMN} = now() WHERE {key} IS NOT NULL;"
            ),
            Statement::StampRows {
                staging,
                key_column: None,
            } => write!(f, "UPDATE {staging} SET {INSERT_TIMESTAMP_COLUMN} = now();"),
            Statement::Append {
                destination,
                staging,
                columns,
            } => {
                let cols = column_list(columns);
                write!(
                    f,
                    "INSERT INTO {destination} ({cols}, {INSERT_TIMESTAMP_COLUMN}) \
                     SELECT {cols}, {INSERT_TIMESTAMP_COLUMN} FROM {staging};"
                )
            },
        }
    }
}

/// Everything one staged load does, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadPlan {
    pub environment: Environment,
    pub staging_table: Identifier,
    pub destination_table: Identifier,
    pub columns: Vec<Identifier>,
    pub key_column: Option<Identifier>,
    pub source_files: Vec<String>,
}

impl LoadPlan {
    /// Build a plan that copies `source_files` into the destination for `environment`
    ///
    /// Paths must be UTF-8 and single-line, since each lands on its own
    /// psql meta-command line.
    pub fn new(
        target: &LoadTarget,
        environment: Environment,
        source_files: &[PathBuf],
    ) -> Result<Self> {
        let source_files = source_files
            .iter()
            .map(|path| match path.to_str() {
                Some(s) if !s.contains(['\n', '\r']) => Ok(s.to_string()),
                _ => Err(IngestError::load(format!(
                    "file path {} cannot be used in a copy statement",
                    path.display()
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            environment,
            staging_table: target.staging_table.clone(),
            destination_table: target.destinations.for_environment(environment).clone(),
            columns: target.columns.clone(),
            key_column: target.key_column.clone(),
            source_files,
        })
    }

    pub fn statements(&self) -> Vec<Statement> {
        let mut statements = Vec::with_capacity(self.source_files.len() + 4);

        statements.push(Statement::CreateStaging {
            staging: self.staging_table.clone(),
            columns: self.columns.clone(),
            source: self.destination_table.clone(),
        });
        statements.extend(self.source_files.iter().map(|path| Statement::CopyFile {
            staging: self.staging_table.clone(),
            path: path.clone(),
        }));
        statements.push(Statement::AddTimestampColumn {
            staging: self.staging_table.clone(),
        });
        statements.push(Statement::StampRows {
            staging: self.staging_table.clone(),
            key_column: self.key_column.clone(),
        });
        statements.push(Statement::Append {
            destination: self.destination_table.clone(),
            staging: self.staging_table.clone(),
            columns: self.columns.clone(),
        });

        statements
    }

    /// Serialize as a psql script
    pub fn render(&self) -> String {
        let mut script = format!(
            "-- mailload staged load\n-- destination: {} ({})\n-- files: {}\n\\set ON_ERROR_STOP on\n",
            self.destination_table,
            self.environment,
            self.source_files.len()
        );
        for statement in self.statements() {
            script.push_str(&statement.to_string());
            script.push('\n');
        }
        script
    }
}
