//! mailload ingest library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls zipped CSV exports out of a mailbox and appends their rows to a
//! PostgreSQL table through a session-local staging table.
//!
//! # Pipeline
//!
//! - [`source`]: search the mailbox and fetch archive attachments
//! - [`decoder`]: base64url-decode and unzip each attachment into the workspace
//! - [`workspace`]: the run's flat extraction directory, reset on every run
//! - [`loader`]: render a psql script and run it in one transaction
//! - [`orchestrator`]: ties the steps together for one run
//!
//! # Example
//!
//! ```no_run
//! use mailload_ingest::config::{LoadTarget, LoaderSettings, MessageQuery, PsqlSettings, WarehouseConfig};
//! use mailload_ingest::loader::ProcessRunner;
//! use mailload_ingest::orchestrator::RunOrchestrator;
//! use mailload_ingest::source::{authenticate, FileCredentialStore, GmailSource};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let warehouse = WarehouseConfig::load("/etc/mailload/warehouse.properties")?;
//!     let credentials = authenticate(&FileCredentialStore::new("/etc/mailload/token.json"))?;
//!     let source = GmailSource::new("https://gmail.googleapis.com", credentials, Duration::from_secs(60))?;
//!
//!     let settings = LoaderSettings {
//!         workspace_dir: "/var/lib/mailload/extract".into(),
//!         target: LoadTarget::parse("mailload_staging", "dw.rows", "dev.rows", "fileid,amount", None)?,
//!         psql: PsqlSettings::default(),
//!     };
//!     let query = MessageQuery::new("daily_export", "1d")?;
//!
//!     let summary = RunOrchestrator::new(settings, query, warehouse, Arc::new(source), Arc::new(ProcessRunner))
//!         .run()
//!         .await?;
//!     println!("{} files loaded", summary.load.files_loaded);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod lock;
pub mod orchestrator;
pub mod source;
pub mod workspace;

pub use error::{DecodeError, IngestError, Result};
pub use orchestrator::{RunOrchestrator, RunSummary};
