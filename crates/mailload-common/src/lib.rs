//! mailload common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the mailload workspace members:
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Logging**: tracing subscriber setup driven by `LOG_*` variables
//! - **Properties**: parser for the `key=value` connection properties file
//!
//! # Example
//!
//! ```no_run
//! use mailload_common::properties::Properties;
//!
//! fn main() -> mailload_common::Result<()> {
//!     let props = Properties::from_file("/etc/mailload/warehouse.properties")?;
//!     let host = props.require("db_host")?;
//!     println!("warehouse host: {host}");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod properties;

// Re-export commonly used types
pub use error::{CommonError, Result};
