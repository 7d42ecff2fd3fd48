//! Staged warehouse load
//!
//! All extracted files go through a session-local staging table in one psql
//! session:
//!
//! 1. `CREATE TEMP TABLE` shaped like the destination's CSV columns
//! 2. `\copy` every workspace file into it
//! 3. add and fill `insert_timestamp`
//! 4. one `INSERT ... SELECT` into the destination
//!
//! psql runs with `--single-transaction` and `ON_ERROR_STOP`, so any failure
//! rolls back and the staging table disappears with the session. The
//! destination either gains every staged row or none.

pub mod plan;
pub mod runner;

pub use plan::{LoadPlan, Statement};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};

use crate::config::{ConnectionParams, Environment, Identifier, LoadTarget, PsqlSettings, WarehouseConfig};
use crate::error::{IngestError, Result};
use crate::workspace::ExtractionWorkspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub environment: Environment,
    pub destination_table: Identifier,
    pub files_loaded: usize,
    pub script_path: PathBuf,
    pub elapsed: Duration,
}

/// Builds and executes the staged load for a workspace
pub struct StagedLoader {
    target: LoadTarget,
    psql: PsqlSettings,
    runner: Arc<dyn CommandRunner>,
}

impl StagedLoader {
    pub fn new(target: LoadTarget, psql: PsqlSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            target,
            psql,
            runner,
        }
    }

    /// Plan a load of every CSV currently in the workspace
    pub fn plan(&self, workspace: &ExtractionWorkspace, environment: Environment) -> Result<LoadPlan> {
        let files = workspace.list_files()?;
        for file in &files {
            debug!(path = %file.display(), "Adding file to load plan");
        }
        LoadPlan::new(&self.target, environment, &files)
    }

    /// The psql invocation that executes `script`
    pub fn command(&self, script: &Path, connection: &ConnectionParams) -> CommandSpec {
        CommandSpec {
            program: self.psql.program.clone(),
            args: vec![
                "--no-psqlrc".to_string(),
                "--no-password".to_string(),
                "--single-transaction".to_string(),
                "--set=ON_ERROR_STOP=1".to_string(),
                format!("--host={}", connection.host),
                format!("--port={}", connection.port),
                format!("--dbname={}", connection.dbname),
                format!("--username={}", connection.user),
                format!("--file={}", script.display()),
            ],
            envs: vec![
                ("PGPASSWORD".to_string(), connection.password.clone()),
                ("PGAPPNAME".to_string(), "mailload".to_string()),
            ],
            timeout: self.psql.timeout,
        }
    }

    /// Load every workspace file into the destination for `warehouse.environment`
    pub async fn load(
        &self,
        workspace: &ExtractionWorkspace,
        warehouse: &WarehouseConfig,
    ) -> Result<LoadResult> {
        let started = Instant::now();
        let plan = self.plan(workspace, warehouse.environment)?;
        info!(
            destination = %plan.destination_table,
            environment = %warehouse.environment,
            files = plan.source_files.len(),
            "Copying data"
        );

        let script_path = workspace.script_path();
        let script = plan.render();
        std::fs::write(&script_path, &script).map_err(|e| IngestError::io(&script_path, e))?;
        debug!(script = %script_path.display(), "Rendered load plan:\n{}", script);

        let spec = self.command(&script_path, &warehouse.connection);
        let output = self.runner.run(&spec).await?;

        if !output.success {
            let status = output
                .exit_code
                .map_or_else(|| "a signal".to_string(), |code| format!("status {code}"));
            error!(stderr = %output.stderr.trim(), "psql exited with {}", status);
            return Err(IngestError::load(format!(
                "psql exited with {status}: {}",
                output.stderr.trim()
            )));
        }

        let result = LoadResult {
            environment: warehouse.environment,
            destination_table: plan.destination_table,
            files_loaded: plan.source_files.len(),
            script_path,
            elapsed: started.elapsed(),
        };
        info!(
            destination = %result.destination_table,
            files = result.files_loaded,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "All files copied"
        );

        Ok(result)
    }
}
