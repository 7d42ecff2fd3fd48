//! mailload - load zipped CSV mail attachments into the warehouse

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use mailload_common::logging::{init_logging, LogConfig, LogLevel};
use mailload_ingest::config::{
    LoadTarget, LoaderSettings, MessageQuery, PsqlSettings, WarehouseConfig,
    DEFAULT_GMAIL_API_URL, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LOAD_TIMEOUT_SECS,
    DEFAULT_NEWER_THAN, DEFAULT_PSQL_PROGRAM, DEFAULT_STAGING_TABLE,
};
use mailload_ingest::loader::ProcessRunner;
use mailload_ingest::orchestrator::{retry_load, RunOrchestrator};
use mailload_ingest::source::{
    authenticate, CredentialStore, Credentials, FileCredentialStore, GmailSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mailload")]
#[command(author, version, about = "Load zipped CSV mail attachments into the warehouse")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new attachments and load them
    Run {
        #[command(flatten)]
        load: LoadArgs,

        #[command(flatten)]
        mail: MailArgs,
    },

    /// Retry the load of files a failed run left in the workspace
    Load {
        #[command(flatten)]
        load: LoadArgs,
    },

    /// Store an access token obtained out of band
    ///
    /// mailload does not renew tokens. Re-run this after the issuing tool
    /// renews the token.
    ImportToken {
        /// Token file to write
        #[arg(long, env = "MAILLOAD_CREDENTIALS", default_value = "./token.json")]
        credentials: PathBuf,

        /// Bearer access token
        #[arg(long, env = "MAILLOAD_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        /// Refresh token, stored for the renewing tool and never used by mailload
        #[arg(long, hide_env_values = true)]
        refresh_token: Option<String>,

        /// Expiry as RFC 3339 (e.g. 2026-01-18T12:00:00Z)
        #[arg(long)]
        expires_at: Option<DateTime<Utc>>,
    },
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Warehouse connection properties file
    #[arg(long, env = "MAILLOAD_PROPERTIES")]
    properties: PathBuf,

    /// Extraction directory, wiped at the start of every run
    #[arg(long, env = "MAILLOAD_WORKSPACE_DIR", default_value = "./extract")]
    workspace_dir: PathBuf,

    /// Session-local staging table
    #[arg(long, env = "MAILLOAD_STAGING_TABLE", default_value = DEFAULT_STAGING_TABLE)]
    staging_table: String,

    /// Destination table when environment is PROD
    #[arg(long, env = "MAILLOAD_PROD_TABLE")]
    prod_table: String,

    /// Destination table when environment is DEV
    #[arg(long, env = "MAILLOAD_DEV_TABLE")]
    dev_table: String,

    /// Comma-separated CSV columns, in file order
    #[arg(long, env = "MAILLOAD_COLUMNS")]
    columns: String,

    /// Only rows with a non-null value here get an insert timestamp
    #[arg(long, env = "MAILLOAD_KEY_COLUMN")]
    key_column: Option<String>,

    /// psql executable
    #[arg(long, env = "MAILLOAD_PSQL", default_value = DEFAULT_PSQL_PROGRAM)]
    psql: PathBuf,

    /// Upper bound on the load session, in seconds
    #[arg(long, env = "MAILLOAD_LOAD_TIMEOUT_SECS", default_value_t = DEFAULT_LOAD_TIMEOUT_SECS)]
    load_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct MailArgs {
    /// Stored access token
    #[arg(long, env = "MAILLOAD_CREDENTIALS", default_value = "./token.json")]
    credentials: PathBuf,

    /// Mail API base URL
    #[arg(long, env = "MAILLOAD_GMAIL_API_URL", default_value = DEFAULT_GMAIL_API_URL)]
    gmail_api_url: String,

    /// Label the exports are filed under
    #[arg(long, env = "MAILLOAD_LABEL")]
    label: String,

    /// Recency window, e.g. 1d
    #[arg(long, env = "MAILLOAD_NEWER_THAN", default_value = DEFAULT_NEWER_THAN)]
    newer_than: String,

    /// Timeout for each mail API request, in seconds
    #[arg(long, env = "MAILLOAD_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    http_timeout_secs: u64,
}

impl LoadArgs {
    fn settings(&self) -> Result<LoaderSettings> {
        let target = LoadTarget::parse(
            &self.staging_table,
            &self.prod_table,
            &self.dev_table,
            &self.columns,
            self.key_column.as_deref(),
        )?;

        Ok(LoaderSettings {
            workspace_dir: self.workspace_dir.clone(),
            target,
            psql: PsqlSettings {
                program: self.psql.clone(),
                timeout: Duration::from_secs(self.load_timeout_secs),
            },
        })
    }

    fn warehouse(&self) -> Result<WarehouseConfig> {
        WarehouseConfig::load(&self.properties).with_context(|| {
            format!("reading warehouse properties {}", self.properties.display())
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let base = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("mailload")
        .build();

    // LOG_* variables take precedence, except that --verbose always wins
    let mut log_config = match base.with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {e}");
            std::process::exit(2);
        },
    };
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            std::process::exit(2);
        },
    };

    if let Err(e) = execute(cli.command).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn execute(command: Command) -> Result<()> {
    match command {
        Command::Run { load, mail } => {
            let settings = load.settings()?;
            let query = MessageQuery::new(&mail.label, &mail.newer_than)?;
            let warehouse = load.warehouse()?;

            let credentials = authenticate(&FileCredentialStore::new(&mail.credentials))?;
            let source = GmailSource::new(
                &mail.gmail_api_url,
                credentials,
                Duration::from_secs(mail.http_timeout_secs),
            )?;

            let summary = RunOrchestrator::new(
                settings,
                query,
                warehouse,
                Arc::new(source),
                Arc::new(ProcessRunner),
            )
            .run()
            .await?;

            info!(
                messages = summary.messages_seen,
                skipped_messages = summary.messages_without_archives,
                extracted = summary.attachments_extracted,
                failed = summary.attachments_failed,
                destination = %summary.load.destination_table,
                files_loaded = summary.load.files_loaded,
                "Run complete"
            );
        },
        Command::Load { load } => {
            let settings = load.settings()?;
            let warehouse = load.warehouse()?;

            let result = retry_load(&settings, &warehouse, Arc::new(ProcessRunner)).await?;
            info!(
                destination = %result.destination_table,
                files_loaded = result.files_loaded,
                "Load complete"
            );
        },
        Command::ImportToken {
            credentials,
            access_token,
            refresh_token,
            expires_at,
        } => {
            let store = FileCredentialStore::new(credentials);
            store.save(&Credentials {
                access_token,
                refresh_token,
                expires_at,
            })?;
            info!(path = %store.path().display(), "Token imported");
        },
    }

    Ok(())
}
