//! Run orchestration
//!
//! One run is strictly sequential: take the run lock, reset the workspace,
//! search for candidate messages, decode every archive attachment into the
//! workspace, then perform a single staged load.

use crate::config::{LoaderSettings, MessageQuery, WarehouseConfig};
use crate::decoder::AttachmentDecoder;
use crate::error::Result;
use crate::loader::{CommandRunner, LoadResult, StagedLoader};
use crate::lock::RunLock;
use crate::source::{Message, MessageSource};
use crate::workspace::ExtractionWorkspace;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub messages_seen: usize,
    /// Messages skipped because they had no archive parts
    pub messages_without_archives: usize,
    pub attachments_extracted: usize,
    /// Attachments that failed to decode and were skipped
    pub attachments_failed: usize,
    pub load: LoadResult,
}

#[derive(Debug, Default)]
struct ExtractionCounts {
    messages_seen: usize,
    messages_without_archives: usize,
    attachments_extracted: usize,
    attachments_failed: usize,
}

/// Drives retrieval, extraction and load for one run
pub struct RunOrchestrator {
    settings: LoaderSettings,
    query: MessageQuery,
    warehouse: WarehouseConfig,
    source: Arc<dyn MessageSource>,
    loader: StagedLoader,
}

impl RunOrchestrator {
    pub fn new(
        settings: LoaderSettings,
        query: MessageQuery,
        warehouse: WarehouseConfig,
        source: Arc<dyn MessageSource>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let loader = StagedLoader::new(settings.target.clone(), settings.psql.clone(), runner);
        Self {
            settings,
            query,
            warehouse,
            source,
            loader,
        }
    }

    /// Run the whole pipeline once
    pub async fn run(&self) -> Result<RunSummary> {
        let _lock = RunLock::acquire(&self.settings.workspace_dir)?;
        info!(
            environment = %self.warehouse.environment,
            workspace = %self.settings.workspace_dir.display(),
            "Starting run"
        );

        let mut workspace = ExtractionWorkspace::create_or_reset(&self.settings.workspace_dir)?;
        let counts = self.extract_all(&mut workspace).await?;

        info!(
            messages = counts.messages_seen,
            extracted = counts.attachments_extracted,
            failed = counts.attachments_failed,
            "Extraction finished"
        );

        let load = self.loader.load(&workspace, &self.warehouse).await?;

        Ok(RunSummary {
            messages_seen: counts.messages_seen,
            messages_without_archives: counts.messages_without_archives,
            attachments_extracted: counts.attachments_extracted,
            attachments_failed: counts.attachments_failed,
            load,
        })
    }

    async fn extract_all(&self, workspace: &mut ExtractionWorkspace) -> Result<ExtractionCounts> {
        let refs = self.source.list_messages(&self.query).await?;

        let mut decoder = AttachmentDecoder::new();
        let mut counts = ExtractionCounts {
            messages_seen: refs.len(),
            ..Default::default()
        };

        for message_ref in &refs {
            let message = self.source.get_message(&message_ref.id).await?;
            self.extract_message(&message, &mut decoder, workspace, &mut counts)
                .await?;
        }

        Ok(counts)
    }

    async fn extract_message(
        &self,
        message: &Message,
        decoder: &mut AttachmentDecoder,
        workspace: &mut ExtractionWorkspace,
        counts: &mut ExtractionCounts,
    ) -> Result<()> {
        let parts: Vec<_> = message.archive_parts().collect();
        if parts.is_empty() {
            debug!(message = %message.id, "No archive attachment, skipping message");
            counts.messages_without_archives += 1;
            return Ok(());
        }

        for part in parts {
            let attachment = self.source.get_attachment(&message.id, part).await?;

            match decoder.decode_and_extract(&attachment.encoded_payload, &attachment.id, workspace) {
                Ok(file) => {
                    info!(
                        message = %message.id,
                        file = %file.disk_path.display(),
                        "Attachment extracted"
                    );
                    counts.attachments_extracted += 1;
                },
                Err(e) => {
                    warn!(
                        message = %message.id,
                        filename = %part.filename,
                        error = %e,
                        "Skipping attachment that could not be extracted"
                    );
                    counts.attachments_failed += 1;
                },
            }
        }

        Ok(())
    }
}

/// Re-run only the load phase against files a previous run left behind
pub async fn retry_load(
    settings: &LoaderSettings,
    warehouse: &WarehouseConfig,
    runner: Arc<dyn CommandRunner>,
) -> Result<LoadResult> {
    let _lock = RunLock::acquire(&settings.workspace_dir)?;
    let workspace = ExtractionWorkspace::open(&settings.workspace_dir)?;
    info!(workspace = %workspace.root().display(), "Retrying load of existing workspace");

    StagedLoader::new(settings.target.clone(), settings.psql.clone(), runner)
        .load(&workspace, warehouse)
        .await
}
