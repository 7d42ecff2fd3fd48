//! End-to-end runs against an in-memory mailbox and a recording psql runner

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use mailload_ingest::config::{
    ConnectionParams, Environment, LoadTarget, LoaderSettings, MessageQuery, PsqlSettings,
    WarehouseConfig,
};
use mailload_ingest::loader::{CommandOutput, CommandRunner, CommandSpec};
use mailload_ingest::lock::RunLock;
use mailload_ingest::orchestrator::{retry_load, RunOrchestrator};
use mailload_ingest::source::{Attachment, Message, MessagePart, MessageRef, MessageSource};
use mailload_ingest::IngestError;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

const CSV: &str = "fileid,filename,amount\n1,a.txt,10\n2,b.txt,20\n3,c.txt,30\n";

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeMailbox {
    messages: Vec<Message>,
    payloads: HashMap<String, String>,
    queries: Mutex<Vec<String>>,
    fail_attachments: bool,
}

impl FakeMailbox {
    fn with_message(mut self, id: &str, parts: Vec<MessagePart>) -> Self {
        self.messages.push(Message {
            id: id.to_string(),
            parts,
        });
        self
    }

    fn with_payload(mut self, attachment_id: &str, payload: String) -> Self {
        self.payloads.insert(attachment_id.to_string(), payload);
        self
    }
}

#[async_trait]
impl MessageSource for FakeMailbox {
    async fn list_messages(&self, query: &MessageQuery) -> mailload_ingest::Result<Vec<MessageRef>> {
        self.queries.lock().unwrap().push(query.search_expression());
        Ok(self
            .messages
            .iter()
            .map(|m| MessageRef { id: m.id.clone() })
            .collect())
    }

    async fn get_message(&self, id: &str) -> mailload_ingest::Result<Message> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| IngestError::message_source(format!("no message {id}")))
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        part: &MessagePart,
    ) -> mailload_ingest::Result<Attachment> {
        if self.fail_attachments {
            return Err(IngestError::message_source("connection reset"));
        }
        let id = part.attachment_id.clone().unwrap();
        let payload = self
            .payloads
            .get(&id)
            .cloned()
            .ok_or_else(|| IngestError::message_source(format!("{message_id}: no {id}")))?;
        Ok(Attachment {
            id,
            encoded_payload: payload,
            mime_type: part.mime_type.clone(),
        })
    }
}

/// Captures each psql invocation and the script it was pointed at
#[derive(Default)]
struct RecordingRunner {
    scripts: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> mailload_ingest::Result<CommandOutput> {
        let script = spec
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--file="))
            .unwrap();
        self.scripts
            .lock()
            .unwrap()
            .push(std::fs::read_to_string(script).unwrap());

        Ok(CommandOutput {
            success: !self.fail,
            exit_code: Some(if self.fail { 3 } else { 0 }),
            stdout: String::new(),
            stderr: if self.fail {
                "ERROR:  could not connect".to_string()
            } else {
                String::new()
            },
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn zip_payload(members: &[(&str, &str)]) -> String {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in members {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    URL_SAFE.encode(writer.finish().unwrap().into_inner())
}

fn part(mime: &str, filename: &str, attachment_id: Option<&str>) -> MessagePart {
    MessagePart {
        mime_type: mime.to_string(),
        filename: filename.to_string(),
        attachment_id: attachment_id.map(str::to_string),
    }
}

fn settings(workspace_dir: &Path) -> LoaderSettings {
    LoaderSettings {
        workspace_dir: workspace_dir.to_path_buf(),
        target: LoadTarget::parse(
            "mailload_staging",
            "warehouse.attachment_rows",
            "sandbox.attachment_rows",
            "fileid,filename,amount",
            Some("fileid"),
        )
        .unwrap(),
        psql: PsqlSettings::default(),
    }
}

fn warehouse(environment: Environment) -> WarehouseConfig {
    WarehouseConfig {
        environment,
        connection: ConnectionParams {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "dw".to_string(),
            user: "etl".to_string(),
            password: "secret".to_string(),
        },
    }
}

fn orchestrator(
    dir: &Path,
    mailbox: FakeMailbox,
    runner: Arc<RecordingRunner>,
) -> (RunOrchestrator, Arc<FakeMailbox>) {
    let mailbox = Arc::new(mailbox);
    let orchestrator = RunOrchestrator::new(
        settings(dir),
        MessageQuery::new("daily_export", "1d").unwrap(),
        warehouse(Environment::Prod),
        mailbox.clone(),
        runner,
    );
    (orchestrator, mailbox)
}

fn csv_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".csv"))
        .collect();
    names.sort();
    names
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_one_archive_one_plain_message() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");

    let mailbox = FakeMailbox::default()
        .with_message(
            "m-with-zip",
            vec![
                part("multipart/mixed", "", None),
                part("text/plain", "", None),
                part("application/zip", "export.zip", Some("ANGjdJ8Kx2mQpZ")),
            ],
        )
        .with_message("m-plain", vec![part("text/plain", "", None)])
        .with_payload("ANGjdJ8Kx2mQpZ", zip_payload(&[("export.csv", CSV)]));

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, mailbox) = orchestrator(&dir, mailbox, runner.clone());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.messages_seen, 2);
    assert_eq!(summary.messages_without_archives, 1);
    assert_eq!(summary.attachments_extracted, 1);
    assert_eq!(summary.attachments_failed, 0);
    assert_eq!(summary.load.files_loaded, 1);
    assert_eq!(summary.load.destination_table.as_str(), "warehouse.attachment_rows");

    assert_eq!(
        *mailbox.queries.lock().unwrap(),
        vec!["label:daily_export newer_than:1d".to_string()]
    );

    let files = csv_files(&dir);
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("ANGjdJ8Kx2_"));
    assert_eq!(std::fs::read_to_string(dir.join(&files[0])).unwrap(), CSV);

    let scripts = runner.scripts.lock().unwrap();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].matches("\\copy mailload_staging FROM").count(), 1);
    assert!(scripts[0].contains(&files[0]));
    assert!(scripts[0].contains("WHERE fileid IS NOT NULL"));
    assert!(scripts[0].contains("INSERT INTO warehouse.attachment_rows"));

    // Lock is released once the run ends
    assert!(!RunLock::lock_path(&dir).exists());
}

#[tokio::test]
async fn test_bad_attachment_does_not_stop_siblings() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");

    let mailbox = FakeMailbox::default()
        .with_message(
            "m1",
            vec![
                part("application/zip", "bad.zip", Some("att-bad-encoding")),
                part("application/zip", "two.zip", Some("att-two-members")),
                part("application/x-zip-compressed", "good.zip", Some("att-good")),
            ],
        )
        .with_payload("att-bad-encoding", "***not base64***".to_string())
        .with_payload(
            "att-two-members",
            zip_payload(&[("a.csv", CSV), ("b.csv", CSV)]),
        )
        .with_payload("att-good", zip_payload(&[("rows.csv", CSV)]));

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, _) = orchestrator(&dir, mailbox, runner.clone());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.attachments_extracted, 1);
    assert_eq!(summary.attachments_failed, 2);
    assert_eq!(summary.load.files_loaded, 1);
    assert_eq!(csv_files(&dir).len(), 1);
    assert!(csv_files(&dir)[0].starts_with("att-good_"));
}

#[tokio::test]
async fn test_shared_id_prefix_yields_distinct_files() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");

    let mailbox = FakeMailbox::default()
        .with_message(
            "m1",
            vec![
                part("application/zip", "a.zip", Some("SAMEPREFIX-one")),
                part("application/zip", "b.zip", Some("SAMEPREFIX-two")),
            ],
        )
        .with_payload("SAMEPREFIX-one", zip_payload(&[("a.csv", CSV)]))
        .with_payload("SAMEPREFIX-two", zip_payload(&[("b.csv", CSV)]));

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, _) = orchestrator(&dir, mailbox, runner.clone());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.attachments_extracted, 2);
    let files = csv_files(&dir);
    assert_eq!(files.len(), 2);
    assert_ne!(files[0], files[1]);
    assert_eq!(runner.scripts.lock().unwrap()[0].matches("\\copy").count(), 2);
}

#[tokio::test]
async fn test_empty_mailbox_still_loads() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, _) = orchestrator(&dir, FakeMailbox::default(), runner.clone());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.messages_seen, 0);
    assert_eq!(summary.load.files_loaded, 0);
    let scripts = runner.scripts.lock().unwrap();
    assert_eq!(scripts.len(), 1);
    assert!(!scripts[0].contains("\\copy"));
}

#[tokio::test]
async fn test_leftover_files_are_not_reloaded() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("stale_20200101T000000000000.csv"), CSV).unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, _) = orchestrator(&dir, FakeMailbox::default(), runner.clone());
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.load.files_loaded, 0);
    assert!(csv_files(&dir).is_empty());
}

#[tokio::test]
async fn test_source_failure_aborts_before_load() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");

    let mailbox = FakeMailbox {
        fail_attachments: true,
        ..FakeMailbox::default()
    }
    .with_message("m1", vec![part("application/zip", "a.zip", Some("att"))]);

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, _) = orchestrator(&dir, mailbox, runner.clone());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, IngestError::Source(_)));
    assert!(runner.scripts.lock().unwrap().is_empty());
    assert!(!RunLock::lock_path(&dir).exists());
}

#[tokio::test]
async fn test_failed_load_keeps_files_and_retry_loads_them() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");

    let mailbox = FakeMailbox::default()
        .with_message("m1", vec![part("application/zip", "a.zip", Some("att-1"))])
        .with_payload("att-1", zip_payload(&[("rows.csv", CSV)]));

    let failing = Arc::new(RecordingRunner {
        fail: true,
        ..RecordingRunner::default()
    });
    let (orchestrator, _) = orchestrator(&dir, mailbox, failing);
    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, IngestError::Load(ref msg) if msg.contains("could not connect")));
    assert_eq!(csv_files(&dir).len(), 1);

    let runner = Arc::new(RecordingRunner::default());
    let result = retry_load(&settings(&dir), &warehouse(Environment::Dev), runner.clone())
        .await
        .unwrap();

    assert_eq!(result.files_loaded, 1);
    assert_eq!(result.destination_table.as_str(), "sandbox.attachment_rows");
    assert!(runner.scripts.lock().unwrap()[0].contains("INSERT INTO sandbox.attachment_rows"));
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("extract");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("in_progress.csv"), CSV).unwrap();

    let held = RunLock::acquire(&dir).unwrap();

    let runner = Arc::new(RecordingRunner::default());
    let (orchestrator, _) = orchestrator(&dir, FakeMailbox::default(), runner.clone());
    let err = orchestrator.run().await.unwrap_err();

    assert!(matches!(err, IngestError::RunInProgress(_)));
    // The other run's files are untouched
    assert_eq!(csv_files(&dir), vec!["in_progress.csv".to_string()]);
    assert!(runner.scripts.lock().unwrap().is_empty());
    drop(held);
}
