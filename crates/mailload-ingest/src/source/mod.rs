//! Message source boundary
//!
//! The pipeline only needs three read-only calls from a mail service: search
//! by filter, fetch one message's part tree, and fetch one attachment's
//! encoded bytes. [`MessageSource`] is that seam; [`gmail::GmailSource`] is
//! the production adapter.

pub mod credentials;
pub mod gmail;

pub use credentials::{authenticate, CredentialStore, Credentials, FileCredentialStore};
pub use gmail::GmailSource;

use crate::config::MessageQuery;
use crate::error::Result;
use async_trait::async_trait;

/// MIME types treated as zip archives.
pub const ARCHIVE_MIME_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// Search hit; only the id is needed to fetch the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
}

/// A message with its MIME parts flattened in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    pub mime_type: String,
    pub filename: String,
    /// Set when the body has to be fetched separately
    pub attachment_id: Option<String>,
}

impl MessagePart {
    pub fn is_archive(&self) -> bool {
        ARCHIVE_MIME_TYPES
            .iter()
            .any(|t| self.mime_type.eq_ignore_ascii_case(t))
    }
}

impl Message {
    /// Parts that are fetchable zip attachments
    pub fn archive_parts(&self) -> impl Iterator<Item = &MessagePart> {
        self.parts
            .iter()
            .filter(|p| p.is_archive() && p.attachment_id.is_some())
    }
}

/// Encoded attachment body, consumed once by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub encoded_payload: String,
    pub mime_type: String,
}

/// Read-only access to the mail service
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// All messages matching `query`
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<MessageRef>>;

    async fn get_message(&self, id: &str) -> Result<Message>;

    /// Fetch the body of `part`, which must carry an attachment id
    async fn get_attachment(&self, message_id: &str, part: &MessagePart) -> Result<Attachment>;
}
