//! Gmail REST adapter
//!
//! Talks to `users/me` of the Gmail v1 API with a bearer token:
//!
//! - `GET /gmail/v1/users/me/messages?q=...&pageToken=...`
//! - `GET /gmail/v1/users/me/messages/{id}`
//! - `GET /gmail/v1/users/me/messages/{id}/attachments/{attachment_id}`

use super::{Attachment, Credentials, Message, MessagePart, MessageRef, MessageSource};
use crate::config::MessageQuery;
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gmail API client bound to one account's credentials
pub struct GmailSource {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<ListedMessage>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    payload: Option<GmailPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    filename: String,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailBody {
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: String,
}

/// Depth-first flattening of the part tree, the root included
fn flatten_parts(part: GmailPart, out: &mut Vec<MessagePart>) {
    let GmailPart {
        mime_type,
        filename,
        body,
        parts,
    } = part;

    out.push(MessagePart {
        mime_type,
        filename,
        attachment_id: body.and_then(|b| b.attachment_id),
    });
    for child in parts {
        flatten_parts(child, out);
    }
}

impl GmailSource {
    pub fn new(base_url: impl Into<String>, credentials: Credentials, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/gmail/v1/users/me/messages", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.credentials.access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IngestError::auth(format!(
                "mail service rejected the stored token ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::message_source(format!(
                "{url} returned {status}: {}",
                body.trim()
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl MessageSource for GmailSource {
    async fn list_messages(&self, query: &MessageQuery) -> Result<Vec<MessageRef>> {
        let search = query.search_expression();
        info!(query = %search, "Searching mail for new data");

        let url = self.messages_url();
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let mut params = vec![("q", search.as_str())];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let page: ListResponse = self.get_json(&url, &params).await?;
            refs.extend(page.messages.into_iter().map(|m| MessageRef { id: m.id }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if seen_tokens.insert(next.clone()) => page_token = Some(next),
                Some(next) => {
                    warn!(token = %next, "Page token repeated, stopping pagination");
                    break;
                },
                None => break,
            }
        }

        info!(count = refs.len(), "Found messages");
        Ok(refs)
    }

    async fn get_message(&self, id: &str) -> Result<Message> {
        let url = format!("{}/{}", self.messages_url(), id);
        let message: GmailMessage = self.get_json(&url, &[]).await?;

        let mut parts = Vec::new();
        if let Some(payload) = message.payload {
            flatten_parts(payload, &mut parts);
        }
        debug!(message = %message.id, parts = parts.len(), "Fetched message");

        Ok(Message {
            id: message.id,
            parts,
        })
    }

    async fn get_attachment(&self, message_id: &str, part: &MessagePart) -> Result<Attachment> {
        let attachment_id = part.attachment_id.as_deref().ok_or_else(|| {
            IngestError::message_source(format!(
                "part '{}' of message {message_id} has no attachment id",
                part.filename
            ))
        })?;

        let url = format!(
            "{}/{}/attachments/{}",
            self.messages_url(),
            message_id,
            attachment_id
        );
        let body: AttachmentResponse = self.get_json(&url, &[]).await?;

        Ok(Attachment {
            id: attachment_id.to_string(),
            encoded_payload: body.data,
            mime_type: part.mime_type.clone(),
        })
    }
}
