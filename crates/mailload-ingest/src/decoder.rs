//! Attachment decoding and extraction
//!
//! Attachments arrive as base64url text wrapping a zip archive that holds a
//! single CSV. Senders reuse the same member name in every archive, so the
//! member is written under a name derived from the attachment id and the
//! extraction time instead:
//!
//! ```text
//! <first 10 chars of attachment id>_<YYYYMMDDTHHMMSSffffff>.csv
//! ```
//!
//! Extraction times handed out by one [`AttachmentDecoder`] are strictly
//! increasing at microsecond resolution, so two attachments whose ids share a
//! 10-character prefix still get distinct names.

use crate::error::DecodeError;
use crate::workspace::{ExtractedFile, ExtractionWorkspace, EXTRACTED_EXTENSION};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::ZipArchive;

/// Number of attachment id characters kept in the file name.
pub const ID_PREFIX_LEN: usize = 10;

/// Timestamp layout used in extracted file names (UTC, microseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%6f";

/// base64url that accepts payloads with or without trailing padding
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64url payload, ignoring embedded whitespace
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(URL_SAFE_LENIENT.decode(compact.as_bytes())?)
}

/// Collision-proof file name for an attachment extracted at `at`
pub fn extracted_file_name(attachment_id: &str, at: DateTime<Utc>) -> String {
    let prefix: String = attachment_id
        .chars()
        .take(ID_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "{}_{}.{}",
        prefix,
        at.format(TIMESTAMP_FORMAT),
        EXTRACTED_EXTENSION
    )
}

/// Unpacks attachment payloads into the run's workspace
#[derive(Debug, Default)]
pub struct AttachmentDecoder {
    last_stamp_micros: Option<i64>,
}

impl AttachmentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `payload`, unzip its single member, and store it under the
    /// deterministic name
    pub fn decode_and_extract(
        &mut self,
        payload: &str,
        attachment_id: &str,
        workspace: &mut ExtractionWorkspace,
    ) -> Result<ExtractedFile, DecodeError> {
        self.decode_and_extract_at(payload, attachment_id, workspace, Utc::now())
    }

    /// [`decode_and_extract`](Self::decode_and_extract) with an explicit clock reading
    pub fn decode_and_extract_at(
        &mut self,
        payload: &str,
        attachment_id: &str,
        workspace: &mut ExtractionWorkspace,
        now: DateTime<Utc>,
    ) -> Result<ExtractedFile, DecodeError> {
        info!(attachment = %short_id(attachment_id), "Decoding attachment");

        let bytes = decode_payload(payload)?;
        debug!(bytes = bytes.len(), "Decoded payload");

        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let mut members = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index(i)?;
            if !entry.is_dir() {
                members.push(i);
            }
        }
        let index = match members.as_slice() {
            [only] => *only,
            other => return Err(DecodeError::UnexpectedMemberCount(other.len())),
        };

        let extracted_at = self.next_stamp(now);
        let final_path = workspace
            .root()
            .join(extracted_file_name(attachment_id, extracted_at));
        if final_path.exists() {
            return Err(DecodeError::NameCollision(final_path));
        }

        let mut entry = archive.by_index(index)?;
        debug!(member = %entry.name(), size = entry.size(), "Extracting archive member");

        let part_path = final_path.with_extension(format!("{EXTRACTED_EXTENSION}.part"));
        if let Err(source) = write_member(&mut entry, &part_path) {
            let _ = fs::remove_file(&part_path);
            return Err(DecodeError::Extract {
                path: part_path,
                source,
            });
        }
        if let Err(source) = fs::rename(&part_path, &final_path) {
            let _ = fs::remove_file(&part_path);
            return Err(DecodeError::Extract {
                path: final_path,
                source,
            });
        }

        let file = ExtractedFile {
            source_attachment_id: attachment_id.to_string(),
            disk_path: final_path,
            extracted_at,
        };
        info!(path = %file.disk_path.display(), "Extraction complete");
        workspace.register(file.clone());

        Ok(file)
    }

    fn next_stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let micros = match (now.timestamp_micros(), self.last_stamp_micros) {
            (current, Some(last)) if current <= last => last + 1,
            (current, _) => current,
        };
        self.last_stamp_micros = Some(micros);
        DateTime::from_timestamp_micros(micros).unwrap_or(now)
    }
}

fn write_member(entry: &mut impl io::Read, path: &Path) -> io::Result<()> {
    let mut out = File::create(path)?;
    io::copy(entry, &mut out)?;
    out.flush()?;
    out.sync_all()
}

fn short_id(id: &str) -> String {
    id.chars().take(ID_PREFIX_LEN).collect()
}
