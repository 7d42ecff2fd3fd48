//! Mail service credentials
//!
//! The access token is obtained out of band and persisted between runs. It
//! is loaded through [`CredentialStore`] and handed to the message source as
//! an explicit [`Credentials`] value.
//!
//! mailload never renews a token itself. Renewal belongs to whichever tool
//! issued the token; the refresh token is stored only so that tool can read
//! it back from the same file. After a renewal, store the new access token
//! with `mailload import-token`. A token close to expiry is accepted with a
//! warning so the operator can renew it before the next scheduled run.

use crate::error::{IngestError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Hours before expiry at which an accepted token starts drawing a warning
pub const EXPIRY_WARNING_HOURS: i64 = 12;

/// Bearer token for the mail service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Carried for the external renewal tool, never sent to the mail service
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn expires_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now + window)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Persistence for [`Credentials`]
pub trait CredentialStore {
    /// `Ok(None)` when nothing has been stored yet
    fn load(&self) -> Result<Option<Credentials>>;

    fn save(&self, credentials: &Credentials) -> Result<()>;
}

/// JSON token file
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credentials>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(IngestError::io(&self.path, e)),
        };

        serde_json::from_str(&text).map(Some).map_err(|e| {
            IngestError::auth(format!("token file {} is unreadable: {e}", self.path.display()))
        })
    }

    fn save(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(credentials)
            .map_err(|e| IngestError::auth(format!("cannot serialize token: {e}")))?;

        // Write then rename so a crash never leaves a truncated token
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| IngestError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| IngestError::io(&self.path, e))?;

        info!(path = %self.path.display(), "Credentials saved");
        Ok(())
    }
}

/// Load usable credentials or fail with an authentication error
pub fn authenticate(store: &dyn CredentialStore) -> Result<Credentials> {
    info!("Mail account authentication in progress");

    let credentials = store
        .load()?
        .ok_or_else(|| IngestError::auth("no stored credentials"))?;

    if credentials.access_token.trim().is_empty() {
        return Err(IngestError::auth("stored access token is empty"));
    }
    let now = Utc::now();
    if credentials.is_expired(now) {
        return Err(IngestError::auth(
            "stored access token has expired; renew it and run `mailload import-token`",
        ));
    }
    if credentials.expires_within(Duration::hours(EXPIRY_WARNING_HOURS), now) {
        warn!(
            expires_at = ?credentials.expires_at,
            "Stored access token expires soon; renew it and run `mailload import-token`"
        );
    }

    info!("Credentials found");
    Ok(credentials)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token(expires_at: Option<DateTime<Utc>>) -> Credentials {
        Credentials {
            access_token: "ya29.token".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_at,
        }
    }

    #[test]
    fn test_absent_file_loads_none() {
        let temp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp.path().join("token.json"));
        assert!(store.load().unwrap().is_none());
        assert!(matches!(authenticate(&store), Err(IngestError::Auth(_))));
    }

    #[test]
    fn test_save_then_authenticate() {
        let temp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp.path().join("secrets/token.json"));
        let creds = token(Some(Utc::now() + Duration::hours(1)));

        store.save(&creds).unwrap();
        assert_eq!(authenticate(&store).unwrap(), creds);
        assert!(!temp.path().join("secrets/token.tmp").exists());
    }

    #[test]
    fn test_expired_token_rejected() {
        let temp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp.path().join("token.json"));
        store.save(&token(Some(Utc::now() - Duration::minutes(5)))).unwrap();

        let err = authenticate(&store).unwrap_err();
        assert!(matches!(err, IngestError::Auth(msg) if msg.contains("expired")));
    }

    #[test]
    fn test_expiry_window() {
        let now = Utc::now();
        let soon = token(Some(now + Duration::hours(2)));
        assert!(!soon.is_expired(now));
        assert!(soon.expires_within(Duration::hours(EXPIRY_WARNING_HOURS), now));
        assert!(!soon.expires_within(Duration::hours(1), now));
        assert!(!token(None).expires_within(Duration::hours(EXPIRY_WARNING_HOURS), now));
    }

    #[test]
    fn test_token_near_expiry_still_authenticates() {
        let temp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp.path().join("token.json"));
        let creds = token(Some(Utc::now() + Duration::minutes(30)));
        store.save(&creds).unwrap();

        // Refresh token survives untouched for the renewal tool
        let loaded = authenticate(&store).unwrap();
        assert_eq!(loaded.refresh_token.as_deref(), Some("1//refresh"));
        let on_disk = std::fs::read_to_string(store.path()).unwrap();
        assert!(on_disk.contains("\"refresh_token\": \"1//refresh\""));
    }

    #[test]
    fn test_token_without_expiry_is_accepted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("token.json");
        std::fs::write(&path, r#"{"access_token": "abc"}"#).unwrap();

        let creds = authenticate(&FileCredentialStore::new(&path)).unwrap();
        assert_eq!(creds.access_token, "abc");
        assert!(creds.refresh_token.is_none());
    }

    #[test]
    fn test_garbage_file_is_auth_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileCredentialStore::new(&path).load(),
            Err(IngestError::Auth(_))
        ));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", token(None));
        assert!(!rendered.contains("ya29"));
        assert!(!rendered.contains("1//refresh"));
    }
}
