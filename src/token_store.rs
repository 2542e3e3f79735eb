use crate::config::TokenFile;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use time::OffsetDateTime;
use tracing::{info, warn};
use yup_oauth2::error::TokenStorageError;
use yup_oauth2::storage::{TokenInfo, TokenStorage};

/// Token storage backed by one account's token file. Refreshed access
/// tokens are written back so the next process start reuses them.
pub struct FileTokenStore {
    path: PathBuf,
    current: Mutex<TokenInfo>,
}

impl FileTokenStore {
    pub fn new(path: PathBuf, access_token: String, refresh_token: String, expires_at: Option<i64>) -> Self {
        // Unknown expiry counts as expired so the first call refreshes.
        let expires_at = expires_at
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        Self {
            path,
            current: Mutex::new(TokenInfo {
                access_token: Some(access_token).filter(|t| !t.is_empty()),
                refresh_token: Some(refresh_token),
                expires_at: Some(expires_at),
                id_token: None,
            }),
        }
    }
}

#[async_trait]
impl TokenStorage for FileTokenStore {
    async fn set(&self, _scopes: &[&str], token: TokenInfo) -> Result<(), TokenStorageError> {
        if let Some(access) = token.access_token.as_deref() {
            TokenFile::update_access_token(
                &self.path,
                access,
                token.expires_at.map(|t| t.unix_timestamp()),
            )
            .map_err(|e| TokenStorageError::Io(std::io::Error::other(e.to_string())))?;
            info!(path = %self.path.display(), "Persisted refreshed access token");
        }

        let mut current = self
            .current
            .lock()
            .map_err(|_| TokenStorageError::Io(std::io::Error::other("token lock poisoned")))?;
        let refresh_token = token.refresh_token.clone().or_else(|| current.refresh_token.take());
        *current = TokenInfo {
            refresh_token,
            ..token
        };
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        match self.current.lock() {
            Ok(current) => Some(current.clone()),
            Err(_) => {
                warn!(path = %self.path.display(), "Token lock poisoned");
                None
            }
        }
    }
}
