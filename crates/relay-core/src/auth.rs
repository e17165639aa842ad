//! Credential resolution for backend connectors.
//!
//! Bridges the async/sync boundary between the connector layer (async HTTP
//! calls) and request builders that want a synchronous read of the current
//! credential:
//!
//! 1. [`ApiKeyResolver::resolve`] runs from async context before each request,
//!    refreshing the credential if it is an OAuth token nearing expiry.
//! 2. [`ApiKeyResolver::current`] runs from sync context to read the most
//!    recently resolved value.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::ProxyError;

pub trait ApiKeyResolver: Send + Sync + std::fmt::Debug {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<(), ProxyError>> + Send + '_>>;
    fn current(&self) -> String;
}

/// A resolver returning a fixed credential (env var / static config key).
#[derive(Clone)]
pub struct StaticKeyResolver(String);

impl StaticKeyResolver {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl std::fmt::Debug for StaticKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeyResolver")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl ApiKeyResolver for StaticKeyResolver {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<(), ProxyError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn current(&self) -> String {
        self.0.clone()
    }
}

pub fn static_key(key: impl Into<String>) -> Arc<dyn ApiKeyResolver> {
    Arc::new(StaticKeyResolver::new(key))
}

/// On-disk OAuth credentials (6. Persisted state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Epoch milliseconds.
    pub expiry_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
}

impl OAuthCredentials {
    /// Refresh is triggered when `expiry_date - now <= 30s` (4.E).
    pub fn needs_refresh(&self, now_epoch_ms: i64) -> bool {
        self.expiry_date - now_epoch_ms <= 30_000
    }
}

/// A callback that exchanges a refresh token for a new access token against
/// one provider's OAuth endpoint.
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthCredentials, ProxyError>;
}

/// Loads, refreshes, and atomically persists one provider's OAuth credential
/// file. The process-level mutex serialises load/refresh/save (5. Locking);
/// the save itself is write-temp-then-rename to avoid torn files.
pub struct OAuthKeyResolver {
    path: PathBuf,
    refresher: Arc<dyn OAuthRefresher>,
    cached: RwLock<Option<OAuthCredentials>>,
    io_lock: AsyncMutex<()>,
}

impl std::fmt::Debug for OAuthKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthKeyResolver")
            .field("path", &self.path)
            .finish()
    }
}

impl OAuthKeyResolver {
    pub fn new(path: impl Into<PathBuf>, refresher: Arc<dyn OAuthRefresher>) -> Self {
        OAuthKeyResolver {
            path: path.into(),
            refresher,
            cached: RwLock::new(None),
            io_lock: AsyncMutex::new(()),
        }
    }

    fn load_from_disk(path: &Path) -> Result<OAuthCredentials, ProxyError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::AuthenticationFailed(format!("reading {path:?}: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ProxyError::AuthenticationFailed(format!("parsing {path:?}: {e}")))
    }

    /// Write-temp-then-rename so a concurrent reader never observes a
    /// partially-written credentials file.
    fn save_to_disk(path: &Path, creds: &OAuthCredentials) -> Result<(), ProxyError> {
        let tmp_path = path.with_extension("tmp");
        let body = serde_json::to_string_pretty(creds)?;
        std::fs::write(&tmp_path, body)
            .map_err(|e| ProxyError::AuthenticationFailed(format!("writing {tmp_path:?}: {e}")))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| ProxyError::AuthenticationFailed(format!("renaming into {path:?}: {e}")))
    }
}

impl ApiKeyResolver for OAuthKeyResolver {
    fn resolve(&self) -> Pin<Box<dyn Future<Output = Result<(), ProxyError>> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.io_lock.lock().await;
            let creds = {
                let cached = self.cached.read().unwrap().clone();
                match cached {
                    Some(c) => c,
                    None => Self::load_from_disk(&self.path)?,
                }
            };
            let now_ms = crate::session::now_epoch_secs() as i64 * 1000;
            let fresh = if creds.needs_refresh(now_ms) {
                let refreshed = self.refresher.refresh(&creds.refresh_token).await?;
                Self::save_to_disk(&self.path, &refreshed)?;
                refreshed
            } else {
                creds
            };
            *self.cached.write().unwrap() = Some(fresh);
            Ok(())
        })
    }

    fn current(&self) -> String {
        self.cached
            .read()
            .unwrap()
            .as_ref()
            .map(|c| c.access_token.clone())
            .unwrap_or_default()
    }
}
