//! Session artifact loading and validation.
//!
//! The artifact is a storage-state JSON document produced out-of-band by an
//! interactive login. It is a precondition: a run never starts with a
//! missing, unreadable, or fully expired session.

use super::{cookie_header, Cookie};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Session artifact validation failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read session artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session artifact {path} is not valid storage state: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("session artifact {path} has no cookies for {host}")]
    NoPlatformCookies { path: PathBuf, host: String },

    #[error("every session cookie for {host} in {path} has expired")]
    Expired { path: PathBuf, host: String },
}

impl From<SessionError> for gs_common::Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired { path, .. } => gs_common::Error::SessionExpired {
                path: path.display().to_string(),
            },
            other => gs_common::Error::SessionInvalid(other.to_string()),
        }
    }
}

/// Storage-state document as written by the login helper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<serde_json::Value>,
}

/// Validated session artifact.
#[derive(Debug, Clone)]
pub struct SessionArtifact {
    path: PathBuf,
    host: String,
    state: StorageState,
}

impl SessionArtifact {
    /// Load and validate against the current time.
    pub fn load(path: &Path, host: &str) -> Result<Self, SessionError> {
        Self::load_at(path, host, now_unix())
    }

    pub fn load_at(path: &Path, host: &str, now_unix: f64) -> Result<Self, SessionError> {
        if !path.exists() {
            return Err(SessionError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| SessionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_at(&content, path, host, now_unix)
    }

    /// Validate an in-memory document. `path` is only used for messages.
    pub fn from_json_at(
        content: &str,
        path: &Path,
        host: &str,
        now_unix: f64,
    ) -> Result<Self, SessionError> {
        let state: StorageState =
            serde_json::from_str(content).map_err(|e| SessionError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let platform: Vec<&Cookie> = state
            .cookies
            .iter()
            .filter(|c| c.matches_host(host))
            .collect();
        if platform.is_empty() {
            return Err(SessionError::NoPlatformCookies {
                path: path.to_path_buf(),
                host: host.to_string(),
            });
        }
        if platform.iter().all(|c| c.is_expired(now_unix)) {
            return Err(SessionError::Expired {
                path: path.to_path_buf(),
                host: host.to_string(),
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            host: host.to_string(),
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.state.cookies
    }

    /// Non-expired cookies valid on the platform host.
    pub fn platform_cookies(&self) -> Vec<&Cookie> {
        let now = now_unix();
        self.state
            .cookies
            .iter()
            .filter(|c| c.matches_host(&self.host) && !c.is_expired(now))
            .collect()
    }

    /// Cookie header for authenticated direct fetches.
    pub fn cookie_header(&self) -> String {
        cookie_header(&self.state.cookies, &self.host, now_unix())
    }
}

fn now_unix() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
