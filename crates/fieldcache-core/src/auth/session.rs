use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Refresh this long before the access token expires
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    /// Lifetime of `access_token` as granted by the auth endpoint
    pub expires_in_secs: i64,
}

impl SessionData {
    fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.expires_in_secs)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at()
    }

    /// Check if the session will expire soon and should be renewed
    pub fn needs_refresh(&self) -> bool {
        Utc::now() > self.expires_at() - Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES)
    }
}

/// Signed-in session, persisted next to the query cache.
pub struct Session {
    cache_dir: PathBuf,
    pub data: Option<SessionData>,
}

impl Session {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data: None,
        }
    }

    /// Load session from disk. Returns false when there is none or it expired.
    ///
    /// An expired session that carries a refresh token is kept so it can be
    /// renewed; it still counts as invalid until then.
    pub fn load(&mut self) -> Result<bool> {
        let path = self.session_path();
        if path.exists() {
            let contents =
                std::fs::read_to_string(&path).context("Failed to read session file")?;
            let data: SessionData =
                serde_json::from_str(&contents).context("Failed to parse session file")?;

            if !data.is_expired() || data.refresh_token.is_some() {
                self.data = Some(data);
            }
        }
        Ok(self.is_valid())
    }

    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = self.data {
            let path = self.session_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(data)?;
            std::fs::write(path, contents).context("Failed to write session file")?;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.data = None;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    pub fn update(&mut self, data: SessionData) {
        self.data = Some(data);
    }

    pub fn token(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.access_token.as_str())
    }

    /// Refresh token and email, when the session is due for renewal
    pub fn renewal(&self) -> Option<(&str, &str)> {
        let data = self.data.as_ref().filter(|d| d.needs_refresh())?;
        let refresh_token = data.refresh_token.as_deref()?;
        Some((refresh_token, data.email.as_str()))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.user_id.as_str())
    }

    pub fn is_valid(&self) -> bool {
        self.data.as_ref().map(|d| !d.is_expired()).unwrap_or(false)
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}
