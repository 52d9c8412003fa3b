use crate::models::Credentials;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// Where credentials live between runs. TokenManager only ever writes back a
/// rotated refresh token.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Credentials>;

    fn save_refresh_token(&self, refresh_token: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct CredentialFile {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// `spotify_credentials.json` plus an optional plain-text cache file that
/// holds just the refresh token.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    cache_path: Option<PathBuf>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, cache_path: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache_path,
        }
    }

    fn read_file(&self) -> Result<CredentialFile> {
        let s = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading credentials from {}", self.path.display()))?;
        let file: CredentialFile = serde_json::from_str(&s)
            .with_context(|| format!("parsing credentials in {}", self.path.display()))?;
        Ok(file)
    }

    /// Client id and secret only; the authorization flow needs these before a
    /// refresh token exists.
    pub fn load_client(&self) -> Result<(String, String)> {
        let file = self.read_file()?;
        if file.client_id.is_empty() || file.client_secret.is_empty() {
            return Err(anyhow!(
                "client_id and client_secret are required in {}",
                self.path.display()
            ));
        }
        Ok((file.client_id, file.client_secret))
    }

    fn read_cached_refresh_token(&self) -> Result<Option<String>> {
        let Some(cache) = &self.cache_path else {
            return Ok(None);
        };
        if !cache.exists() {
            return Ok(None);
        }
        let s = std::fs::read_to_string(cache)
            .with_context(|| format!("reading refresh token cache {}", cache.display()))?;
        let token = s.trim().to_string();
        Ok(if token.is_empty() { None } else { Some(token) })
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Credentials> {
        let file = self.read_file()?;
        let refresh_token = match file.refresh_token.filter(|t| !t.is_empty()) {
            Some(t) => t,
            None => {
                debug!("no refresh_token in credentials file, trying cache file");
                self.read_cached_refresh_token()?.unwrap_or_default()
            }
        };
        if file.client_id.is_empty() || file.client_secret.is_empty() || refresh_token.is_empty() {
            return Err(anyhow!(
                "missing required credentials in {} (need client_id, client_secret, refresh_token)",
                self.path.display()
            ));
        }
        Ok(Credentials {
            client_id: file.client_id,
            client_secret: file.client_secret,
            refresh_token,
        })
    }

    fn save_refresh_token(&self, refresh_token: &str) -> Result<()> {
        let s = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading credentials from {}", self.path.display()))?;
        let mut doc: serde_json::Value = serde_json::from_str(&s)?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| anyhow!("{} is not a JSON object", self.path.display()))?;

        // With a cache file the JSON only gets rewritten if it already holds the token.
        if self.cache_path.is_none() || obj.contains_key("refresh_token") {
            obj.insert(
                "refresh_token".into(),
                serde_json::Value::String(refresh_token.to_string()),
            );
            std::fs::write(&self.path, serde_json::to_string_pretty(&doc)?)
                .with_context(|| format!("writing credentials to {}", self.path.display()))?;
        }

        if let Some(cache) = &self.cache_path {
            std::fs::write(cache, refresh_token)
                .with_context(|| format!("writing refresh token cache {}", cache.display()))?;
        }
        info!(path = %self.path.display(), "refresh token saved");
        Ok(())
    }
}
