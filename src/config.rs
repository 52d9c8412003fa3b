use crate::api::Endpoints;
use crate::retry::BackoffPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    /// Plain-text file holding only the refresh token; read when the
    /// credentials file has none, and rewritten on rotation.
    #[serde(default)]
    pub refresh_token_cache_path: Option<PathBuf>,
    /// When set, logs also go to a daily rotated file in this directory.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_safety_margin")]
    pub token_safety_margin_secs: u64,

    // Chat surface
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    // Authorization flow
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(default)]
    pub auth_base: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,

    #[serde(default = "default_backoff_attempts")]
    pub backoff_max_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

fn default_credentials_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("spotify-now-playing").join("spotify_credentials.json"))
        .unwrap_or_else(|| "spotify_credentials.json".into())
}
fn default_request_timeout() -> u64 { 10 }
fn default_safety_margin() -> u64 { 30 }
fn default_triggers() -> Vec<String> {
    vec!["+np".into(), "+playing".into()]
}
fn default_channel() -> String { "#music".into() }
fn default_poll_interval() -> u64 { 30 }
fn default_redirect_uri() -> String { "http://localhost:8080".into() }
fn default_scopes() -> String { "user-read-currently-playing".into() }
fn default_backoff_attempts() -> u32 { 3 }
fn default_backoff_initial_ms() -> u64 { 500 }
fn default_backoff_max_secs() -> u64 { 30 }

/// `<config_dir>/spotify-now-playing/config.toml`, the config file used when `--config` is absent.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("spotify-now-playing").join("config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            refresh_token_cache_path: None,
            log_dir: None,
            request_timeout_secs: default_request_timeout(),
            token_safety_margin_secs: default_safety_margin(),
            triggers: default_triggers(),
            channel: default_channel(),
            poll_interval_secs: default_poll_interval(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            auth_base: None,
            api_base: None,
            backoff_max_attempts: default_backoff_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_secs: default_backoff_max_secs(),
        }
    }
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.triggers.iter().all(|t| t.trim().is_empty()) {
            anyhow::bail!("at least one command trigger is required");
        }
        if self.backoff_max_attempts == 0 {
            anyhow::bail!("backoff_max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Config overrides win, then SPOTIFY_AUTH_BASE / SPOTIFY_API_BASE, then the real service.
    pub fn endpoints(&self) -> Endpoints {
        let env = Endpoints::from_env();
        Endpoints::new(
            self.auth_base.clone().unwrap_or(env.auth_base),
            self.api_base.clone().unwrap_or(env.api_base),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_safety_margin(&self) -> Duration {
        Duration::from_secs(self.token_safety_margin_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.backoff_max_attempts,
            initial_delay: Duration::from_millis(self.backoff_initial_ms),
            max_delay: Duration::from_secs(self.backoff_max_secs),
        }
    }
}
