pub mod auth;
pub mod now_playing;
pub mod token;

use crate::error::FetchError;
use crate::models::TrackState;
use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::time::Duration;

pub const DEFAULT_AUTH_BASE: &str = "https://accounts.spotify.com";
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// Source of "what is playing right now". NowPlayingClient is the real one;
/// the command and poller layers only see this trait.
#[async_trait::async_trait]
pub trait TrackSource: Send + Sync {
    async fn fetch(&self) -> Result<TrackState, FetchError>;
}

/// Base URLs for the accounts service and the Web API.
/// Both may be overridden by SPOTIFY_AUTH_BASE and SPOTIFY_API_BASE env vars (useful for tests).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth_base: String,
    pub api_base: String,
}

impl Endpoints {
    pub fn new(auth_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            auth_base: auth_base.into().trim_end_matches('/').to_string(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            env::var("SPOTIFY_AUTH_BASE").unwrap_or_else(|_| DEFAULT_AUTH_BASE.into()),
            // include v1 path by default
            env::var("SPOTIFY_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into()),
        )
    }

    pub fn token_url(&self) -> String {
        format!("{}/api/token", self.auth_base)
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.auth_base)
    }

    pub fn currently_playing_url(&self) -> String {
        format!("{}/me/player/currently-playing", self.api_base)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_AUTH_BASE, DEFAULT_API_BASE)
    }
}

/// Every request made through this client (token refresh and API calls) is
/// bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()?;
    Ok(client)
}

pub(crate) fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timed out: {}", e)
    } else {
        e.to_string()
    }
}

/// RFC 6749 error body: `{"error": "...", "error_description": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorBody {
    pub fn describe(&self) -> String {
        match &self.error_description {
            Some(d) if !d.is_empty() => format!("{}: {}", self.error, d),
            _ => self.error.clone(),
        }
    }
}

pub(crate) fn parse_oauth_error(body: &str) -> Option<OAuthErrorBody> {
    serde_json::from_str(body).ok()
}
