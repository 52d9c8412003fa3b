use super::token::TokenManager;
use super::{describe_transport_error, Endpoints, TrackSource};
use crate::error::{AuthError, FetchError};
use crate::models::{AccessToken, TrackState};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct CurrentlyPlaying {
    is_playing: Option<bool>,
    progress_ms: Option<u64>,
    item: Option<PlayingItem>,
}

#[derive(Deserialize)]
struct PlayingItem {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    artists: Vec<ArtistRef>,
    album: Option<AlbumRef>,
    duration_ms: Option<u64>,
    external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize)]
struct ArtistRef {
    name: Option<String>,
}

#[derive(Deserialize)]
struct AlbumRef {
    name: Option<String>,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

enum Query {
    Track(TrackState),
    Unauthorized,
}

/// Queries `/me/player/currently-playing` for the linked account.
pub struct NowPlayingClient {
    client: Client,
    url: String,
    tokens: TokenManager,
}

impl NowPlayingClient {
    pub fn new(client: Client, endpoints: &Endpoints, tokens: TokenManager) -> Self {
        Self {
            client,
            url: endpoints.currently_playing_url(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Fetch the current player state. A 401 invalidates the cached token and
    /// retries exactly once with a refreshed one.
    pub async fn fetch(&self) -> Result<TrackState, FetchError> {
        let token = self.tokens.get_valid_access_token().await?;
        match self.query(&token).await? {
            Query::Track(t) => Ok(t),
            Query::Unauthorized => {
                warn!("Got 401 from currently-playing; forcing token refresh");
                self.tokens.invalidate(&token).await;
                let token2 = self.tokens.get_valid_access_token().await?;
                match self.query(&token2).await? {
                    Query::Track(t) => Ok(t),
                    Query::Unauthorized => Err(FetchError::Auth(AuthError::AccessTokenRejected)),
                }
            }
        }
    }

    async fn query(&self, token: &AccessToken) -> Result<Query, FetchError> {
        let resp = self
            .client
            .get(&self.url)
            .header(AUTHORIZATION, token.bearer())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transient(describe_transport_error(&e)))?;
        let status = resp.status();
        match status {
            StatusCode::NO_CONTENT => {
                debug!("currently-playing: nothing playing");
                Ok(Query::Track(TrackState::nothing_playing()))
            }
            StatusCode::OK => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| FetchError::Transient(describe_transport_error(&e)))?;
                // The API occasionally answers 200 with an empty body when idle.
                if body.trim().is_empty() {
                    return Ok(Query::Track(TrackState::nothing_playing()));
                }
                parse_track(&body).map(Query::Track)
            }
            StatusCode::UNAUTHORIZED => Ok(Query::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = retry_after(resp.headers());
                warn!("currently-playing rate limited: retry_after={:?}", retry_after);
                Err(FetchError::RateLimited { retry_after })
            }
            other => {
                let txt = resp.text().await.unwrap_or_default();
                Err(FetchError::Transient(format!(
                    "currently-playing returned {} => {}",
                    other, txt
                )))
            }
        }
    }
}

#[async_trait]
impl TrackSource for NowPlayingClient {
    async fn fetch(&self) -> Result<TrackState, FetchError> {
        NowPlayingClient::fetch(self).await
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub(crate) fn parse_track(body: &str) -> Result<TrackState, FetchError> {
    let cp: CurrentlyPlaying =
        serde_json::from_str(body).map_err(|e| FetchError::MalformedResponse(e.to_string()))?;
    let is_playing = cp
        .is_playing
        .ok_or_else(|| FetchError::MalformedResponse("missing is_playing".into()))?;
    let item = cp
        .item
        .ok_or_else(|| FetchError::MalformedResponse("missing item".into()))?;
    let track_id = item
        .id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FetchError::MalformedResponse("missing item.id".into()))?;
    let track_name = item
        .name
        .ok_or_else(|| FetchError::MalformedResponse("missing item.name".into()))?;
    let artists: Vec<String> = item.artists.into_iter().filter_map(|a| a.name).collect();
    let artist_name = artists
        .first()
        .cloned()
        .ok_or_else(|| FetchError::MalformedResponse("missing item.artists[0].name".into()))?;

    Ok(TrackState {
        track_id,
        track_name,
        artist_name,
        is_playing,
        artists,
        album_name: item.album.and_then(|a| a.name),
        progress_ms: cp.progress_ms,
        duration_ms: item.duration_ms,
        url: item.external_urls.and_then(|u| u.spotify),
    })
}
