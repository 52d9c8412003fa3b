use super::{describe_transport_error, parse_oauth_error, Endpoints};
use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::models::{AccessToken, Credentials};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(30);

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, AuthError>>>;

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    /// Starts as the loaded refresh token; replaced when the endpoint rotates it.
    refresh_token: String,
    current: Option<AccessToken>,
    in_flight: Option<RefreshFuture>,
}

/// Owns the OAuth credential state for the single linked account.
///
/// Cloning is cheap and every clone shares the same cache, so one instance can
/// be handed to both the on-demand command path and a poller. Refreshes are
/// single-flight: while one is running, other callers await the same future
/// instead of issuing their own.
#[derive(Clone)]
pub struct TokenManager {
    client: Client,
    token_url: String,
    credentials: Arc<Credentials>,
    safety_margin: chrono::Duration,
    store: Option<Arc<dyn CredentialStore>>,
    state: Arc<Mutex<TokenState>>,
}

impl TokenManager {
    pub fn new(client: Client, endpoints: &Endpoints, credentials: Credentials) -> Self {
        let state = TokenState {
            refresh_token: credentials.refresh_token.clone(),
            current: None,
            in_flight: None,
        };
        Self {
            client,
            token_url: endpoints.token_url(),
            credentials: Arc::new(credentials),
            safety_margin: to_chrono(DEFAULT_SAFETY_MARGIN),
            store: None,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = to_chrono(margin);
        self
    }

    /// Persist rotated refresh tokens through `store`.
    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Install a token obtained elsewhere (e.g. by the authorization-code exchange).
    pub async fn prime(&self, token: AccessToken) {
        self.state.lock().await.current = Some(token);
    }

    pub async fn cached_token(&self) -> Option<AccessToken> {
        self.state.lock().await.current.clone()
    }

    pub async fn current_refresh_token(&self) -> String {
        self.state.lock().await.refresh_token.clone()
    }

    /// Return the cached token if it is still valid, otherwise refresh it.
    /// A failed refresh is returned as-is; an expired token is never served.
    pub async fn get_valid_access_token(&self) -> Result<AccessToken, AuthError> {
        let refresh = {
            let mut state = self.state.lock().await;
            if let Some(tok) = &state.current {
                if tok.is_valid_at(Utc::now(), self.safety_margin) {
                    return Ok(tok.clone());
                }
            }
            match &state.in_flight {
                Some(fut) => {
                    debug!("joining in-flight Spotify token refresh");
                    fut.clone()
                }
                None => {
                    debug!("Spotify access token missing or near expiry, refreshing");
                    let fut = self.refresh_future(state.refresh_token.clone());
                    state.in_flight = Some(fut.clone());
                    fut
                }
            }
        };
        refresh.await
    }

    /// Drop the cached token after the API rejected it. Only clears the cache if
    /// it still holds `rejected`, so a token some other caller just refreshed
    /// survives.
    pub async fn invalidate(&self, rejected: &AccessToken) {
        let mut state = self.state.lock().await;
        if state.current.as_ref() == Some(rejected) {
            debug!("invalidating rejected Spotify access token");
            state.current = None;
        }
    }

    fn refresh_future(&self, refresh_token: String) -> RefreshFuture {
        let client = self.client.clone();
        let token_url = self.token_url.clone();
        let credentials = self.credentials.clone();
        let store = self.store.clone();
        let state = self.state.clone();
        async move {
            let outcome = exchange_refresh_token(&client, &token_url, &credentials, &refresh_token).await;
            let rotated = {
                let mut st = state.lock().await;
                st.in_flight = None;
                match &outcome {
                    Ok((token, rotated)) => {
                        st.current = Some(token.clone());
                        match rotated {
                            Some(new_rt) if *new_rt != st.refresh_token => {
                                st.refresh_token = new_rt.clone();
                                Some(new_rt.clone())
                            }
                            _ => None,
                        }
                    }
                    // Whatever was cached before stays as it was.
                    Err(_) => None,
                }
            };
            if let (Some(new_rt), Some(store)) = (rotated, store) {
                persist_refresh_token(store, new_rt).await;
            }
            outcome.map(|(token, _)| token)
        }
        .boxed()
        .shared()
    }
}

async fn exchange_refresh_token(
    client: &Client,
    token_url: &str,
    credentials: &Credentials,
    refresh_token: &str,
) -> Result<(AccessToken, Option<String>), AuthError> {
    let params = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
    ];
    let resp = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::Transient(describe_transport_error(&e)))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| AuthError::Transient(describe_transport_error(&e)))?;

    if !status.is_success() {
        let err = classify_refresh_failure(status, &body);
        warn!("Failed to refresh Spotify token: {}", err);
        return Err(err);
    }

    let parsed: RefreshResponse = serde_json::from_str(&body)
        .map_err(|e| AuthError::Transient(format!("unreadable token response: {}", e)))?;
    let token = AccessToken::expiring_in(parsed.access_token, parsed.expires_in).ok_or_else(|| {
        AuthError::Transient(format!(
            "token response has out-of-range expires_in: {}",
            parsed.expires_in
        ))
    })?;
    info!("Spotify access token refreshed (expires in {}s)", parsed.expires_in);
    Ok((token, parsed.refresh_token.filter(|t| !t.is_empty())))
}

fn classify_refresh_failure(status: reqwest::StatusCode, body: &str) -> AuthError {
    if status.is_client_error() {
        if let Some(err) = parse_oauth_error(body) {
            match err.error.as_str() {
                "invalid_grant" => return AuthError::RefreshTokenInvalid(err.describe()),
                "invalid_client" | "unauthorized_client" => {
                    return AuthError::InvalidClient(err.describe())
                }
                _ => {}
            }
        }
    }
    AuthError::Transient(format!("token endpoint returned {} - {}", status, body))
}

async fn persist_refresh_token(store: Arc<dyn CredentialStore>, refresh_token: String) {
    info!("Spotify rotated the refresh token; persisting it");
    match tokio::task::spawn_blocking(move || store.save_refresh_token(&refresh_token)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("failed to persist rotated refresh token: {:#}", e),
        Err(e) => warn!("refresh token persistence task failed: {}", e),
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn invalid_grant_is_not_transient() {
        let e = classify_refresh_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#,
        );
        assert!(matches!(e, AuthError::RefreshTokenInvalid(_)));
    }

    #[test]
    fn invalid_client_is_reported_separately() {
        let e = classify_refresh_failure(StatusCode::BAD_REQUEST, r#"{"error":"invalid_client"}"#);
        assert!(matches!(e, AuthError::InvalidClient(_)));
    }

    #[test]
    fn server_errors_are_transient() {
        let e = classify_refresh_failure(StatusCode::BAD_GATEWAY, r#"{"error":"invalid_grant"}"#);
        assert!(matches!(e, AuthError::Transient(_)));
        let e = classify_refresh_failure(StatusCode::BAD_REQUEST, "not json");
        assert!(matches!(e, AuthError::Transient(_)));
    }
}
