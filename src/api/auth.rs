use super::now_playing::NowPlayingClient;
use super::token::TokenManager;
use super::{describe_transport_error, http_client, parse_oauth_error, Endpoints};
use crate::config::Config;
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::error::AuthError;
use crate::models::{AccessToken, Credentials};
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

/// Manual OAuth helper for (re-)linking the account:
/// 1. Build the Spotify authorization URL, print it and try to open a browser.
/// 2. The operator approves and gets redirected to the redirect URI (which may fail to load; that's fine).
/// 3. The operator pastes the full redirect URL back into the CLI.
/// 4. The `code` param is exchanged for an access_token + refresh_token.
/// 5. The refresh token is written to the credentials file.
///
/// This is also the only remedy for a revoked refresh token.
#[derive(Deserialize)]
struct CodeGrantResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

/// Tokens obtained from an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct Grant {
    pub access_token: AccessToken,
    pub refresh_token: String,
}

pub fn authorize_url(
    endpoints: &Endpoints,
    client_id: &str,
    redirect_uri: &str,
    scopes: &str,
) -> Result<Url> {
    let mut url = Url::parse(&endpoints.authorize_url())?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", scopes);
    Ok(url)
}

/// Pull the `code` query parameter out of a pasted redirect URL.
pub fn extract_code(redirect: &str) -> Result<String> {
    let parsed = Url::parse(redirect.trim()).map_err(|e| anyhow!("invalid url pasted: {}", e))?;
    if let Some((_, err)) = parsed.query_pairs().find(|(k, _)| k == "error") {
        return Err(anyhow!("authorization was denied: {}", err));
    }
    let code = parsed
        .query_pairs()
        .find(|(k, _)| k == "code")
        .ok_or_else(|| anyhow!("no code in redirect URL"))?
        .1
        .into_owned();
    Ok(code)
}

pub async fn exchange_code(
    client: &Client,
    endpoints: &Endpoints,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<Grant, AuthError> {
    let params = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    let resp = client
        .post(endpoints.token_url())
        .form(&params)
        .send()
        .await
        .map_err(|e| AuthError::Transient(describe_transport_error(&e)))?;
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        if status.is_client_error() {
            if let Some(err) = parse_oauth_error(&body) {
                return Err(match err.error.as_str() {
                    "invalid_client" | "unauthorized_client" => AuthError::InvalidClient(err.describe()),
                    // invalid_grant here means a stale or already used code
                    _ => AuthError::Transient(format!(
                        "authorization code rejected: {}; run `auth` again",
                        err.describe()
                    )),
                });
            }
        }
        return Err(AuthError::Transient(format!(
            "token exchange failed: {} => {}",
            status, body
        )));
    }
    let tr: CodeGrantResponse = serde_json::from_str(&body)
        .map_err(|e| AuthError::Transient(format!("unreadable token response: {}", e)))?;
    let refresh_token = tr
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::Transient("token response carried no refresh_token".into()))?;
    let access_token = AccessToken::expiring_in(tr.access_token, tr.expires_in).ok_or_else(|| {
        AuthError::Transient(format!("token response has out-of-range expires_in: {}", tr.expires_in))
    })?;
    Ok(Grant {
        access_token,
        refresh_token,
    })
}

pub async fn run_spotify_auth(cfg: &Config) -> Result<()> {
    use std::io;

    let store = FileCredentialStore::new(&cfg.credentials_path, cfg.refresh_token_cache_path.clone());
    let (client_id, client_secret) = store.load_client()?;
    let endpoints = cfg.endpoints();

    let url = authorize_url(&endpoints, &client_id, &cfg.redirect_uri, &cfg.scopes)?;
    println!(
        "Open this URL in your browser and authorize the application:\n\n{}\n",
        url
    );
    if webbrowser::open(url.as_str()).is_err() {
        warn!("could not open a browser automatically; copy the URL above");
    }
    println!("After authorizing, you'll be redirected to your redirect URI. Copy the full redirect URL and paste it here.");
    println!("Paste redirect URL:");
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let code = extract_code(&input)?;

    let client = http_client(cfg.request_timeout())?;
    let grant = exchange_code(
        &client,
        &endpoints,
        &client_id,
        &client_secret,
        &code,
        &cfg.redirect_uri,
    )
    .await
    .context("exchanging authorization code")?;

    let refresh_token = grant.refresh_token.clone();
    tokio::task::spawn_blocking(move || store.save_refresh_token(&refresh_token)).await??;

    info!("Spotify refresh token saved to {}", cfg.credentials_path.display());

    // Check the link with the access token we were just handed.
    let tokens = TokenManager::new(
        client.clone(),
        &endpoints,
        Credentials {
            client_id,
            client_secret,
            refresh_token: grant.refresh_token,
        },
    )
    .with_safety_margin(cfg.token_safety_margin());
    tokens.prime(grant.access_token).await;
    let np = NowPlayingClient::new(client, &endpoints, tokens);
    match np.fetch().await {
        Ok(state) if state.is_playing => {
            println!("Account linked. Currently playing: {} - {}", state.artist_name, state.track_name)
        }
        Ok(_) => println!("Account linked. Nothing is playing right now."),
        Err(e) => warn!("account linked, but the player check failed: {}", e),
    }
    Ok(())
}
