use mockito::{Server, ServerGuard};
use serde_json::json;
use spotify_now_playing::announce::{Announcement, NowPlayingService};
use spotify_now_playing::api::now_playing::NowPlayingClient;
use spotify_now_playing::api::token::TokenManager;
use spotify_now_playing::api::{http_client, Endpoints, TrackSource};
use spotify_now_playing::error::{AuthError, FetchError};
use spotify_now_playing::models::{AccessToken, Credentials, TrackState};
use spotify_now_playing::retry::BackoffPolicy;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

const CURRENTLY_PLAYING: &str = "/me/player/currently-playing";

fn client(server: &ServerGuard) -> NowPlayingClient {
    let endpoints = Endpoints::new(server.url(), server.url());
    let http = http_client(Duration::from_secs(5)).expect("client");
    let tokens = TokenManager::new(
        http.clone(),
        &endpoints,
        Credentials {
            client_id: "test_id".into(),
            client_secret: "test_secret".into(),
            refresh_token: "refresh-1".into(),
        },
    );
    NowPlayingClient::new(http, &endpoints, tokens)
}

fn song_a() -> String {
    json!({
        "is_playing": true,
        "item": {"id": "abc", "name": "Song A", "artists": [{"name": "Artist X"}]}
    })
    .to_string()
}

fn expected_song_a() -> TrackState {
    TrackState {
        track_id: "abc".into(),
        track_name: "Song A".into(),
        artist_name: "Artist X".into(),
        is_playing: true,
        artists: vec!["Artist X".into()],
        ..TrackState::default()
    }
}

#[test]
fn no_content_means_nothing_playing() {
    let mut server = Server::new();
    let token = server.mock("POST", "/api/token").expect(0).create();
    let _cp = server
        .mock("GET", CURRENTLY_PLAYING)
        .match_header("authorization", "Bearer valid")
        .with_status(204)
        .create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let state = rt.block_on(async {
        np.tokens().prime(AccessToken::expiring_in("valid", 3600).unwrap()).await;
        np.fetch().await
    });
    let state = state.expect("204 is not an error");
    assert!(!state.is_playing);
    assert_eq!(state, TrackState::nothing_playing());
    token.assert();
}

#[test]
fn first_fetch_refreshes_then_reuses_token_and_dedups() {
    let mut server = Server::new();
    let token = server
        .mock("POST", "/api/token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"access_token": "fresh", "expires_in": 3600}).to_string())
        .expect(1)
        .create();
    let cp = server
        .mock("GET", CURRENTLY_PLAYING)
        .match_header("authorization", "Bearer fresh")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(song_a())
        .expect(2)
        .create();

    let source: Arc<dyn TrackSource> = Arc::new(client(&server));
    let service = NowPlayingService::new(source, BackoffPolicy::none());
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let (first, second) = rt.block_on(async {
        let first = service.poll().await.expect("first");
        let second = service.poll().await.expect("second");
        (first, second)
    });
    assert_eq!(first, Announcement::New(expected_song_a()));
    assert_eq!(second, Announcement::AlreadyAnnounced(expected_song_a()));
    token.assert();
    cp.assert();
}

#[test]
fn single_401_forces_refresh_and_retries_once() {
    let mut server = Server::new();
    let token = server
        .mock("POST", "/api/token")
        .with_status(200)
        .with_body(json!({"access_token": "fresh", "expires_in": 3600}).to_string())
        .expect(1)
        .create();
    let rejected = server
        .mock("GET", CURRENTLY_PLAYING)
        .match_header("authorization", "Bearer stale")
        .with_status(401)
        .with_body(json!({"error": {"status": 401, "message": "The access token expired"}}).to_string())
        .expect(1)
        .create();
    let accepted = server
        .mock("GET", CURRENTLY_PLAYING)
        .match_header("authorization", "Bearer fresh")
        .with_status(200)
        .with_body(song_a())
        .expect(1)
        .create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    rt.block_on(async {
        // looks valid locally, but the API disagrees
        np.tokens().prime(AccessToken::expiring_in("stale", 3600).unwrap()).await;
        let state = np.fetch().await.expect("retry succeeds");
        assert_eq!(state, expected_song_a());
        assert_eq!(np.tokens().cached_token().await.map(|t| t.value), Some("fresh".to_string()));
    });
    token.assert();
    rejected.assert();
    accepted.assert();
}

#[test]
fn second_401_is_an_auth_error() {
    let mut server = Server::new();
    let token = server
        .mock("POST", "/api/token")
        .with_status(200)
        .with_body(json!({"access_token": "fresh", "expires_in": 3600}).to_string())
        .expect(1)
        .create();
    let cp = server
        .mock("GET", CURRENTLY_PLAYING)
        .with_status(401)
        .expect(2)
        .create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(async {
        np.tokens().prime(AccessToken::expiring_in("stale", 3600).unwrap()).await;
        np.fetch().await
    });
    assert_eq!(res, Err(FetchError::Auth(AuthError::AccessTokenRejected)));
    token.assert();
    cp.assert();
}

#[test]
fn rate_limit_reports_retry_after() {
    let mut server = Server::new();
    let _cp = server
        .mock("GET", CURRENTLY_PLAYING)
        .with_status(429)
        .with_header("retry-after", "5")
        .create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(async {
        np.tokens().prime(AccessToken::expiring_in("valid", 3600).unwrap()).await;
        np.fetch().await
    });
    assert_eq!(
        res,
        Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(5))
        })
    );
}

#[test]
fn server_error_is_transient() {
    let mut server = Server::new();
    let _cp = server
        .mock("GET", CURRENTLY_PLAYING)
        .with_status(502)
        .with_body("bad gateway")
        .create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(async {
        np.tokens().prime(AccessToken::expiring_in("valid", 3600).unwrap()).await;
        np.fetch().await
    });
    assert!(matches!(res, Err(FetchError::Transient(_))), "got {:?}", res);
}

#[test]
fn missing_item_is_malformed() {
    let mut server = Server::new();
    let _cp = server
        .mock("GET", CURRENTLY_PLAYING)
        .with_status(200)
        .with_body(json!({"is_playing": true, "currently_playing_type": "ad", "item": null}).to_string())
        .create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(async {
        np.tokens().prime(AccessToken::expiring_in("valid", 3600).unwrap()).await;
        np.fetch().await
    });
    assert!(matches!(res, Err(FetchError::MalformedResponse(_))), "got {:?}", res);
}

#[test]
fn revoked_refresh_token_surfaces_as_auth_error() {
    let mut server = Server::new();
    let _token = server
        .mock("POST", "/api/token")
        .with_status(400)
        .with_body(json!({"error": "invalid_grant"}).to_string())
        .create();
    let cp = server.mock("GET", CURRENTLY_PLAYING).expect(0).create();

    let np = client(&server);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let err = rt.block_on(np.fetch()).unwrap_err();
    assert!(matches!(err, FetchError::Auth(AuthError::RefreshTokenInvalid(_))));
    assert!(err.needs_operator());
    cp.assert();
}

#[test]
fn hung_api_times_out_as_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let api_base = format!("http://{}", listener.local_addr().expect("addr"));
    std::thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            match stream {
                Ok(s) => held.push(s),
                Err(_) => break,
            }
        }
    });

    let endpoints = Endpoints::new("http://127.0.0.1:9", api_base);
    let http = http_client(Duration::from_millis(200)).expect("client");
    let tokens = TokenManager::new(
        http.clone(),
        &endpoints,
        Credentials {
            client_id: "test_id".into(),
            client_secret: "test_secret".into(),
            refresh_token: "refresh-1".into(),
        },
    );
    let np = NowPlayingClient::new(http, &endpoints, tokens);
    let rt = tokio::runtime::Runtime::new().expect("rt");
    let res = rt.block_on(async {
        np.tokens().prime(AccessToken::expiring_in("valid", 3600).unwrap()).await;
        np.fetch().await
    });
    match res {
        Err(FetchError::Transient(msg)) => assert!(msg.contains("timed out"), "got {}", msg),
        other => panic!("expected transient, got {:?}", other),
    }
}
