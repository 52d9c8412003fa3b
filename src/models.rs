use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The linked account's OAuth client plus its long-lived refresh token.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Upper bound accepted for a token endpoint's `expires_in` (ten years).
pub const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Short-lived bearer credential. Replaced wholesale on every refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Token expiring `expires_in` seconds from now, as reported by the token endpoint.
    /// `None` when the lifetime is negative or too large to be a real token.
    pub fn expiring_in(value: impl Into<String>, expires_in: i64) -> Option<Self> {
        if !(0..=MAX_TOKEN_LIFETIME_SECS).contains(&expires_in) {
            return None;
        }
        let expires_at = Utc::now().checked_add_signed(Duration::seconds(expires_in))?;
        Some(Self::new(value, expires_at))
    }

    /// A token is usable iff `now < expires_at - margin`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now < self.expires_at - margin
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.value)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Snapshot of the player as returned by one currently-playing query.
///
/// `track_id`, `track_name`, `artist_name` and `is_playing` are the fields the
/// dedup logic cares about; the rest only feed the announcement text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackState {
    pub track_id: String,
    pub track_name: String,
    /// First listed artist.
    pub artist_name: String,
    pub is_playing: bool,
    pub artists: Vec<String>,
    pub album_name: Option<String>,
    pub progress_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub url: Option<String>,
}

impl TrackState {
    pub fn nothing_playing() -> Self {
        Self::default()
    }
}
