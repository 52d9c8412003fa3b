use crate::api::TrackSource;
use crate::error::FetchError;
use crate::models::TrackState;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for retryable fetch failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): initial * 2^(retry-1), capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// How long to wait after `err` before the next attempt, or None to give up.
    fn next_delay(&self, err: &FetchError, retry: u32) -> Option<Duration> {
        if !err.is_retryable() || retry >= self.max_attempts {
            return None;
        }
        match err {
            // Honor Retry-After, but never wait past the cap.
            FetchError::RateLimited {
                retry_after: Some(after),
            } if *after > self.max_delay => None,
            FetchError::RateLimited {
                retry_after: Some(after),
            } => Some(*after),
            _ => Some(self.delay_for(retry)),
        }
    }
}

pub async fn fetch_with_backoff(
    source: &dyn TrackSource,
    policy: &BackoffPolicy,
) -> Result<TrackState, FetchError> {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match source.fetch().await {
            Ok(t) => return Ok(t),
            Err(e) => match policy.next_delay(&e, attempt) {
                Some(delay) => {
                    warn!(attempt, error = %e, ?delay, "fetch failed, backing off");
                    tokio::time::sleep(delay).await;
                }
                None => {
                    debug!(attempt, error = %e, "giving up on fetch");
                    return Err(e);
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<Result<TrackState, FetchError>>>);

    #[async_trait]
    impl TrackSource for Scripted {
        async fn fetch(&self) -> Result<TrackState, FetchError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn fast() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn delays_grow_and_cap() {
        let p = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3), Duration::from_millis(2000));
        assert_eq!(p.delay_for(4), Duration::from_secs(3));
        assert_eq!(p.delay_for(40), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let ok = TrackState {
            track_id: "abc".into(),
            is_playing: true,
            ..TrackState::default()
        };
        let src = Scripted(Mutex::new(vec![
            Err(FetchError::Transient("502".into())),
            Err(FetchError::RateLimited {
                retry_after: Some(Duration::from_millis(1)),
            }),
            Ok(ok.clone()),
        ]));
        assert_eq!(fetch_with_backoff(&src, &fast()).await.unwrap(), ok);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let src = Scripted(Mutex::new(vec![
            Err(FetchError::Transient("a".into())),
            Err(FetchError::Transient("b".into())),
            Err(FetchError::Transient("c".into())),
        ]));
        let err = fetch_with_backoff(&src, &fast()).await.unwrap_err();
        assert_eq!(err, FetchError::Transient("c".into()));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let src = Scripted(Mutex::new(vec![Err(FetchError::Auth(
            AuthError::RefreshTokenInvalid("invalid_grant".into()),
        ))]));
        let err = fetch_with_backoff(&src, &fast()).await.unwrap_err();
        assert!(err.needs_operator());
    }

    #[tokio::test]
    async fn long_retry_after_is_returned_to_caller() {
        let src = Scripted(Mutex::new(vec![Err(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(120)),
        })]));
        let err = fetch_with_backoff(&src, &fast()).await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { .. }));
    }
}
