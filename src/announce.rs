use crate::api::TrackSource;
use crate::error::FetchError;
use crate::models::TrackState;
use crate::retry::{fetch_with_backoff, BackoffPolicy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Remembers the last announced track so the same track is never announced
/// twice in a row. Play/pause transitions are not announcements.
#[derive(Debug, Default, Clone)]
pub struct DedupState {
    last_announced_track_id: Option<String>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_announced(&self) -> Option<&str> {
        self.last_announced_track_id.as_deref()
    }

    /// True (and records the track) iff `track` is playing and differs from the
    /// last announced one. Nothing playing leaves the state untouched, so a
    /// resumed track is not announced again.
    pub fn should_announce(&mut self, track: &TrackState) -> bool {
        if !track.is_playing || track.track_id.is_empty() {
            return false;
        }
        if self.last_announced_track_id.as_deref() == Some(track.track_id.as_str()) {
            return false;
        }
        self.last_announced_track_id = Some(track.track_id.clone());
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    New(TrackState),
    AlreadyAnnounced(TrackState),
    NothingPlaying,
    /// A poll started later already reported a newer player state.
    Superseded,
}

#[derive(Debug, Default)]
struct Observed {
    dedup: DedupState,
    last_seq: u64,
}

/// Fetch + dedup. The single owner of the dedup state: every trigger (chat
/// command or poller) goes through `poll`. Each poll is numbered when it
/// starts and a result is dropped once a later-started poll has been applied,
/// so a slow response cannot announce a track the player has already left.
pub struct NowPlayingService {
    source: Arc<dyn TrackSource>,
    backoff: BackoffPolicy,
    next_seq: AtomicU64,
    observed: Mutex<Observed>,
}

impl NowPlayingService {
    pub fn new(source: Arc<dyn TrackSource>, backoff: BackoffPolicy) -> Self {
        Self {
            source,
            backoff,
            next_seq: AtomicU64::new(1),
            observed: Mutex::new(Observed::default()),
        }
    }

    pub async fn poll(&self) -> Result<Announcement, FetchError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let track = fetch_with_backoff(self.source.as_ref(), &self.backoff).await?;

        let mut observed = self.observed.lock().await;
        if seq < observed.last_seq {
            debug!(seq, latest = observed.last_seq, "dropping out-of-order player state");
            return Ok(Announcement::Superseded);
        }
        observed.last_seq = seq;
        if !track.is_playing {
            debug!("nothing playing");
            return Ok(Announcement::NothingPlaying);
        }
        if observed.dedup.should_announce(&track) {
            info!(track_id = %track.track_id, track = %track.track_name, "new track");
            Ok(Announcement::New(track))
        } else {
            debug!(track_id = %track.track_id, "track already announced");
            Ok(Announcement::AlreadyAnnounced(track))
        }
    }

    pub async fn last_announced(&self) -> Option<String> {
        self.observed
            .lock()
            .await
            .dedup
            .last_announced()
            .map(str::to_string)
    }
}
