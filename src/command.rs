use crate::announce::{Announcement, NowPlayingService};
use crate::format::format_announcement;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const TRY_AGAIN_LATER: &str = "Spotify is not answering right now, try again later.";
pub const NEEDS_REAUTHORIZATION: &str =
    "The Spotify link needs to be re-authorized by the bot operator.";

/// Sink for chat messages (a channel on whatever chat network the bot is on).
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NowPlaying,
}

impl Command {
    /// Match the first word of `line` against `triggers` (case-insensitive).
    /// Anything after the trigger is ignored.
    pub fn parse(line: &str, triggers: &[String]) -> Option<Command> {
        let first = line.split_whitespace().next()?;
        triggers
            .iter()
            .any(|t| t.eq_ignore_ascii_case(first))
            .then_some(Command::NowPlaying)
    }
}

pub struct CommandHandler {
    service: Arc<NowPlayingService>,
    publisher: Arc<dyn Publisher>,
    triggers: Vec<String>,
}

impl CommandHandler {
    pub fn new(
        service: Arc<NowPlayingService>,
        publisher: Arc<dyn Publisher>,
        triggers: Vec<String>,
    ) -> Self {
        Self {
            service,
            publisher,
            triggers,
        }
    }

    /// Handle one chat line. Returns the message published in reply, if any.
    pub async fn handle(&self, channel: &str, line: &str) -> Result<Option<String>> {
        let Some(Command::NowPlaying) = Command::parse(line, &self.triggers) else {
            return Ok(None);
        };
        let reply = match self.service.poll().await {
            Ok(Announcement::New(track)) => Some(format_announcement(&track)),
            Ok(Announcement::AlreadyAnnounced(track)) => {
                debug!(track_id = %track.track_id, "suppressing repeat announcement");
                None
            }
            Ok(Announcement::NothingPlaying) => {
                debug!("no track currently playing");
                None
            }
            Ok(Announcement::Superseded) => None,
            Err(e) if e.needs_operator() => {
                error!(error = %e, "Spotify authorization is broken; run `auth` to re-link the account");
                Some(NEEDS_REAUTHORIZATION.to_string())
            }
            Err(e) => {
                warn!(error = %e, "couldn't get current track");
                Some(TRY_AGAIN_LATER.to_string())
            }
        };
        if let Some(msg) = &reply {
            self.publisher.publish(channel, msg).await?;
        }
        Ok(reply)
    }
}
