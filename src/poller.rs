use crate::announce::{Announcement, NowPlayingService};
use crate::command::Publisher;
use crate::format::format_announcement;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Poll the player every `interval` and publish new tracks to `channel` until
/// `shutdown` resolves. Shares the service (and therefore the dedup state and
/// token cache) with on-demand commands.
pub async fn run_poller<F>(
    service: Arc<NowPlayingService>,
    publisher: Arc<dyn Publisher>,
    channel: String,
    interval: Duration,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);
    info!(?interval, channel = %channel, "poller started");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("poller stopping");
                return;
            }
            _ = ticker.tick() => {
                match service.poll().await {
                    Ok(Announcement::New(track)) => {
                        let msg = format_announcement(&track);
                        if let Err(e) = publisher.publish(&channel, &msg).await {
                            warn!("publish failed: {:#}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) if e.needs_operator() => {
                        warn!(error = %e, "poller stopping: account must be re-authorized");
                        return;
                    }
                    Err(e) => warn!(error = %e, "poll failed"),
                }
            }
        }
    }
}
