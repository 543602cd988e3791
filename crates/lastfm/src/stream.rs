use crate::api::LastFmClient;
use scrobble_presence_core::{TrackEvent, TrackInfo};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

const MIN_POLL: Duration = Duration::from_secs(1);

/// Turns successive now-playing polls into start/stop edges.
#[derive(Debug, Default)]
pub struct NowPlayingTracker {
    last: Option<TrackInfo>,
}

impl NowPlayingTracker {
    pub fn observe(&mut self, now: Option<TrackInfo>) -> Option<TrackEvent> {
        match (self.last.as_ref(), now) {
            (Some(prev), Some(curr)) if prev.same_track(&curr) => None,
            (_, Some(curr)) => {
                self.last = Some(curr.clone());
                Some(TrackEvent::Started(curr))
            }
            (Some(_), None) => {
                self.last = None;
                Some(TrackEvent::Stopped)
            }
            (None, None) => None,
        }
    }
}

pub(crate) async fn run_stream(
    client: LastFmClient,
    username: String,
    poll_every: Duration,
    tx: mpsc::Sender<TrackEvent>,
) {
    let mut tracker = NowPlayingTracker::default();
    let mut ticker = tokio::time::interval(poll_every.max(MIN_POLL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let event = match client.now_playing(&username).await {
            Ok(now) => tracker.observe(now),
            Err(err) => {
                let kind = err.classify();
                let fatal = kind.is_user_error();
                if tx.send(TrackEvent::TransportError(kind)).await.is_err() {
                    return;
                }
                if fatal {
                    warn!(user = %username, error = %err, "last.fm rejected the credentials; stream stopped");
                    return;
                }
                debug!(error = %err, "last.fm poll failed");
                continue;
            }
        };

        if let Some(event) = event {
            debug!(?event, "now playing changed");
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}
