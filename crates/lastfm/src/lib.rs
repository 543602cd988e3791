use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scrobble_presence_core::{Credentials, TrackEvent};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

pub mod api;
mod stream;

pub use api::{ApiError, LastFmClient};
pub use stream::NowPlayingTracker;

const EVENT_BUFFER: usize = 16;

/// A live now-playing feed for one user. Dropping it stops the feed.
pub struct Subscription {
    pub events: mpsc::Receiver<TrackEvent>,
    pub stop: StopHandle,
}

#[derive(Debug, Default)]
pub struct StopHandle(Option<AbortHandle>);

impl StopHandle {
    pub fn new(handle: AbortHandle) -> Self {
        Self(Some(handle))
    }

    /// Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
pub trait TrackSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn subscribe(&self, credentials: &Credentials) -> Subscription;
    async fn lookup_play_count(&self, artist: &str, title: &str, username: &str)
        -> Result<Option<u32>>;
}

pub struct LastFmSource {
    http: reqwest::Client,
    poll_every: Duration,
    client: Mutex<Option<LastFmClient>>,
}

impl LastFmSource {
    pub fn new(poll_every: Duration) -> Result<Self> {
        Ok(Self {
            http: api::http_client()?,
            poll_every,
            client: Mutex::new(None),
        })
    }

    pub fn client(&self, api_key: &str) -> LastFmClient {
        LastFmClient::new(self.http.clone(), api_key)
    }

    fn active_client(&self) -> Option<LastFmClient> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TrackSource for LastFmSource {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    fn subscribe(&self, credentials: &Credentials) -> Subscription {
        let client = self.client(&credentials.api_key);
        *self.client.lock().unwrap_or_else(PoisonError::into_inner) = Some(client.clone());

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(stream::run_stream(
            client,
            credentials.username.clone(),
            self.poll_every,
            tx,
        ));
        Subscription {
            events: rx,
            stop: StopHandle::new(task.abort_handle()),
        }
    }

    async fn lookup_play_count(
        &self,
        artist: &str,
        title: &str,
        username: &str,
    ) -> Result<Option<u32>> {
        let client = self
            .active_client()
            .ok_or_else(|| anyhow!("no last.fm subscription is active"))?;
        Ok(client.user_play_count(artist, title, username).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::StopHandle;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_handle_is_idempotent() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let mut handle = StopHandle::new(task.abort_handle());

        handle.stop();
        handle.stop();

        let joined = task.await;
        assert!(joined.unwrap_err().is_cancelled());
        StopHandle::default().stop();
    }
}
