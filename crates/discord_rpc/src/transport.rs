use crate::client::DiscordRpcClient;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scrobble_presence_core::IdentityKey;
use scrobble_presence_engine::{
    PresenceLink, PresencePayload, PresenceTransport, TransportEvent, TransportHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const BACKOFF_STEPS: [Duration; 4] = [
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];
const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Publishes presence through the desktop Discord client.
#[derive(Debug, Default)]
pub struct DiscordTransport;

impl PresenceTransport for DiscordTransport {
    fn connect(&self, identity: IdentityKey) -> TransportHandle {
        let (tx, events) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let task = tokio::spawn(maintain(identity, Arc::clone(&shared), tx));
        TransportHandle {
            events,
            link: Box::new(DiscordLink { shared, task }),
        }
    }
}

struct Shared<C = DiscordRpcClient> {
    client: Mutex<Option<C>>,
    lost: Notify,
}

impl<C> Default for Shared<C> {
    fn default() -> Self {
        Self {
            client: Mutex::new(None),
            lost: Notify::new(),
        }
    }
}

enum Call<'a> {
    Set(&'a PresencePayload),
    Clear,
}

#[async_trait]
trait Rpc: Send {
    async fn call(&mut self, call: Call<'_>) -> Result<()>;
}

#[async_trait]
impl Rpc for DiscordRpcClient {
    async fn call(&mut self, call: Call<'_>) -> Result<()> {
        match call {
            Call::Set(payload) => self.set_activity(payload).await,
            Call::Clear => self.clear_activity().await,
        }
    }
}

/// Runs one request/response exchange. A failed or unanswered exchange leaves
/// the stream mid-conversation, so the connection is dropped and the maintain
/// loop reconnects.
async fn exchange<C: Rpc>(shared: &Shared<C>, call: Call<'_>, limit: Duration) -> Result<()> {
    let mut slot = shared.client.lock().await;
    let client = slot
        .as_mut()
        .ok_or_else(|| anyhow!("discord is not connected"))?;
    let result = match tokio::time::timeout(limit, client.call(call)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("discord did not answer within {limit:?}")),
    };
    if result.is_err() {
        *slot = None;
        shared.lost.notify_one();
    }
    result
}

/// Keeps one identity connected: retries with backoff until Discord answers,
/// reports ready, then waits for a failed exchange before reconnecting.
async fn maintain(
    identity: IdentityKey,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut backoff_idx = 0usize;
    let mut failure_reported = false;

    loop {
        match DiscordRpcClient::connect(identity.app_id()).await {
            Ok(client) => {
                info!(%identity, client_id = client.client_id(), "connected to discord");
                *shared.client.lock().await = Some(client);
                backoff_idx = 0;
                failure_reported = false;
                if events.send(TransportEvent::Ready).is_err() {
                    return;
                }
                shared.lost.notified().await;
                if events.send(TransportEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(err) => {
                if !failure_reported {
                    failure_reported = true;
                    if events.send(TransportEvent::Failed(err.to_string())).is_err() {
                        return;
                    }
                }
                let delay = BACKOFF_STEPS[backoff_idx.min(BACKOFF_STEPS.len() - 1)];
                backoff_idx = (backoff_idx + 1).min(BACKOFF_STEPS.len() - 1);
                debug!(error = %err, ?delay, "discord unavailable; retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

struct DiscordLink {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

#[async_trait]
impl PresenceLink for DiscordLink {
    async fn publish(&mut self, payload: &PresencePayload) -> Result<()> {
        exchange(&self.shared, Call::Set(payload), CALL_TIMEOUT).await
    }

    async fn clear(&mut self) -> Result<()> {
        exchange(&self.shared, Call::Clear, CALL_TIMEOUT).await
    }

    async fn disconnect(&mut self) {
        self.task.abort();
        let client = self.shared.client.lock().await.take();
        if let Some(client) = client {
            client.close().await;
            debug!("discord connection closed");
        }
    }
}

impl Drop for DiscordLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}
