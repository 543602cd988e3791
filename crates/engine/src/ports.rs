//! Seams between the session controller and the outside world.

use crate::payload::PresencePayload;
use crate::session::Notification;
use anyhow::Result;
use async_trait::async_trait;
use scrobble_presence_core::{Config, Credentials, IdentityKey};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Ready,
    Disconnected,
    /// The connection attempt failed; the transport may keep retrying.
    Failed(String),
}

pub struct TransportHandle {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub link: Box<dyn PresenceLink>,
}

pub trait PresenceTransport: Send + Sync {
    fn connect(&self, identity: IdentityKey) -> TransportHandle;
}

#[async_trait]
pub trait PresenceLink: Send + Sync {
    async fn publish(&mut self, payload: &PresencePayload) -> Result<()>;
    async fn clear(&mut self) -> Result<()>;
    /// Must tolerate an already dead connection.
    async fn disconnect(&mut self);
}

pub trait UiSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

pub trait ConfigStore: Send + Sync {
    fn read(&self) -> Result<Config>;
    fn write(&self, config: &Config) -> Result<()>;
}

pub trait CredentialStore: Send + Sync {
    fn read(&self) -> Result<Credentials>;
    fn write(&self, credentials: &Credentials) -> Result<()>;
}

/// Registers the app to start with the user session.
pub trait Autostart: Send + Sync {
    fn apply(&self, enabled: bool, hidden: bool) -> Result<()>;
}
