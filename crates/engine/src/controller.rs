use crate::payload::PresencePayload;
use crate::ports::{
    Autostart, ConfigStore, CredentialStore, PresenceLink, PresenceTransport, TransportHandle,
    UiSink,
};
use crate::session::{
    Command, ErrorKind, Input, Notification, Session, SessionSnapshot, UiError, REPUBLISH_INTERVAL,
};
use scrobble_presence_core::{Config, ConfigDraft, Credentials, IdentityKey};
use scrobble_presence_lastfm::{StopHandle, Subscription, TrackSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const LINK_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Collaborators {
    pub source: Arc<dyn TrackSource>,
    pub transport: Arc<dyn PresenceTransport>,
    pub config_store: Arc<dyn ConfigStore>,
    pub credential_store: Arc<dyn CredentialStore>,
    pub autostart: Arc<dyn Autostart>,
    pub ui: Arc<dyn UiSink>,
}

/// Cloneable front door to a running [`SessionController`]. Commands are
/// fire-and-forget; queries read the snapshot published after each transition.
#[derive(Clone)]
pub struct ControllerHandle {
    inputs: mpsc::UnboundedSender<Input>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl ControllerHandle {
    pub fn set_credentials(&self, credentials: Credentials) {
        self.send(Input::SetCredentials(credentials));
    }

    pub fn update_config(&self, draft: ConfigDraft) {
        self.send(Input::UpdateConfig(draft));
    }

    pub fn force_reconnect(&self) {
        self.send(Input::ForceReconnect);
    }

    pub fn shutdown(&self) {
        self.send(Input::Shutdown);
    }

    pub fn current_track(&self) -> Option<PresencePayload> {
        self.snapshot.borrow().current_track.clone()
    }

    pub fn config(&self) -> Config {
        self.snapshot.borrow().config.clone()
    }

    pub fn credentials(&self) -> Credentials {
        self.snapshot.borrow().credentials.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot.borrow().connected
    }

    pub fn known_identities(&self) -> Vec<(IdentityKey, &'static str)> {
        known_identities()
    }

    fn send(&self, input: Input) {
        if self.inputs.send(input).is_err() {
            warn!("session controller has stopped; command dropped");
        }
    }
}

pub fn known_identities() -> Vec<(IdentityKey, &'static str)> {
    IdentityKey::ALL
        .iter()
        .map(|key| (*key, key.display_name()))
        .collect()
}

struct ActiveSubscription {
    stop: StopHandle,
    forwarder: JoinHandle<()>,
}

struct ActiveLink {
    link: Box<dyn PresenceLink>,
    forwarder: JoinHandle<()>,
}

/// Owns the [`Session`] and performs its commands. All inputs, whether UI
/// commands, track events, timer ticks or transport events, go through one
/// channel and are applied one at a time.
pub struct SessionController {
    session: Session,
    parts: Collaborators,
    inputs: mpsc::UnboundedSender<Input>,
    subscription: Option<ActiveSubscription>,
    link: Option<ActiveLink>,
    timer: Option<JoinHandle<()>>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn spawn(parts: Collaborators) -> (ControllerHandle, JoinHandle<()>) {
        let config = parts.config_store.read().unwrap_or_else(|err| {
            warn!(error = %err, "could not read config; using defaults");
            Config::default()
        });
        let credentials = parts.credential_store.read().unwrap_or_else(|err| {
            warn!(error = %err, "could not read credentials");
            Credentials::default()
        });

        let session = Session::new(config, credentials);
        let (inputs, rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(session.snapshot());

        let controller = SessionController {
            session,
            parts,
            inputs: inputs.clone(),
            subscription: None,
            link: None,
            timer: None,
            snapshot,
        };
        let task = tokio::spawn(controller.run(rx));

        (
            ControllerHandle {
                inputs,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        info!(source = self.parts.source.name(), "session controller started");
        let boot = self.session.boot();
        self.execute(boot).await;
        self.snapshot.send_replace(self.session.snapshot());

        while let Some(input) = rx.recv().await {
            let shutdown = matches!(input, Input::Shutdown);
            let commands = self.session.handle(input);
            self.execute(commands).await;
            self.snapshot.send_replace(self.session.snapshot());
            if shutdown {
                break;
            }
        }
        info!("session controller stopped");
    }

    async fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            self.apply(command).await;
        }
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::PersistCredentials(credentials) => {
                if let Err(err) = self.parts.credential_store.write(&credentials) {
                    self.report(ErrorKind::Other, format!("could not save credentials: {err:#}"));
                }
            }
            Command::PersistConfig(config) => {
                if let Err(err) = self.parts.config_store.write(&config) {
                    self.report(ErrorKind::Other, format!("could not save config: {err:#}"));
                }
            }
            Command::ApplyStartup { enabled, hidden } => {
                if let Err(err) = self.parts.autostart.apply(enabled, hidden) {
                    self.report(ErrorKind::Other, format!("could not update startup: {err:#}"));
                }
            }
            Command::StartSubscription {
                subscription,
                credentials,
            } => self.start_subscription(subscription, &credentials),
            Command::StopSubscription => self.stop_subscription(),
            Command::LookupPlayCount {
                generation,
                artist,
                title,
                username,
            } => self.spawn_lookup(generation, artist, title, username),
            Command::ArmTimer { generation } => self.arm_timer(generation),
            Command::CancelTimer => self.cancel_timer(),
            Command::Publish(payload) => {
                if let Some(active) = self.link.as_mut() {
                    let result =
                        tokio::time::timeout(LINK_CALL_TIMEOUT, active.link.publish(&payload)).await;
                    match result {
                        Ok(Ok(())) => debug!(details = %payload.details, "presence published"),
                        Ok(Err(err)) => self.report(ErrorKind::Presence, format!("{err:#}")),
                        Err(_) => self.report(ErrorKind::Presence, "presence update timed out"),
                    }
                }
            }
            Command::ClearPresence => {
                if let Some(active) = self.link.as_mut() {
                    let result = tokio::time::timeout(LINK_CALL_TIMEOUT, active.link.clear()).await;
                    match result {
                        Ok(Ok(())) => debug!("presence cleared"),
                        Ok(Err(err)) => self.report(ErrorKind::Presence, format!("{err:#}")),
                        Err(_) => self.report(ErrorKind::Presence, "presence clear timed out"),
                    }
                }
            }
            Command::Connect { epoch, identity } => self.connect(epoch, identity),
            Command::Disconnect => self.disconnect().await,
            Command::Notify(notification) => self.parts.ui.notify(&notification),
        }
    }

    fn report(&self, kind: ErrorKind, message: impl Into<String>) {
        let error = UiError::new(kind, message);
        warn!(kind = ?error.kind, message = %error.message, "session error");
        self.parts.ui.notify(&Notification::Error(error));
    }

    fn start_subscription(&mut self, subscription: u64, credentials: &Credentials) {
        self.stop_subscription();
        info!(user = %credentials.username, subscription, "subscribing to now playing");

        let Subscription { mut events, stop } = self.parts.source.subscribe(credentials);
        let inputs = self.inputs.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inputs.send(Input::Track { subscription, event }).is_err() {
                    break;
                }
            }
        });
        self.subscription = Some(ActiveSubscription { stop, forwarder });
    }

    fn stop_subscription(&mut self) {
        if let Some(mut active) = self.subscription.take() {
            active.stop.stop();
            active.forwarder.abort();
        }
    }

    fn spawn_lookup(&self, generation: u64, artist: String, title: String, username: String) {
        let source = Arc::clone(&self.parts.source);
        let inputs = self.inputs.clone();
        let limit = Duration::from_millis(self.session.config().intervals.lookup_timeout_ms);

        tokio::spawn(async move {
            let lookup = source.lookup_play_count(&artist, &title, &username);
            let count = match tokio::time::timeout(limit, lookup).await {
                Ok(Ok(count)) => count,
                Ok(Err(err)) => {
                    debug!(error = %err, "play count lookup failed");
                    None
                }
                Err(_) => {
                    debug!("play count lookup timed out");
                    None
                }
            };
            let _ = inputs.send(Input::PlayCount { generation, count });
        });
    }

    fn arm_timer(&mut self, generation: u64) {
        self.cancel_timer();
        let inputs = self.inputs.clone();
        self.timer = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + REPUBLISH_INTERVAL, REPUBLISH_INTERVAL);
            loop {
                ticker.tick().await;
                if inputs.send(Input::Tick { generation }).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    fn connect(&mut self, epoch: u64, identity: IdentityKey) {
        let TransportHandle { mut events, link } = self.parts.transport.connect(identity);
        let inputs = self.inputs.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if inputs.send(Input::Transport { epoch, event }).is_err() {
                    break;
                }
            }
        });
        self.link = Some(ActiveLink { link, forwarder });
    }

    async fn disconnect(&mut self) {
        if let Some(mut active) = self.link.take() {
            active.forwarder.abort();
            if tokio::time::timeout(LINK_CALL_TIMEOUT, active.link.disconnect())
                .await
                .is_err()
            {
                debug!("presence transport disconnect timed out");
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel_timer();
        self.stop_subscription();
        if let Some(active) = self.link.take() {
            active.forwarder.abort();
        }
    }
}
