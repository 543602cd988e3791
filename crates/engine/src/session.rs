//! The presence session as a pure state machine.
//!
//! [`Session::handle`] takes one [`Input`] at a time and returns the side effects
//! the driver has to perform, in order. Nothing in here touches the network, the
//! clock or the disk, so every transition can be exercised with literal inputs.
//!
//! Three counters keep asynchronous results honest:
//! - `generation` changes whenever the held track is invalidated. Play-count
//!   results and timer ticks carry the generation they were issued for and are
//!   dropped when it no longer matches.
//! - `subscription` identifies the current track feed; events from a feed that
//!   was torn down are dropped.
//! - `epoch` identifies the current presence transport; events from a previous
//!   identity's transport are dropped.

use crate::payload::{build_payload, PresencePayload};
use crate::ports::TransportEvent;
use scrobble_presence_core::{
    Config, ConfigDraft, ConfigError, Credentials, EnrichedTrack, IdentityKey, StreamErrorKind,
    TrackEvent, TrackInfo,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const REPUBLISH_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Subscribing,
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    UserNotFound,
    InvalidApiKey,
    Other,
    Presence,
    Config,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl UiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_stream(kind: StreamErrorKind) -> Self {
        match kind {
            StreamErrorKind::UserNotFound => Self::new(ErrorKind::UserNotFound, "Last.fm user not found"),
            StreamErrorKind::InvalidApiKey => {
                Self::new(ErrorKind::InvalidApiKey, "Last.fm rejected the API key")
            }
            StreamErrorKind::Other(message) => Self::new(ErrorKind::Other, message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum Notification {
    CurrentTrack(Option<PresencePayload>),
    ConnectionStatus(bool),
    Error(UiError),
}

#[derive(Debug, Clone)]
pub enum Input {
    SetCredentials(Credentials),
    UpdateConfig(ConfigDraft),
    ForceReconnect,
    Track { subscription: u64, event: TrackEvent },
    PlayCount { generation: u64, count: Option<u32> },
    Tick { generation: u64 },
    Transport { epoch: u64, event: TransportEvent },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    PersistCredentials(Credentials),
    PersistConfig(Config),
    ApplyStartup { enabled: bool, hidden: bool },
    StartSubscription { subscription: u64, credentials: Credentials },
    StopSubscription,
    LookupPlayCount {
        generation: u64,
        artist: String,
        title: String,
        username: String,
    },
    ArmTimer { generation: u64 },
    CancelTimer,
    Publish(PresencePayload),
    ClearPresence,
    Connect { epoch: u64, identity: IdentityKey },
    Disconnect,
    Notify(Notification),
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub connected: bool,
    pub current_track: Option<PresencePayload>,
    pub config: Config,
    pub credentials: Credentials,
}

#[derive(Debug, Clone)]
struct PendingLookup {
    generation: u64,
    track: TrackInfo,
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    credentials: Credentials,
    phase: Phase,
    current: Option<EnrichedTrack>,
    pending: Option<PendingLookup>,
    generation: u64,
    subscription: u64,
    epoch: u64,
    transport_ready: bool,
    // Whether the UI was last told there is no track.
    cleared: bool,
}

impl Session {
    pub fn new(config: Config, credentials: Credentials) -> Self {
        Self {
            config: config.normalized(),
            credentials,
            phase: Phase::Idle,
            current: None,
            pending: None,
            generation: 0,
            subscription: 0,
            epoch: 0,
            transport_ready: false,
            cleared: true,
        }
    }

    /// Connects the configured identity and subscribes with the stored credentials.
    pub fn boot(&mut self) -> Vec<Command> {
        let mut cmds = self.switch_identity(self.config.identity);
        cmds.extend(self.restart_subscription());
        cmds
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        match input {
            Input::SetCredentials(credentials) => self.set_credentials(credentials),
            Input::UpdateConfig(draft) => self.update_config(&draft),
            Input::ForceReconnect => self.switch_identity(self.config.identity),
            Input::Track {
                subscription,
                event,
            } => {
                if subscription != self.subscription || self.phase == Phase::Idle {
                    debug!(subscription, "dropping event from a stale subscription");
                    return Vec::new();
                }
                match event {
                    TrackEvent::Started(track) => self.on_track_started(track),
                    TrackEvent::Stopped => self.on_track_stopped(),
                    TrackEvent::TransportError(kind) => self.on_stream_error(kind),
                }
            }
            Input::PlayCount { generation, count } => self.on_play_count(generation, count),
            Input::Tick { generation } => self.on_tick(generation),
            Input::Transport { epoch, event } => {
                if epoch != self.epoch {
                    debug!(epoch, "dropping event from a replaced transport");
                    return Vec::new();
                }
                self.on_transport(event)
            }
            Input::Shutdown => {
                self.generation += 1;
                self.pending = None;
                self.transport_ready = false;
                vec![Command::CancelTimer, Command::StopSubscription, Command::Disconnect]
            }
        }
    }

    pub fn set_credentials(&mut self, credentials: Credentials) -> Vec<Command> {
        let mut cmds = vec![Command::PersistCredentials(credentials.clone())];
        self.credentials = credentials;
        cmds.extend(self.restart_subscription());
        cmds
    }

    pub fn on_track_started(&mut self, track: TrackInfo) -> Vec<Command> {
        let mut cmds = Vec::new();
        self.invalidate_track(&mut cmds);
        self.phase = Phase::Subscribing;
        self.cleared = false;

        cmds.push(Command::LookupPlayCount {
            generation: self.generation,
            artist: track.artist.clone(),
            title: track.title.clone(),
            username: self.credentials.username.clone(),
        });
        self.pending = Some(PendingLookup {
            generation: self.generation,
            track,
        });
        cmds
    }

    pub fn on_play_count(&mut self, generation: u64, count: Option<u32>) -> Vec<Command> {
        let track = match self.pending.take() {
            Some(pending) if pending.generation == generation => pending.track,
            other => {
                self.pending = other;
                debug!(generation, "discarding play count for a superseded track");
                return Vec::new();
            }
        };

        info!(artist = %track.artist, title = %track.title, ?count, "now playing");
        self.current = Some(EnrichedTrack {
            track,
            play_count: count,
        });
        self.phase = Phase::Presenting;

        let mut cmds = self.publish_current();
        cmds.push(Command::ArmTimer { generation });
        cmds
    }

    pub fn on_tick(&mut self, generation: u64) -> Vec<Command> {
        if generation != self.generation {
            debug!(generation, "dropping stale republish tick");
            return Vec::new();
        }
        self.publish_current()
    }

    pub fn on_track_stopped(&mut self) -> Vec<Command> {
        let mut cmds = Vec::new();
        let had_track = self.invalidate_track(&mut cmds);
        self.phase = Phase::Subscribing;
        if self.cleared && !had_track {
            return cmds;
        }
        self.clear_presence(&mut cmds);
        cmds
    }

    pub fn on_stream_error(&mut self, kind: StreamErrorKind) -> Vec<Command> {
        warn!(?kind, "track stream error");
        vec![Command::Notify(Notification::Error(UiError::from_stream(kind)))]
    }

    pub fn switch_identity(&mut self, identity: IdentityKey) -> Vec<Command> {
        info!(%identity, "connecting presence identity");
        self.config.identity = identity;
        self.transport_ready = false;
        self.epoch += 1;
        vec![
            Command::Disconnect,
            Command::Connect {
                epoch: self.epoch,
                identity,
            },
            Command::Notify(Notification::ConnectionStatus(false)),
        ]
    }

    pub fn update_config(&mut self, draft: &ConfigDraft) -> Vec<Command> {
        let next = match self.config.apply(draft) {
            Ok(next) => next,
            Err(err @ ConfigError::UnknownIdentity(_)) => {
                warn!(error = %err, "rejecting config update");
                return vec![Command::Notify(Notification::Error(UiError::new(
                    ErrorKind::Config,
                    err.to_string(),
                )))];
            }
        };

        let mut cmds = vec![Command::PersistConfig(next.clone())];
        if next.run_on_startup != self.config.run_on_startup
            || next.run_as_background != self.config.run_as_background
        {
            cmds.push(Command::ApplyStartup {
                enabled: next.run_on_startup,
                hidden: next.run_as_background,
            });
        }

        let identity_changed = next.identity != self.config.identity;
        self.config = next;
        if identity_changed {
            cmds.extend(self.switch_identity(self.config.identity));
        }
        cmds.extend(self.publish_current());
        cmds
    }

    fn on_transport(&mut self, event: TransportEvent) -> Vec<Command> {
        match event {
            TransportEvent::Ready => {
                info!(identity = %self.config.identity, "presence transport ready");
                self.transport_ready = true;
                let mut cmds = vec![Command::Notify(Notification::ConnectionStatus(true))];
                cmds.extend(self.publish_current());
                cmds
            }
            TransportEvent::Disconnected => {
                let was_ready = std::mem::replace(&mut self.transport_ready, false);
                if !was_ready {
                    return Vec::new();
                }
                warn!("presence transport disconnected");
                vec![Command::Notify(Notification::ConnectionStatus(false))]
            }
            TransportEvent::Failed(message) => {
                warn!(%message, "presence transport failed to connect");
                self.transport_ready = false;
                vec![
                    Command::Notify(Notification::ConnectionStatus(false)),
                    Command::Notify(Notification::Error(UiError::new(
                        ErrorKind::Presence,
                        message,
                    ))),
                ]
            }
        }
    }

    fn restart_subscription(&mut self) -> Vec<Command> {
        let mut cmds = vec![Command::StopSubscription];
        let had_track = self.invalidate_track(&mut cmds);
        if had_track || !self.cleared {
            self.clear_presence(&mut cmds);
        }
        self.subscription += 1;

        if !self.credentials.is_complete() {
            info!("credentials incomplete; session idle");
            self.phase = Phase::Idle;
            return cmds;
        }

        self.phase = Phase::Subscribing;
        cmds.push(Command::StartSubscription {
            subscription: self.subscription,
            credentials: self.credentials.clone(),
        });
        cmds
    }

    /// Cancels the heartbeat and forgets the held or pending track. Returns
    /// whether a track was held.
    fn invalidate_track(&mut self, cmds: &mut Vec<Command>) -> bool {
        cmds.push(Command::CancelTimer);
        self.generation += 1;
        self.pending = None;
        self.current.take().is_some()
    }

    fn clear_presence(&mut self, cmds: &mut Vec<Command>) {
        self.cleared = true;
        if self.transport_ready {
            cmds.push(Command::ClearPresence);
        }
        cmds.push(Command::Notify(Notification::CurrentTrack(None)));
    }

    fn publish_current(&self) -> Vec<Command> {
        let Some(payload) = self.current_payload() else {
            return Vec::new();
        };
        let mut cmds = Vec::with_capacity(2);
        if self.transport_ready {
            cmds.push(Command::Publish(payload.clone()));
        }
        cmds.push(Command::Notify(Notification::CurrentTrack(Some(payload))));
        cmds
    }

    pub fn current_payload(&self) -> Option<PresencePayload> {
        self.current
            .as_ref()
            .map(|track| build_payload(track, &self.config, &self.credentials.username))
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<&EnrichedTrack> {
        self.current.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn is_transport_ready(&self) -> bool {
        self.transport_ready
    }

    pub fn subscription(&self) -> u64 {
        self.subscription
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            connected: self.transport_ready,
            current_track: self.current_payload(),
            config: self.config.clone(),
            credentials: self.credentials.clone(),
        }
    }
}
