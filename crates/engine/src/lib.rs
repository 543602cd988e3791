pub mod controller;
pub mod payload;
pub mod plural;
pub mod ports;
pub mod session;

pub use controller::{known_identities, Collaborators, ControllerHandle, SessionController};
pub use payload::{build_payload, PresenceButton, PresencePayload};
pub use ports::{
    Autostart, ConfigStore, CredentialStore, PresenceLink, PresenceTransport, TransportEvent,
    TransportHandle, UiSink,
};
pub use session::{
    Command, ErrorKind, Input, Notification, Phase, Session, SessionSnapshot, UiError,
    REPUBLISH_INTERVAL,
};
