pub mod config;
pub mod model;
pub mod urls;

pub use config::{ButtonMode, Config, ConfigDraft, ConfigError, ConfigIntervals, IdentityKey};
pub use model::{Credentials, EnrichedTrack, StreamErrorKind, TrackEvent, TrackInfo};
