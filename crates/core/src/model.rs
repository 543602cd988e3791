use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            api_key: api_key.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub image_url: Option<String>,
    pub permalink: String,
}

impl TrackInfo {
    pub fn same_track(&self, other: &TrackInfo) -> bool {
        self.artist == other.artist && self.title == other.title && self.album == other.album
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamErrorKind {
    UserNotFound,
    InvalidApiKey,
    Other(String),
}

impl StreamErrorKind {
    /// Errors the user has to fix by editing credentials.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::UserNotFound | Self::InvalidApiKey)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackEvent {
    Started(TrackInfo),
    Stopped,
    TransportError(StreamErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedTrack {
    pub track: TrackInfo,
    pub play_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::Credentials;

    #[test]
    fn blank_credentials_are_incomplete() {
        assert!(!Credentials::new("", "key").is_complete());
        assert!(!Credentials::new("user", "  ").is_complete());
        assert!(Credentials::new("user", "key").is_complete());
    }

    #[test]
    fn debug_hides_api_key() {
        let out = format!("{:?}", Credentials::new("user", "secret"));
        assert!(out.contains("user"));
        assert!(!out.contains("secret"));
    }
}
