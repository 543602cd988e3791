use scrobble_presence_core::{StreamErrorKind, TrackInfo};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_USER_NOT_FOUND: u32 = 6;
const ERROR_INVALID_API_KEY: u32 = 10;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Service { code: u32, message: String },
    #[error("last.fm request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected last.fm response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid last.fm url: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    pub fn classify(&self) -> StreamErrorKind {
        match self {
            Self::Service { code, message } => {
                if *code == ERROR_USER_NOT_FOUND || message == "User not found" {
                    StreamErrorKind::UserNotFound
                } else if *code == ERROR_INVALID_API_KEY || message.starts_with("Invalid API key") {
                    StreamErrorKind::InvalidApiKey
                } else {
                    StreamErrorKind::Other(message.clone())
                }
            }
            other => StreamErrorKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LastFmClient {
    http: reqwest::Client,
    api_key: String,
    root: String,
}

impl LastFmClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            root: API_ROOT.to_string(),
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// The track the user is scrobbling right now, if any.
    pub async fn now_playing(&self, username: &str) -> Result<Option<TrackInfo>, ApiError> {
        let body = self
            .call(
                "user.getrecenttracks",
                &[("user", username), ("limit", "1")],
            )
            .await?;
        parse_now_playing(&body)
    }

    pub async fn user_play_count(
        &self,
        artist: &str,
        title: &str,
        username: &str,
    ) -> Result<Option<u32>, ApiError> {
        let body = self
            .call(
                "track.getInfo",
                &[("artist", artist), ("track", title), ("username", username)],
            )
            .await?;
        parse_play_count(&body)
    }

    async fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Vec<u8>, ApiError> {
        let mut url = Url::parse(&self.root)?;
        url.query_pairs_mut()
            .append_pair("method", method)
            .append_pair("api_key", &self.api_key)
            .append_pair("format", "json")
            .extend_pairs(params.iter().copied());

        let bytes = self
            .http
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .bytes()
            .await?;
        // Last.fm reports failures in the body with a 4xx status, so the body is
        // checked before the status.
        if let Ok(err) = serde_json::from_slice::<ErrorBody>(&bytes) {
            return Err(ApiError::Service {
                code: err.error,
                message: err.message,
            });
        }
        Ok(bytes.to_vec())
    }
}

pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("scrobble-presence/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[derive(Deserialize)]
struct ErrorBody {
    error: u32,
    message: String,
}

#[derive(Deserialize)]
struct RecentTracksBody {
    recenttracks: RecentTracks,
}

#[derive(Deserialize)]
struct RecentTracks {
    #[serde(default)]
    track: OneOrMany<RawTrack>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize, Default)]
struct Text {
    #[serde(rename = "#text", default)]
    text: String,
}

#[derive(Deserialize)]
struct RawTrack {
    name: String,
    artist: Text,
    #[serde(default)]
    album: Text,
    #[serde(default)]
    image: Vec<Text>,
    #[serde(default)]
    url: String,
    #[serde(rename = "@attr", default)]
    attr: Option<TrackAttr>,
}

#[derive(Deserialize)]
struct TrackAttr {
    #[serde(default)]
    nowplaying: Option<String>,
}

impl RawTrack {
    fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|a| a.nowplaying.as_deref())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn into_track(self) -> TrackInfo {
        let image_url = self
            .image
            .into_iter()
            .rev()
            .map(|i| i.text)
            .find(|t| !t.is_empty());
        TrackInfo {
            artist: self.artist.text,
            title: self.name,
            album: self.album.text,
            image_url,
            permalink: self.url,
        }
    }
}

#[derive(Deserialize)]
struct TrackInfoBody {
    track: TrackPlayCount,
}

#[derive(Deserialize)]
struct TrackPlayCount {
    #[serde(default, deserialize_with = "lenient_count")]
    userplaycount: Option<u32>,
}

fn lenient_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

pub(crate) fn parse_now_playing(body: &[u8]) -> Result<Option<TrackInfo>, ApiError> {
    let parsed: RecentTracksBody = serde_json::from_slice(body)?;
    Ok(parsed
        .recenttracks
        .track
        .into_vec()
        .into_iter()
        .find(RawTrack::is_now_playing)
        .map(RawTrack::into_track))
}

pub(crate) fn parse_play_count(body: &[u8]) -> Result<Option<u32>, ApiError> {
    let parsed: TrackInfoBody = serde_json::from_slice(body)?;
    Ok(parsed.track.userplaycount)
}

#[cfg(test)]
mod tests {
    use super::{parse_now_playing, parse_play_count, ApiError};
    use scrobble_presence_core::StreamErrorKind;

    const NOW_PLAYING: &str = r##"{"recenttracks":{"track":[
        {"artist":{"mbid":"","#text":"Кино"},"name":"Группа крови",
         "album":{"mbid":"","#text":"Группа крови"},
         "image":[{"size":"small","#text":"https://img/s.png"},{"size":"extralarge","#text":"https://img/xl.png"}],
         "url":"https://www.last.fm/music/Кино/_/Группа+крови","@attr":{"nowplaying":"true"}},
        {"artist":{"#text":"Кино"},"name":"Звезда по имени Солнце","album":{"#text":"Звезда"},
         "image":[],"url":"https://www.last.fm/music/x","date":{"uts":"1700000000"}}
    ],"@attr":{"user":"rj"}}}"##;

    #[test]
    fn picks_the_now_playing_entry() {
        let track = parse_now_playing(NOW_PLAYING.as_bytes()).unwrap().unwrap();
        assert_eq!(track.artist, "Кино");
        assert_eq!(track.title, "Группа крови");
        assert_eq!(track.album, "Группа крови");
        assert_eq!(track.image_url.as_deref(), Some("https://img/xl.png"));
    }

    #[test]
    fn single_scrobbled_track_is_not_now_playing() {
        let body = r##"{"recenttracks":{"track":{"artist":{"#text":"A"},"name":"B","url":"u"}}}"##;
        assert!(parse_now_playing(body.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn empty_history_is_not_now_playing() {
        let body = r#"{"recenttracks":{"track":[]}}"#;
        assert!(parse_now_playing(body.as_bytes()).unwrap().is_none());
    }

    #[test]
    fn play_count_accepts_strings_and_numbers() {
        let s = r#"{"track":{"name":"B","userplaycount":"42"}}"#;
        let n = r#"{"track":{"name":"B","userplaycount":7}}"#;
        let missing = r#"{"track":{"name":"B"}}"#;
        assert_eq!(parse_play_count(s.as_bytes()).unwrap(), Some(42));
        assert_eq!(parse_play_count(n.as_bytes()).unwrap(), Some(7));
        assert_eq!(parse_play_count(missing.as_bytes()).unwrap(), None);
    }

    #[test]
    fn service_errors_are_classified() {
        let user = ApiError::Service {
            code: 6,
            message: "User not found".to_string(),
        };
        let key = ApiError::Service {
            code: 10,
            message: "Invalid API key - You must be granted a valid key by last.fm".to_string(),
        };
        let other = ApiError::Service {
            code: 29,
            message: "Rate limit exceeded".to_string(),
        };

        assert_eq!(user.classify(), StreamErrorKind::UserNotFound);
        assert_eq!(key.classify(), StreamErrorKind::InvalidApiKey);
        assert_eq!(
            other.classify(),
            StreamErrorKind::Other("Rate limit exceeded".to_string())
        );
    }
}
