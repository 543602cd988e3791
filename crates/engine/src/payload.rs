use crate::plural::{pluralize, WordForms};
use scrobble_presence_core::{urls, ButtonMode, Config, EnrichedTrack};
use serde::{Deserialize, Serialize};

const PLAYED_PREFIX: &str = "Прослушано";
const TIMES: WordForms<'static> = ["раз", "раза", "раз"];
const OPEN_LABEL: &str = "Открыть";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceButton {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub details: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<PresenceButton>,
}

pub fn build_payload(current: &EnrichedTrack, config: &Config, username: &str) -> PresencePayload {
    let track = &current.track;

    let mut state = track.artist.clone();
    if track.album != track.title {
        state.push_str(" - ");
        state.push_str(&track.album);
    }

    let large_image_text = current
        .play_count
        .filter(|&n| n > 1)
        .map(|n| format!("{PLAYED_PREFIX} {n} {}", pluralize(u64::from(n), &TIMES)));

    let button_url = match config.button_mode {
        ButtonMode::Off => None,
        ButtonMode::Track => Some(track.permalink.clone()),
        ButtonMode::Profile => Some(urls::profile_url(username)),
    };
    let buttons = button_url
        .map(|url| {
            vec![PresenceButton {
                label: OPEN_LABEL.to_string(),
                url,
            }]
        })
        .unwrap_or_default();

    PresencePayload {
        details: track.title.clone(),
        state,
        large_image_key: track.image_url.clone(),
        large_image_text,
        buttons,
    }
}

#[cfg(test)]
mod tests {
    use super::build_payload;
    use scrobble_presence_core::{ButtonMode, Config, EnrichedTrack, TrackInfo};

    fn enriched(title: &str, album: &str, play_count: Option<u32>) -> EnrichedTrack {
        EnrichedTrack {
            track: TrackInfo {
                artist: "A".to_string(),
                title: title.to_string(),
                album: album.to_string(),
                image_url: Some("https://img/cover.png".to_string()),
                permalink: "https://www.last.fm/music/A/_/X".to_string(),
            },
            play_count,
        }
    }

    fn config(mode: ButtonMode) -> Config {
        Config {
            button_mode: mode,
            ..Config::default()
        }
    }

    #[test]
    fn album_matching_title_is_not_repeated() {
        let same = build_payload(&enriched("X", "X", None), &config(ButtonMode::Off), "rj");
        let other = build_payload(&enriched("X", "Y", None), &config(ButtonMode::Off), "rj");

        assert_eq!(same.state, "A");
        assert_eq!(other.state, "A - Y");
        assert_eq!(other.details, "X");
        assert_eq!(other.large_image_key.as_deref(), Some("https://img/cover.png"));
    }

    #[test]
    fn play_count_text_needs_more_than_one_play() {
        let cfg = config(ButtonMode::Off);
        let once = build_payload(&enriched("X", "Y", Some(1)), &cfg, "rj");
        let unknown = build_payload(&enriched("X", "Y", None), &cfg, "rj");
        let twice = build_payload(&enriched("X", "Y", Some(2)), &cfg, "rj");
        let many = build_payload(&enriched("X", "Y", Some(21)), &cfg, "rj");

        assert_eq!(once.large_image_text, None);
        assert_eq!(unknown.large_image_text, None);
        assert_eq!(twice.large_image_text.as_deref(), Some("Прослушано 2 раза"));
        assert_eq!(many.large_image_text.as_deref(), Some("Прослушано 21 раз"));
    }

    #[test]
    fn buttons_follow_mode() {
        let track = enriched("X", "Y", None);

        let off = build_payload(&track, &config(ButtonMode::Off), "rj");
        assert!(off.buttons.is_empty());

        let by_track = build_payload(&track, &config(ButtonMode::Track), "rj");
        assert_eq!(by_track.buttons.len(), 1);
        assert_eq!(by_track.buttons[0].label, "Открыть");
        assert_eq!(by_track.buttons[0].url, "https://www.last.fm/music/A/_/X");

        let by_profile = build_payload(&track, &config(ButtonMode::Profile), "rj");
        assert_eq!(by_profile.buttons[0].url, "https://www.last.fm/user/rj");
    }

    #[test]
    fn same_inputs_same_payload() {
        let track = enriched("X", "Y", Some(5));
        let cfg = config(ButtonMode::Track);
        assert_eq!(build_payload(&track, &cfg, "rj"), build_payload(&track, &cfg, "rj"));
    }
}
