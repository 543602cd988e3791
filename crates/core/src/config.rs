use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown presence identity `{0}`")]
    UnknownIdentity(String),
}

/// One of the registered Discord applications the presence can be published under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum IdentityKey {
    #[default]
    #[serde(rename = "default", alias = "defaultDiscordAppID")]
    Default,
    #[serde(rename = "now-playing", alias = "playingNowDiscordAppID")]
    NowPlaying,
    #[serde(rename = "music", alias = "musicDiscordAppID")]
    Music,
}

impl IdentityKey {
    pub const ALL: [IdentityKey; 3] = [Self::Default, Self::NowPlaying, Self::Music];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::NowPlaying => "now-playing",
            Self::Music => "music",
        }
    }

    pub fn app_id(self) -> &'static str {
        match self {
            Self::Default => "1192427927074259038",
            Self::NowPlaying => "1192746501483544617",
            Self::Music => "1192746539915939893",
        }
    }

    /// Name Discord shows above the activity for this application.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Default => "Слушаю музыку",
            Self::NowPlaying => "Играет сейчас",
            Self::Music => "Музыка",
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "default" | "defaultDiscordAppID" => Ok(Self::Default),
            "now-playing" | "playingNowDiscordAppID" => Ok(Self::NowPlaying),
            "music" | "musicDiscordAppID" => Ok(Self::Music),
            other => Err(ConfigError::UnknownIdentity(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    Off,
    #[default]
    Track,
    Profile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigIntervals {
    pub stream_poll_ms: u64,
    pub lookup_timeout_ms: u64,
    pub file_watch_poll_ms: u64,
}

impl Default for ConfigIntervals {
    fn default() -> Self {
        Self {
            stream_poll_ms: 10_000,
            lookup_timeout_ms: 5_000,
            file_watch_poll_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub identity: IdentityKey,
    pub button_mode: ButtonMode,
    pub run_on_startup: bool,
    pub run_as_background: bool,
    pub log_level: String,
    pub intervals: ConfigIntervals,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            identity: IdentityKey::default(),
            button_mode: ButtonMode::default(),
            run_on_startup: false,
            run_as_background: false,
            log_level: "info".to_string(),
            intervals: ConfigIntervals::default(),
        }
    }
}

impl Config {
    /// Background start only makes sense when the app starts with the session,
    /// so a lone `run_as_background` is switched off instead of rejected.
    pub fn normalized(mut self) -> Self {
        if self.run_as_background && !self.run_on_startup {
            self.run_as_background = false;
        }
        self
    }

    /// Applies the user-editable fields on top of this config.
    pub fn apply(&self, draft: &ConfigDraft) -> Result<Config, ConfigError> {
        let identity = draft.identity.parse::<IdentityKey>()?;
        Ok(Config {
            identity,
            button_mode: draft.button_mode,
            run_on_startup: draft.run_on_startup,
            run_as_background: draft.run_as_background,
            ..self.clone()
        }
        .normalized())
    }

    pub fn draft(&self) -> ConfigDraft {
        ConfigDraft {
            identity: self.identity.as_str().to_string(),
            button_mode: self.button_mode,
            run_on_startup: self.run_on_startup,
            run_as_background: self.run_as_background,
        }
    }
}

/// The settings a user edits from the UI. The identity stays a raw string until
/// it is validated against [`IdentityKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDraft {
    pub identity: String,
    pub button_mode: ButtonMode,
    pub run_on_startup: bool,
    pub run_as_background: bool,
}

#[cfg(test)]
mod tests {
    use super::{ButtonMode, Config, ConfigDraft, ConfigError, IdentityKey};

    fn draft(identity: &str) -> ConfigDraft {
        ConfigDraft {
            identity: identity.to_string(),
            button_mode: ButtonMode::Profile,
            run_on_startup: false,
            run_as_background: true,
        }
    }

    #[test]
    fn background_without_startup_is_forced_off() {
        let cfg = Config::default().apply(&draft("music")).unwrap();

        assert_eq!(cfg.identity, IdentityKey::Music);
        assert_eq!(cfg.button_mode, ButtonMode::Profile);
        assert!(!cfg.run_on_startup);
        assert!(!cfg.run_as_background);
    }

    #[test]
    fn background_with_startup_is_kept() {
        let mut d = draft("default");
        d.run_on_startup = true;
        let cfg = Config::default().apply(&d).unwrap();

        assert!(cfg.run_on_startup);
        assert!(cfg.run_as_background);
    }

    #[test]
    fn unknown_identity_is_rejected() {
        let err = Config::default().apply(&draft("spotify")).unwrap_err();
        assert_eq!(err, ConfigError::UnknownIdentity("spotify".to_string()));
    }

    #[test]
    fn legacy_identity_names_parse() {
        assert_eq!(
            "playingNowDiscordAppID".parse::<IdentityKey>().unwrap(),
            IdentityKey::NowPlaying
        );

        let cfg: Config = toml::from_str("identity = \"musicDiscordAppID\"").unwrap();
        assert_eq!(cfg.identity, IdentityKey::Music);
        assert_eq!(cfg.button_mode, ButtonMode::Track);
    }

    #[test]
    fn config_survives_toml_round_trip() {
        let cfg = Config {
            identity: IdentityKey::NowPlaying,
            button_mode: ButtonMode::Off,
            run_on_startup: true,
            run_as_background: true,
            ..Config::default()
        };
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, cfg);
    }
}
