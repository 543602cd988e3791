use anyhow::{Context, Result};
use scrobble_presence_core::{Config, Credentials, IdentityKey};
use scrobble_presence_engine::{ConfigStore, CredentialStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// A single TOML record on disk. Reading a missing file writes and returns the default.
pub struct TomlFile<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> TomlFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<T> {
        if !self.path.exists() {
            let record = T::default();
            self.save(&record)?;
            return Ok(record);
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", self.path.display()))
    }

    pub fn save(&self, record: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let text = toml::to_string_pretty(record)?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Values from `SCROBBLE_PRESENCE_*` that win over config.toml for this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub identity: Option<IdentityKey>,
}

impl Overrides {
    pub fn from_env() -> Self {
        let log_level = std::env::var("SCROBBLE_PRESENCE_LOG_LEVEL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let identity = std::env::var("SCROBBLE_PRESENCE_IDENTITY")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(identity) => Some(identity),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring SCROBBLE_PRESENCE_IDENTITY");
                    None
                }
            });
        Self {
            log_level,
            identity,
        }
    }

    pub fn apply(&self, cfg: &mut Config) {
        if let Some(level) = &self.log_level {
            cfg.log_level = level.clone();
        }
        if let Some(identity) = self.identity {
            cfg.identity = identity;
        }
    }
}

/// Config store for the running session. The identity override holds until
/// the identity in the file itself changes, and override values are never
/// written back.
pub struct StartupConfig {
    file: TomlFile<Config>,
    overrides: Overrides,
    // The file as first read, before overrides.
    seed: Mutex<Option<Config>>,
}

impl StartupConfig {
    pub fn new(file: TomlFile<Config>, overrides: Overrides) -> Self {
        Self {
            file,
            overrides,
            seed: Mutex::new(None),
        }
    }

    fn seed(&self, raw: &Config) -> Config {
        self.seed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| raw.clone())
            .clone()
    }
}

impl ConfigStore for StartupConfig {
    fn read(&self) -> Result<Config> {
        let raw = self.file.load()?;
        let seed = self.seed(&raw);
        let mut cfg = raw;
        if let Some(level) = &self.overrides.log_level {
            cfg.log_level = level.clone();
        }
        if let Some(identity) = self.overrides.identity {
            if cfg.identity == seed.identity {
                cfg.identity = identity;
            }
        }
        Ok(cfg)
    }

    fn write(&self, config: &Config) -> Result<()> {
        let mut record = config.clone();
        let seed = self.seed(config);
        if self.overrides.log_level.is_some() {
            record.log_level = seed.log_level;
        }
        if self.overrides.identity == Some(record.identity) {
            record.identity = seed.identity;
        }
        self.file.save(&record)
    }
}

impl CredentialStore for TomlFile<Credentials> {
    fn read(&self) -> Result<Credentials> {
        self.load()
    }

    fn write(&self, credentials: &Credentials) -> Result<()> {
        self.save(credentials)?;
        restrict_permissions(&self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(error = %err, path = %path.display(), "could not restrict credentials file");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::{Overrides, StartupConfig, TomlFile};
    use scrobble_presence_core::{ButtonMode, Config, Credentials, IdentityKey};
    use scrobble_presence_engine::{ConfigStore, CredentialStore};

    #[test]
    fn missing_file_yields_and_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFile::<Credentials>::new(dir.path().join("nested/credentials.toml"));

        let creds = CredentialStore::read(&store).unwrap();
        assert_eq!(creds, Credentials::default());
        assert!(store.path().exists());
    }

    #[test]
    fn credentials_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFile::<Credentials>::new(dir.path().join("credentials.toml"));
        let creds = Credentials::new("rj", "0123456789abcdef");

        CredentialStore::write(&store, &creds).unwrap();
        assert_eq!(CredentialStore::read(&store).unwrap(), creds);
    }

    #[test]
    fn config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TomlFile::<Config>::new(dir.path().join("config.toml"));
        let cfg = Config {
            identity: IdentityKey::Music,
            button_mode: ButtonMode::Profile,
            run_on_startup: true,
            run_as_background: true,
            ..Config::default()
        };

        store.save(&cfg).unwrap();
        assert_eq!(store.load().unwrap(), cfg);
    }

    #[test]
    fn unknown_identity_in_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "identity = \"spotify\"\n").unwrap();

        let store = TomlFile::<Config>::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn overrides_apply_to_the_session_but_never_reach_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let file = TomlFile::<Config>::new(&path);
        let store = StartupConfig::new(
            TomlFile::new(&path),
            Overrides {
                log_level: Some("debug".to_string()),
                identity: Some(IdentityKey::NowPlaying),
            },
        );

        let session = ConfigStore::read(&store).unwrap();
        assert_eq!(session.identity, IdentityKey::NowPlaying);
        assert_eq!(session.log_level, "debug");

        // the session persists a button change
        let edited = Config {
            button_mode: ButtonMode::Off,
            ..session
        };
        ConfigStore::write(&store, &edited).unwrap();
        let on_disk = file.load().unwrap();
        assert_eq!(on_disk.identity, IdentityKey::Default);
        assert_eq!(on_disk.log_level, "info");
        assert_eq!(on_disk.button_mode, ButtonMode::Off);

        // re-reading after our own write keeps the override
        assert_eq!(ConfigStore::read(&store).unwrap(), edited);

        // an identity picked in the UI is kept
        let picked = Config {
            identity: IdentityKey::Music,
            ..edited
        };
        ConfigStore::write(&store, &picked).unwrap();
        assert_eq!(file.load().unwrap().identity, IdentityKey::Music);
        assert_eq!(ConfigStore::read(&store).unwrap().identity, IdentityKey::Music);
    }
}
