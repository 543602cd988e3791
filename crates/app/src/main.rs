mod autostart;
mod store;
mod ui;

use anyhow::{bail, Context, Result};
use autostart::XdgAutostart;
use clap::{Parser, Subcommand};
use scrobble_presence_core::{ButtonMode, Config, Credentials};
use scrobble_presence_discord_rpc::DiscordTransport;
use scrobble_presence_engine::{
    known_identities, Autostart, Collaborators, ConfigStore, ControllerHandle, CredentialStore,
    SessionController,
};
use scrobble_presence_lastfm::{api, LastFmClient, LastFmSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use store::{Overrides, StartupConfig, TomlFile};
use tokio::sync::mpsc;
use tracing::{error, info};
use ui::{ConsoleUi, Output};

#[derive(Parser, Debug)]
#[command(
    name = "scrobble-presence",
    about = "Last.fm now playing -> Discord Rich Presence"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config.toml; credentials.toml is kept next to it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run {
        /// No terminal output; only logs.
        #[arg(long)]
        hidden: bool,
        /// Print UI notifications as JSON lines.
        #[arg(long, conflicts_with = "hidden")]
        json: bool,
    },
    Doctor,
    Status,
    Identities,
    Login {
        username: String,
        api_key: String,
    },
    Logout,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
    Show,
    Set {
        #[arg(long)]
        identity: Option<String>,
        #[arg(long, value_parser = parse_button_mode)]
        buttons: Option<ButtonMode>,
        #[arg(long)]
        run_on_startup: Option<bool>,
        #[arg(long)]
        background: Option<bool>,
    },
}

struct Paths {
    config: PathBuf,
    credentials: PathBuf,
}

impl Paths {
    fn resolve(config: Option<PathBuf>) -> Self {
        let config = config.unwrap_or_else(default_config_path);
        let credentials = config
            .parent()
            .map(|dir| dir.join("credentials.toml"))
            .unwrap_or_else(|| PathBuf::from("credentials.toml"));
        Self {
            config,
            credentials,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run {
        hidden: false,
        json: false,
    });
    let paths = Paths::resolve(cli.config);
    let config_store = TomlFile::<Config>::new(&paths.config);
    let credential_store = TomlFile::<Credentials>::new(&paths.credentials);
    let overrides = Overrides::from_env();

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            config_store.save(&Config::default())?;
            println!("Initialized config at {}", paths.config.display());
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            let cfg = load_config(&config_store, &overrides)?;
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }
        Commands::Config {
            action:
                ConfigAction::Set {
                    identity,
                    buttons,
                    run_on_startup,
                    background,
                },
        } => {
            let cfg = config_store.load()?;
            init_logging(&cfg.log_level);
            let mut draft = cfg.draft();
            if let Some(identity) = identity {
                draft.identity = identity;
            }
            if let Some(mode) = buttons {
                draft.button_mode = mode;
            }
            if let Some(enabled) = run_on_startup {
                draft.run_on_startup = enabled;
            }
            if let Some(hidden) = background {
                draft.run_as_background = hidden;
            }
            let next = cfg.apply(&draft)?;
            config_store.save(&next)?;
            XdgAutostart::for_current_user().apply(next.run_on_startup, next.run_as_background)?;
            println!(
                "identity: {} ({})",
                next.identity,
                next.identity.display_name()
            );
            println!("buttons: {:?}", next.button_mode);
            println!("run on startup: {}", next.run_on_startup);
            println!("run as background: {}", next.run_as_background);
            Ok(())
        }
        Commands::Identities => {
            let current = load_config(&config_store, &overrides)?.identity;
            for (key, name) in known_identities() {
                let marker = if key == current { "*" } else { " " };
                println!("{marker} {:<12} {name} [{}]", key.as_str(), key.app_id());
            }
            Ok(())
        }
        Commands::Login { username, api_key } => {
            let creds = Credentials::new(username.trim(), api_key.trim());
            if !creds.is_complete() {
                bail!("username and api key must not be empty");
            }
            CredentialStore::write(&credential_store, &creds)?;
            println!("Saved Last.fm credentials for {}", creds.username);
            Ok(())
        }
        Commands::Logout => {
            CredentialStore::write(&credential_store, &Credentials::default())?;
            println!("Cleared Last.fm credentials");
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_config(&config_store, &overrides)?;
            init_logging(&cfg.log_level);
            let creds = CredentialStore::read(&credential_store)?;
            doctor(&cfg, &creds).await
        }
        Commands::Status => {
            let cfg = load_config(&config_store, &overrides)?;
            init_logging(&cfg.log_level);
            let creds = CredentialStore::read(&credential_store)?;
            status(&cfg, &creds).await
        }
        Commands::Run { hidden, json } => {
            let config_store = StartupConfig::new(config_store, overrides);
            let cfg = ConfigStore::read(&config_store)?;
            init_logging(&cfg.log_level);
            let output = if hidden {
                Output::Hidden
            } else if json {
                Output::Json
            } else {
                Output::Text
            };
            run(cfg, config_store, paths, output).await
        }
    }
}

async fn run(
    cfg: Config,
    config_store: StartupConfig,
    paths: Paths,
    output: Output,
) -> Result<()> {
    let config_store = Arc::new(config_store);
    let credential_store = Arc::new(TomlFile::<Credentials>::new(&paths.credentials));
    let source = LastFmSource::new(Duration::from_millis(cfg.intervals.stream_poll_ms))?;

    let (handle, task) = SessionController::spawn(Collaborators {
        source: Arc::new(source),
        transport: Arc::new(DiscordTransport),
        config_store: config_store.clone(),
        credential_store: credential_store.clone(),
        autostart: Arc::new(XdgAutostart::for_current_user()),
        ui: Arc::new(ConsoleUi::new(output)),
    });
    info!(identity = %cfg.identity, "scrobble-presence started");

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(4);
    spawn_reload_watchers(
        vec![paths.config.clone(), paths.credentials.clone()],
        cfg.intervals.file_watch_poll_ms,
        reload_tx,
    );
    spawn_reconnect_signal(handle.clone());

    loop {
        tokio::select! {
            msg = reload_rx.recv() => {
                if msg.is_some() {
                    reload(&handle, config_store.as_ref(), credential_store.as_ref());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    handle.shutdown();
    task.await.context("session controller panicked")?;
    Ok(())
}

/// Pushes on-disk edits into the running session. Values that already match
/// the session are left alone, so our own writes do not loop back.
fn reload(
    handle: &ControllerHandle,
    config_store: &StartupConfig,
    credential_store: &TomlFile<Credentials>,
) {
    match ConfigStore::read(config_store) {
        Ok(cfg) => {
            let draft = cfg.draft();
            if draft != handle.config().draft() {
                info!("configuration reloaded");
                handle.update_config(draft);
            }
        }
        Err(err) => error!(error = %format!("{err:#}"), "failed to reload config"),
    }

    match CredentialStore::read(credential_store) {
        Ok(creds) => {
            if creds != handle.credentials() {
                info!(username = %creds.username, "credentials reloaded");
                handle.set_credentials(creds);
            }
        }
        Err(err) => error!(error = %format!("{err:#}"), "failed to reload credentials"),
    }
}

async fn doctor(cfg: &Config, creds: &Credentials) -> Result<()> {
    println!("== scrobble-presence doctor ==");

    let discord_ok = scrobble_presence_discord_rpc::endpoint_reachable().await;
    println!(
        "Discord RPC local endpoint: {}",
        if discord_ok {
            "reachable"
        } else {
            "not reachable"
        }
    );
    println!(
        "Identity: {} ({}, app {})",
        cfg.identity,
        cfg.identity.display_name(),
        cfg.identity.app_id()
    );

    if !creds.is_complete() {
        println!("Last.fm credentials: missing (run `scrobble-presence login <username> <api-key>`)");
        return Ok(());
    }
    println!("Last.fm user: {}", creds.username);

    let client = LastFmClient::new(api::http_client()?, creds.api_key.clone());
    match client.now_playing(&creds.username).await {
        Ok(Some(track)) => println!("Now playing: {} - {}", track.artist, track.title),
        Ok(None) => println!("Last.fm reachable; nothing playing"),
        Err(err) => println!("Last.fm error: {err} ({:?})", err.classify()),
    }

    Ok(())
}

async fn status(cfg: &Config, creds: &Credentials) -> Result<()> {
    println!("identity: {}", cfg.identity);
    println!("buttons: {:?}", cfg.button_mode);
    println!(
        "user: {}",
        if creds.username.is_empty() {
            "<none>"
        } else {
            creds.username.as_str()
        }
    );
    if !creds.is_complete() {
        println!("track: <none>");
        return Ok(());
    }

    let client = LastFmClient::new(api::http_client()?, creds.api_key.clone());
    match client.now_playing(&creds.username).await {
        Ok(Some(track)) => {
            println!("track: {} - {}", track.artist, track.title);
            println!("album: {}", track.album);
        }
        Ok(None) => println!("track: <none>"),
        Err(err) => println!("error: {err}"),
    }
    Ok(())
}

fn load_config(store: &TomlFile<Config>, overrides: &Overrides) -> Result<Config> {
    let mut cfg = store.load()?;
    overrides.apply(&mut cfg);
    Ok(cfg)
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("scrobble-presence").join("config.toml")
}

fn parse_button_mode(s: &str) -> Result<ButtonMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "off" => Ok(ButtonMode::Off),
        "track" => Ok(ButtonMode::Track),
        "profile" => Ok(ButtonMode::Profile),
        other => Err(format!("unknown button mode `{other}` (off, track, profile)")),
    }
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn spawn_reload_watchers(paths: Vec<PathBuf>, poll_ms: u64, tx: mpsc::Sender<()>) {
    let tx_poll = tx.clone();
    tokio::spawn(async move {
        let mut known: Vec<_> = paths.iter().map(|p| file_mtime(p)).collect();
        let sleep = Duration::from_millis(poll_ms.max(2_000));
        loop {
            tokio::time::sleep(sleep).await;
            let current: Vec<_> = paths.iter().map(|p| file_mtime(p)).collect();
            if current != known {
                known = current;
                if tx_poll.send(()).await.is_err() {
                    return;
                }
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        tokio::spawn(async move {
            if let Ok(mut sig) = signal(SignalKind::hangup()) {
                while sig.recv().await.is_some() {
                    if tx.send(()).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(unix)]
fn spawn_reconnect_signal(handle: ControllerHandle) {
    use tokio::signal::unix::{signal, SignalKind};
    tokio::spawn(async move {
        if let Ok(mut sig) = signal(SignalKind::user_defined1()) {
            while sig.recv().await.is_some() {
                info!("received SIGUSR1; reconnecting to discord");
                handle.force_reconnect();
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reconnect_signal(_handle: ControllerHandle) {}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::{parse_button_mode, Cli, Commands, ConfigAction, Paths};
    use clap::Parser;
    use scrobble_presence_core::ButtonMode;
    use std::path::PathBuf;

    #[test]
    fn credentials_sit_next_to_config() {
        let paths = Paths::resolve(Some(PathBuf::from("/tmp/sp/config.toml")));
        assert_eq!(paths.credentials, PathBuf::from("/tmp/sp/credentials.toml"));
    }

    #[test]
    fn button_modes_parse_case_insensitively() {
        assert_eq!(parse_button_mode("Profile"), Ok(ButtonMode::Profile));
        assert_eq!(parse_button_mode("off"), Ok(ButtonMode::Off));
        assert!(parse_button_mode("both").is_err());
    }

    #[test]
    fn parses_config_set() {
        let cli = Cli::try_parse_from([
            "scrobble-presence",
            "config",
            "set",
            "--identity",
            "music",
            "--run-on-startup",
            "true",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Config {
                action:
                    ConfigAction::Set {
                        identity,
                        run_on_startup,
                        buttons,
                        background,
                    },
            }) => {
                assert_eq!(identity.as_deref(), Some("music"));
                assert_eq!(run_on_startup, Some(true));
                assert_eq!(buttons, None);
                assert_eq!(background, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn hidden_and_json_conflict() {
        assert!(Cli::try_parse_from(["scrobble-presence", "run", "--hidden", "--json"]).is_err());
    }
}
