use scrobble_presence_engine::{Notification, UiSink};
use std::io::Write;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Log only; nothing on stdout.
    Hidden,
    Text,
    Json,
}

/// Terminal stand-in for the settings window.
#[derive(Debug)]
pub struct ConsoleUi {
    output: Output,
}

impl ConsoleUi {
    pub fn new(output: Output) -> Self {
        Self { output }
    }
}

impl UiSink for ConsoleUi {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::CurrentTrack(Some(payload)) => {
                info!(details = %payload.details, state = %payload.state, "now playing")
            }
            Notification::CurrentTrack(None) => info!("nothing playing"),
            Notification::ConnectionStatus(connected) => info!(connected, "discord status"),
            Notification::Error(err) => error!(kind = ?err.kind, "{}", err.message),
        }

        let line = match self.output {
            Output::Hidden => return,
            Output::Text => render(notification),
            Output::Json => match serde_json::to_string(notification) {
                Ok(line) => line,
                Err(err) => {
                    error!(error = %err, "could not encode notification");
                    return;
                }
            },
        };
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
    }
}

pub fn render(notification: &Notification) -> String {
    match notification {
        Notification::CurrentTrack(Some(payload)) => {
            format!("♪ {} / {}", payload.details, payload.state)
        }
        Notification::CurrentTrack(None) => "♪ -".to_string(),
        Notification::ConnectionStatus(true) => "discord: connected".to_string(),
        Notification::ConnectionStatus(false) => "discord: disconnected".to_string(),
        Notification::Error(err) => format!("error: {}", err.message),
    }
}
