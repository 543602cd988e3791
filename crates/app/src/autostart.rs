use anyhow::{Context, Result};
use scrobble_presence_engine::Autostart;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ENTRY_NAME: &str = "scrobble-presence.desktop";

/// Login-session autostart through an XDG `.desktop` entry.
#[derive(Debug, Clone)]
pub struct XdgAutostart {
    dir: Option<PathBuf>,
    exe: PathBuf,
}

impl XdgAutostart {
    pub fn new(dir: Option<PathBuf>, exe: PathBuf) -> Self {
        Self { dir, exe }
    }

    /// `~/.config/autostart` pointing at the running binary.
    pub fn for_current_user() -> Self {
        let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("scrobble-presence"));
        Self::new(dirs::config_dir().map(|d| d.join("autostart")), exe)
    }

    fn entry_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(ENTRY_NAME))
    }
}

impl Autostart for XdgAutostart {
    fn apply(&self, enabled: bool, hidden: bool) -> Result<()> {
        if !cfg!(target_os = "linux") {
            warn!("start with session is only supported on linux; setting saved but not applied");
            return Ok(());
        }
        let Some(path) = self.entry_path() else {
            warn!("no config directory; cannot register autostart");
            return Ok(());
        };

        if !enabled {
            return remove_entry(&path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, desktop_entry(&self.exe, hidden))
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), hidden, "autostart entry written");
        Ok(())
    }
}

fn remove_entry(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "autostart entry removed");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn desktop_entry(exe: &Path, hidden: bool) -> String {
    let mut exec = format!("\"{}\" run", exe.display());
    if hidden {
        exec.push_str(" --hidden");
    }
    format!(
        "[Desktop Entry]\n\
         Type=Application\n\
         Name=Scrobble Presence\n\
         Comment=Last.fm now playing in Discord\n\
         Exec={exec}\n\
         Terminal=false\n\
         X-GNOME-Autostart-enabled=true\n"
    )
}

#[cfg(test)]
mod tests {
    use super::{desktop_entry, XdgAutostart, ENTRY_NAME};
    use scrobble_presence_engine::Autostart;
    use std::path::{Path, PathBuf};

    #[test]
    fn hidden_start_adds_flag() {
        let entry = desktop_entry(Path::new("/usr/bin/scrobble-presence"), true);
        assert!(entry.contains("Exec=\"/usr/bin/scrobble-presence\" run --hidden\n"));

        let entry = desktop_entry(Path::new("/usr/bin/scrobble-presence"), false);
        assert!(entry.contains("Exec=\"/usr/bin/scrobble-presence\" run\n"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn enable_then_disable() {
        let dir = tempfile::tempdir().unwrap();
        let autostart = XdgAutostart::new(
            Some(dir.path().to_path_buf()),
            PathBuf::from("/opt/scrobble-presence"),
        );
        let entry = dir.path().join(ENTRY_NAME);

        autostart.apply(true, false).unwrap();
        assert!(entry.exists());

        autostart.apply(false, false).unwrap();
        assert!(!entry.exists());

        // disabling twice is fine
        autostart.apply(false, false).unwrap();
    }
}
