use crate::config::BrowserConfig;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

fn default_opener() -> &'static str {
    if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    }
}

/// The executable used to open URLs, if one can be found.
pub fn resolve_opener(cfg: &BrowserConfig) -> Option<PathBuf> {
    let configured = cfg.command.trim();
    let name = if configured.is_empty() {
        default_opener()
    } else {
        configured
    };
    if name.contains('/') {
        let path = PathBuf::from(name);
        return path.exists().then_some(path);
    }
    which::which(name).ok()
}

pub fn open_url(cfg: &BrowserConfig, url: &str) -> bool {
    let Some(opener) = resolve_opener(cfg) else {
        warn!(url, "no browser opener found; open the portal manually");
        return false;
    };
    let spawned = Command::new(&opener)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(mut child) => {
            info!(url, opener = %opener.display(), "browser opened");
            thread::spawn(move || {
                let _ = child.wait();
            });
            true
        }
        Err(err) => {
            warn!(url, opener = %opener.display(), error = %err, "failed to open browser");
            false
        }
    }
}

/// Opens `url` after the configured delay on a background thread.
pub fn open_after_delay(cfg: BrowserConfig, url: String) -> JoinHandle<bool> {
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(cfg.delay_ms));
        open_url(&cfg, &url)
    })
}
