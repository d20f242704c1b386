//! Host command execution for the portal's launch tiles.
//!
//! Whatever string reaches [`run_command`] is handed to a shell verbatim.
//! That is the intended capability: the server binds to loopback and the
//! apps file is trusted. A policy that restricts launches belongs behind
//! [`CommandLauncher`], not in the HTTP layer.

use crate::config::LauncherConfig;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{info, warn};

pub trait CommandLauncher: Send + Sync {
    /// Starts `cmd` without waiting for it; returns the child pid.
    fn launch(&self, cmd: &str) -> Result<u32, io::Error>;
}

#[derive(Debug, Clone)]
pub struct ShellLauncher {
    shell: PathBuf,
    login: bool,
    display: String,
}

impl ShellLauncher {
    pub fn new(shell: impl Into<PathBuf>, login: bool, display: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            login,
            display: display.into(),
        }
    }

    /// Bare shell names are looked up on `PATH`; an unresolved name is kept
    /// so the failure surfaces at spawn time.
    pub fn from_config(cfg: &LauncherConfig) -> Self {
        let configured = cfg.shell.trim();
        let shell = if configured.contains('/') {
            PathBuf::from(configured)
        } else {
            which::which(configured).unwrap_or_else(|_| PathBuf::from(configured))
        };
        Self::new(shell, cfg.login, cfg.display.clone())
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    fn build_command(&self, cmd: &str) -> Command {
        let mut command = Command::new(&self.shell);
        if self.login {
            command.arg("-l");
        }
        command.arg("-c").arg(cmd);
        if env::var_os("DISPLAY").is_none() && !self.display.is_empty() {
            command.env("DISPLAY", &self.display);
        }
        command.stdin(Stdio::null());
        command.stdout(Stdio::null());
        command.stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

impl CommandLauncher for ShellLauncher {
    fn launch(&self, cmd: &str) -> Result<u32, io::Error> {
        let mut child = self.build_command(cmd).spawn()?;
        let pid = child.id();
        // Reap without holding up the caller.
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }
}

/// Stands in for [`ShellLauncher`] when `launcher.enabled` is false.
#[derive(Debug, Clone, Default)]
pub struct DisabledLauncher;

impl CommandLauncher for DisabledLauncher {
    fn launch(&self, _cmd: &str) -> Result<u32, io::Error> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "command launching is disabled by configuration",
        ))
    }
}

pub fn launcher_from_config(cfg: &LauncherConfig) -> Box<dyn CommandLauncher> {
    if cfg.enabled {
        Box::new(ShellLauncher::from_config(cfg))
    } else {
        Box::new(DisabledLauncher)
    }
}

/// `true` once the process has been spawned; the command's own outcome is
/// never observed. Failures are logged and reported as `false`.
pub fn run_command(launcher: &dyn CommandLauncher, cmd: &str) -> bool {
    if cmd.trim().is_empty() {
        warn!("refusing to launch an empty command");
        return false;
    }
    match launcher.launch(cmd) {
        Ok(pid) => {
            info!(pid, command = cmd, "command launched");
            true
        }
        Err(err) => {
            warn!(command = cmd, error = %err, "command launch failed");
            false
        }
    }
}
