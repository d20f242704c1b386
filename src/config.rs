use crate::error::PortalError;
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_YAML: &str = include_str!("../config/default.yaml");
pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub paths: Paths,
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub launcher: LauncherConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub apps_file: String,
    pub docs_dir: String,
    pub web_dir: String,
    pub background: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub open: bool,
    pub delay_ms: u64,
    /// Opener executable; empty means the platform default.
    pub command: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    pub enabled: bool,
    pub shell: String,
    pub login: bool,
    pub display: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            paths: Paths::default(),
            server: ServerConfig::default(),
            browser: BrowserConfig::default(),
            launcher: LauncherConfig::default(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            apps_file: "ldp.conf".to_string(),
            docs_dir: "help_doc".to_string(),
            web_dir: "web".to_string(),
            background: "Wal/wal.png".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            open: true,
            delay_ms: 1500,
            command: String::new(),
        }
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shell: "bash".to_string(),
            login: true,
            display: ":0".to_string(),
        }
    }
}

/// Resolved settings handed to every component at startup.
#[derive(Debug, Clone)]
pub struct Portal {
    pub base_dir: PathBuf,
    pub apps_file: PathBuf,
    pub docs_dir: PathBuf,
    pub web_dir: PathBuf,
    pub icons_dir: PathBuf,
    pub background_source: PathBuf,
    /// Set once the served root has been prepared and a background exists.
    pub background_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub browser: BrowserConfig,
    pub launcher: LauncherConfig,
}

impl Portal {
    pub fn from_config(cfg: &Config, base_dir: &Path) -> Self {
        let web_dir = resolve_path(&cfg.paths.web_dir, base_dir);
        Self {
            base_dir: base_dir.to_path_buf(),
            apps_file: resolve_path(&cfg.paths.apps_file, base_dir),
            docs_dir: resolve_path(&cfg.paths.docs_dir, base_dir),
            icons_dir: web_dir.join("icons"),
            web_dir,
            background_source: resolve_path(&cfg.paths.background, base_dir),
            background_url: None,
            host: cfg.server.host.clone(),
            port: cfg.server.port,
            browser: cfg.browser.clone(),
            launcher: cfg.launcher.clone(),
        }
    }

    pub fn page_path(&self) -> PathBuf {
        self.web_dir.join("index.html")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("http://{}:{}", host, self.port)
    }

    pub fn index_url(&self) -> String {
        format!("{}/index.html", self.base_url())
    }

    pub fn is_loopback(&self) -> bool {
        if self.host == "localhost" {
            return true;
        }
        self.host
            .parse::<IpAddr>()
            .map(|addr| addr.is_loopback())
            .unwrap_or(false)
    }
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var("LDPORTAL_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

pub fn resolve_base_dir(override_path: Option<&PathBuf>) -> PathBuf {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let chosen = if let Some(path) = override_path {
        path.clone()
    } else if let Ok(path) = env::var("LDPORTAL_BASE_DIR") {
        if path.trim().is_empty() {
            cwd.clone()
        } else {
            PathBuf::from(expand_path(&path))
        }
    } else {
        cwd.clone()
    };
    if chosen.is_absolute() {
        chosen
    } else {
        cwd.join(chosen)
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var("LDPORTAL_CONFIG_DIR") {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("ldportal");
    base
}

pub fn ensure_parent(path: &Path) -> Result<(), PortalError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

fn resolve_path(input: &str, base_dir: &Path) -> PathBuf {
    let expanded = PathBuf::from(expand_path(input.trim()));
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

pub fn read_config_from_str(content: &str) -> Result<Config, PortalError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate_config(&cfg)?;
    Ok(cfg)
}

/// Missing config file means defaults.
pub fn load_config(path: &Path) -> Result<Config, PortalError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

pub fn validate_config(cfg: &Config) -> Result<(), PortalError> {
    if cfg.version != CONFIG_VERSION {
        return Err(PortalError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    for (field, value) in [
        ("paths.apps_file", &cfg.paths.apps_file),
        ("paths.docs_dir", &cfg.paths.docs_dir),
        ("paths.web_dir", &cfg.paths.web_dir),
    ] {
        if value.trim().is_empty() {
            return Err(PortalError::Config(format!("{field} must not be empty")));
        }
    }
    if cfg.server.host.trim().is_empty() {
        return Err(PortalError::Config(
            "server.host must not be empty".to_string(),
        ));
    }
    if cfg.server.port == 0 {
        return Err(PortalError::Config(
            "server.port must be a fixed, non-zero port".to_string(),
        ));
    }
    if cfg.launcher.shell.trim().is_empty() {
        return Err(PortalError::Config(
            "launcher.shell must not be empty".to_string(),
        ));
    }
    Ok(())
}
