use crate::config::Portal;
use crate::error::PortalError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const FALLBACK_ICON_URL: &str = "/icons/fallback.png";
const FALLBACK_ICON_NAME: &str = "fallback.png";
// 1x1 transparent PNG.
const FALLBACK_ICON_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP4/5+hHgAHggJ/PchI7wAAAABJRU5ErkJggg==";
const BACKGROUND_STEM: &str = "background";

/// Maps a file name onto `[A-Za-z0-9._-]`; every other character becomes `_`.
/// Distinct names can collapse onto the same result and then share one file.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct IconStore {
    icons_dir: PathBuf,
}

impl IconStore {
    pub fn new(icons_dir: impl Into<PathBuf>) -> Self {
        Self {
            icons_dir: icons_dir.into(),
        }
    }

    #[cfg(test)]
    pub fn icons_dir(&self) -> &Path {
        &self.icons_dir
    }

    /// Writes the fallback icon unless it is already present.
    pub fn ensure_fallback(&self) -> Result<PathBuf, PortalError> {
        let target = self.icons_dir.join(FALLBACK_ICON_NAME);
        if target.exists() {
            return Ok(target);
        }
        let data = STANDARD.decode(FALLBACK_ICON_PNG_B64).map_err(|err| {
            PortalError::Process(format!("failed to decode fallback icon: {err}"))
        })?;
        fs::create_dir_all(&self.icons_dir)?;
        fs::write(&target, data)?;
        debug!(path = %target.display(), "fallback icon written");
        Ok(target)
    }

    /// Returns a servable URL for `source`, falling back to the placeholder
    /// icon whenever the source is missing or cannot be copied.
    pub fn resolve_icon(&self, source: &Path) -> String {
        match self.sync_icon(source) {
            Ok(Some((url, _))) => url,
            Ok(None) => {
                debug!(source = %source.display(), "icon source missing");
                self.fallback_url()
            }
            Err(err) => {
                warn!(source = %source.display(), error = %err, "icon copy failed");
                self.fallback_url()
            }
        }
    }

    fn fallback_url(&self) -> String {
        if let Err(err) = self.ensure_fallback() {
            warn!(error = %err, "unable to create fallback icon");
        }
        FALLBACK_ICON_URL.to_string()
    }

    /// `Ok(None)` when the source does not exist; otherwise the URL and
    /// whether a copy was made.
    fn sync_icon(&self, source: &Path) -> Result<Option<(String, bool)>, io::Error> {
        if !source.exists() {
            return Ok(None);
        }
        let Some(file_name) = source.file_name() else {
            return Ok(None);
        };
        let safe_name = sanitize_file_name(&file_name.to_string_lossy());
        let target = self.icons_dir.join(&safe_name);
        let copied = copy_if_stale(source, &target)?;
        Ok(Some((format!("/icons/{safe_name}"), copied)))
    }
}

/// Copies only when `target` is absent or strictly older than `source`.
/// The copy keeps the source modification time.
fn copy_if_stale(source: &Path, target: &Path) -> Result<bool, io::Error> {
    let source_mtime = fs::metadata(source)?.modified()?;
    let stale = match fs::metadata(target) {
        Ok(meta) => meta.modified()? < source_mtime,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => return Err(err),
    };
    if !stale {
        return Ok(false);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)?;
    let preserved = fs::File::options()
        .write(true)
        .open(target)
        .and_then(|file| file.set_modified(source_mtime));
    if let Err(err) = preserved {
        debug!(path = %target.display(), error = %err, "could not preserve icon mtime");
    }
    Ok(true)
}

fn background_file_name(source: &Path) -> String {
    let ext = source
        .extension()
        .map(|ext| sanitize_file_name(&ext.to_string_lossy()).to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "png".to_string());
    format!("{BACKGROUND_STEM}.{ext}")
}

/// Copies the background image once; an existing copy is never refreshed.
/// Returns the background URL when a copy exists in the served root.
pub fn install_background(source: &Path, web_dir: &Path) -> Option<String> {
    let file_name = background_file_name(source);
    let target = web_dir.join(&file_name);
    if !target.exists() && source.is_file() {
        match fs::copy(source, &target) {
            Ok(_) => info!(path = %target.display(), "background installed"),
            Err(err) => warn!(source = %source.display(), error = %err, "background copy failed"),
        }
    }
    if target.is_file() {
        Some(format!("/{file_name}"))
    } else {
        None
    }
}

/// Creates the served root and icon directory, the fallback icon and the
/// background copy, then records the background URL on `portal`.
pub fn prepare_served_root(portal: &mut Portal) -> Result<(), PortalError> {
    fs::create_dir_all(&portal.web_dir)?;
    fs::create_dir_all(&portal.icons_dir)?;
    let store = IconStore::new(&portal.icons_dir);
    if let Err(err) = store.ensure_fallback() {
        warn!(error = %err, "unable to create fallback icon");
    }
    portal.background_url = install_background(&portal.background_source, &portal.web_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_file_name("my icon (1).png"), "my_icon__1_.png");
        assert_eq!(sanitize_file_name("ok-name_2.svg"), "ok-name_2.svg");
        assert_eq!(sanitize_file_name("значок.png"), "______.png");
        let out = sanitize_file_name("a/b\\c<d>\"e'f.png");
        assert!(out
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-')));
    }

    #[test]
    fn colliding_names_share_one_file() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let first = src.join("a b.png");
        let second = src.join("a+b.png");
        fs::write(&first, b"first").unwrap();
        fs::write(&second, b"second").unwrap();
        let store = IconStore::new(dir.path().join("icons"));
        let url_a = store.resolve_icon(&first);
        let url_b = store.resolve_icon(&second);
        assert_eq!(url_a, "/icons/a_b.png");
        assert_eq!(url_a, url_b);
        let names: Vec<_> = fs::read_dir(store.icons_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn missing_source_returns_fallback_and_creates_it() {
        let dir = tempdir().unwrap();
        let store = IconStore::new(dir.path().join("icons"));
        let url = store.resolve_icon(&dir.path().join("nope.png"));
        assert_eq!(url, FALLBACK_ICON_URL);
        let fallback = store.icons_dir().join("fallback.png");
        let bytes = fs::read(fallback).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn copy_happens_once_for_unchanged_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("icon.png");
        fs::write(&source, b"png").unwrap();
        let store = IconStore::new(dir.path().join("icons"));

        let first = store.sync_icon(&source).unwrap().unwrap();
        assert_eq!(first, ("/icons/icon.png".to_string(), true));
        let second = store.sync_icon(&source).unwrap().unwrap();
        assert_eq!(second, ("/icons/icon.png".to_string(), false));
    }

    #[test]
    fn newer_source_is_recopied() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("icon.png");
        fs::write(&source, b"v1").unwrap();
        let store = IconStore::new(dir.path().join("icons"));
        store.sync_icon(&source).unwrap();

        fs::write(&source, b"v2").unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let (_, copied) = store.sync_icon(&source).unwrap().unwrap();
        assert!(copied);
        assert_eq!(fs::read(store.icons_dir().join("icon.png")).unwrap(), b"v2");
    }

    #[test]
    fn background_copied_once_and_not_refreshed() {
        let dir = tempdir().unwrap();
        let web = dir.path().join("web");
        fs::create_dir_all(&web).unwrap();
        let source = dir.path().join("wal.JPG");
        fs::write(&source, b"one").unwrap();

        let url = install_background(&source, &web);
        assert_eq!(url.as_deref(), Some("/background.jpg"));

        fs::write(&source, b"two").unwrap();
        install_background(&source, &web);
        assert_eq!(fs::read(web.join("background.jpg")).unwrap(), b"one");
    }

    #[test]
    fn missing_background_yields_none() {
        let dir = tempdir().unwrap();
        assert!(install_background(&dir.path().join("none.png"), dir.path()).is_none());
    }

    #[test]
    fn prepare_creates_layout() {
        let dir = tempdir().unwrap();
        let mut portal = Portal::from_config(&Config::default(), dir.path());
        prepare_served_root(&mut portal).unwrap();
        assert!(portal.icons_dir.join("fallback.png").is_file());
        assert!(portal.background_url.is_none());
    }
}
