use crate::assets::IconStore;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

pub const ENTRY_DELIMITER: &str = "***";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppEntry {
    pub name: String,
    pub exec: String,
    pub icon_url: String,
}

/// One block of the apps file before its icon has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAppEntry {
    pub name: String,
    pub exec: String,
    pub icon_path: String,
}

/// Splits the apps file into blocks on `***` lines. A block needs three
/// non-blank lines (name, command, icon path); shorter blocks are dropped
/// and anything past the third line is ignored.
pub fn parse_apps_str(content: &str) -> Vec<RawAppEntry> {
    let mut entries = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in content.lines().chain(std::iter::once(ENTRY_DELIMITER)) {
        let line = line.trim();
        if line == ENTRY_DELIMITER {
            if let [name, exec, icon_path, ..] = block.as_slice() {
                entries.push(RawAppEntry {
                    name: name.to_string(),
                    exec: exec.to_string(),
                    icon_path: icon_path.to_string(),
                });
            } else if !block.is_empty() {
                debug!(lines = block.len(), "skipping incomplete app entry");
            }
            block.clear();
            continue;
        }
        if !line.is_empty() {
            block.push(line);
        }
    }
    entries
}

/// Reads the apps file and resolves every icon through `icons`. A missing
/// or unreadable file yields an empty list.
pub fn load_apps(path: &Path, icons: &IconStore) -> Vec<AppEntry> {
    if !path.exists() {
        debug!(path = %path.display(), "apps file not found");
        return Vec::new();
    }
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unable to read apps file");
            return Vec::new();
        }
    };
    parse_apps_str(&content)
        .into_iter()
        .map(|raw| AppEntry {
            icon_url: icons.resolve_icon(Path::new(&raw.icon_path)),
            name: raw.name,
            exec: raw.exec,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::FALLBACK_ICON_URL;
    use tempfile::tempdir;

    #[test]
    fn well_formed_entries_survive_in_order() {
        let content = "\
Terminal
xterm
/usr/share/icons/term.png
***

Editor

gedit --new-window
/usr/share/icons/editor.png
extra line is ignored
***
Broken
only-two-lines
***
***
Files
nautilus
/icons/files.png
";
        let entries = parse_apps_str(content);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "Terminal");
        assert_eq!(entries[1].name, "Editor");
        assert_eq!(entries[1].exec, "gedit --new-window");
        assert_eq!(entries[1].icon_path, "/usr/share/icons/editor.png");
        assert_eq!(entries[2].name, "Files");
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let entries = parse_apps_str("  Name  \n\t cmd --flag \n icon.png \n  ***  \n");
        assert_eq!(
            entries,
            vec![RawAppEntry {
                name: "Name".to_string(),
                exec: "cmd --flag".to_string(),
                icon_path: "icon.png".to_string(),
            }]
        );
    }

    #[test]
    fn empty_and_delimiter_only_files_yield_nothing() {
        assert!(parse_apps_str("").is_empty());
        assert!(parse_apps_str("***\n***\n\n").is_empty());
    }

    #[test]
    fn missing_file_yields_empty_list() {
        let dir = tempdir().unwrap();
        let icons = IconStore::new(dir.path().join("icons"));
        assert!(load_apps(&dir.path().join("ldp.conf"), &icons).is_empty());
    }

    #[test]
    fn load_resolves_icons() {
        let dir = tempdir().unwrap();
        let icon = dir.path().join("my icon.png");
        fs::write(&icon, b"png").unwrap();
        let conf = dir.path().join("ldp.conf");
        fs::write(
            &conf,
            format!(
                "Present\nrun-a\n{}\n***\nMissing\nrun-b\n{}\n",
                icon.display(),
                dir.path().join("gone.png").display()
            ),
        )
        .unwrap();
        let icons = IconStore::new(dir.path().join("web").join("icons"));
        let apps = load_apps(&conf, &icons);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].icon_url, "/icons/my_icon.png");
        assert_eq!(apps[1].icon_url, FALLBACK_ICON_URL);
    }
}
