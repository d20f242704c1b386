use pulldown_cmark::{html, Options, Parser};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocEntry {
    pub name: String,
    /// File name relative to the docs root; passed back to `/render_md`.
    pub relative_path: String,
}

/// Lists `*.md` files directly under `docs_dir`, sorted by name. A missing
/// directory yields an empty list.
pub fn index_docs(docs_dir: &Path) -> Vec<DocEntry> {
    let entries = match fs::read_dir(docs_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %docs_dir.display(), error = %err, "docs directory unavailable");
            return Vec::new();
        }
    };
    let mut docs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable docs entry");
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.starts_with('.') {
            continue;
        }
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());
        docs.push(DocEntry {
            name,
            relative_path: file_name,
        });
    }
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    docs
}

pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(text, options);
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_markdown_files_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b-guide.md"), "# B").unwrap();
        fs::write(dir.path().join("a intro.md"), "# A").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join(".hidden.md"), "x").unwrap();
        fs::create_dir_all(dir.path().join("nested.md")).unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("deep.md"), "x").unwrap();

        let docs = index_docs(dir.path());
        assert_eq!(
            docs,
            vec![
                DocEntry {
                    name: "a intro".to_string(),
                    relative_path: "a intro.md".to_string(),
                },
                DocEntry {
                    name: "b-guide".to_string(),
                    relative_path: "b-guide.md".to_string(),
                },
            ]
        );
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        assert!(index_docs(&dir.path().join("help_doc")).is_empty());
    }

    #[test]
    fn renders_headings_and_tables() {
        let html = render_markdown("# Title\n\n| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<table>"));
    }
}
