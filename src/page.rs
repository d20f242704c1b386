use crate::apps::{load_apps, AppEntry};
use crate::assets::IconStore;
use crate::config::{ensure_parent, Portal};
use crate::docs::{index_docs, DocEntry};
use crate::error::PortalError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub const PORTAL_TITLE: &str = "LiveDistro Portal";
pub const NO_APPS_MESSAGE: &str = "No applications configured (create ldp.conf)";
pub const NO_DOCS_MESSAGE: &str = "No help documents";

/// Escapes text for HTML element content and quoted attribute values.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes text for a single- or double-quoted JavaScript string literal.
/// Markup-significant characters become `\uXXXX` so the literal cannot end
/// a surrounding `<script>` or attribute.
pub fn escape_js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '<' | '>' | '&' | '`' | '\u{2028}' | '\u{2029}' => {
                out.push_str(&format!("\\u{:04X}", ch as u32));
            }
            ch if ch.is_control() => out.push_str(&format!("\\u{:04X}", ch as u32)),
            _ => out.push(ch),
        }
    }
    out
}

/// HTML builder. Literal markup must be `'static`; runtime values only go in
/// through the escaping methods.
#[derive(Debug, Default)]
pub struct Markup {
    buf: String,
}

impl Markup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&mut self, markup: &'static str) -> &mut Self {
        self.buf.push_str(markup);
        self
    }

    pub fn text(&mut self, value: &str) -> &mut Self {
        self.buf.push_str(&escape_html(value));
        self
    }

    /// Appends ` name="value"`.
    pub fn attr(&mut self, name: &'static str, value: &str) -> &mut Self {
        self.buf.push(' ');
        self.buf.push_str(name);
        self.buf.push_str("=\"");
        self.buf.push_str(&escape_html(value));
        self.buf.push('"');
        self
    }

    /// Appends ` name="func('arg')"` with `arg` escaped for JS first and
    /// then for the attribute.
    pub fn js_call_attr(&mut self, name: &'static str, func: &'static str, arg: &str) -> &mut Self {
        let call = format!("{func}('{}')", escape_js_string(arg));
        self.attr(name, &call)
    }

    /// Appends a `background-image` declaration. Characters outside a
    /// conservative URL path set are dropped.
    pub fn background_css(&mut self, url: Option<&str>) -> &mut Self {
        let Some(url) = url else {
            return self;
        };
        let safe: String = url
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '/' | '.' | '_' | '-'))
            .collect();
        if safe.is_empty() {
            return self;
        }
        self.buf.push_str("background-image: url('");
        self.buf.push_str(&safe);
        self.buf
            .push_str("'); background-size: cover; background-attachment: fixed;");
        self
    }

    /// Rendered Markdown from the trusted docs root.
    pub fn trusted(&mut self, html: &str) -> &mut Self {
        self.buf.push_str(html);
        self
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

const INDEX_STYLE: &str = r#"
        .container { max-width: 900px; margin: 0 auto; padding: 20px; }
        header { text-align: center; margin-bottom: 20px; }
        h1 { margin: 0; font-size: 2.2em; }
        .tabs { display: flex; justify-content: center; gap: 2px; margin-bottom: 25px; }
        .tab {
            padding: 10px 24px;
            cursor: pointer;
            background: rgba(0,0,0,0.3);
            border: none;
            color: white;
            font-weight: bold;
        }
        .tab.active { background: rgba(60,120,255,0.4); border-radius: 6px 6px 0 0; }
        .tab-content { display: none; padding: 25px; border-radius: 12px; background: rgba(0, 0, 0, 0.25); }
        .tab-content.active { display: block; }
        .grid {
            display: grid;
            grid-template-columns: repeat(auto-fill, minmax(110px, 1fr));
            gap: 22px;
            justify-items: center;
        }
        .placeholder { text-align: center; }
        .shortcut { display: flex; flex-direction: column; align-items: center; width: 100px; cursor: pointer; }
        .shortcut-icon {
            width: 64px;
            height: 64px;
            display: flex;
            align-items: center;
            justify-content: center;
            font-size: 48px;
            border-radius: 12px;
            margin-bottom: 8px;
            background: rgba(255,255,255,0.15);
            box-shadow: 0 2px 6px rgba(0,0,0,0.3);
        }
        .shortcut-icon img { width: 100%; height: 100%; object-fit: contain; }
        .shortcut-label {
            text-align: center;
            font-size: 12px;
            line-height: 1.3;
            max-width: 100px;
            overflow: hidden;
            text-overflow: ellipsis;
        }
"#;

const INDEX_SCRIPT: &str = r#"
    <script>
        function switchTab(button, tabId) {
            document.querySelectorAll('.tab-content').forEach(el => el.classList.remove('active'));
            document.querySelectorAll('.tab').forEach(el => el.classList.remove('active'));
            document.getElementById(tabId).classList.add('active');
            button.classList.add('active');
        }

        async function launchApp(cmd) {
            try {
                const response = await fetch('/api/run_command', {
                    method: 'POST',
                    headers: { 'Content-Type': 'application/json' },
                    body: JSON.stringify({ cmd: cmd })
                });
                if (!response.ok) {
                    throw new Error('HTTP ' + response.status);
                }
                const result = await response.json();
                if (!result.ok) {
                    throw new Error('the command could not be started');
                }
            } catch (e) {
                alert('Launch failed: ' + (e && e.message ? e.message : e));
            }
        }

        function openDoc(relPath) {
            window.open('/render_md?path=' + encodeURIComponent(relPath), '_blank', 'width=900,height=700');
        }
    </script>
"#;

const DOC_STYLE: &str = r#"
        body { padding: 20px; }
        .content {
            max-width: 800px;
            margin: 0 auto;
            background: rgba(0, 0, 0, 0.25);
            padding: 25px;
            border-radius: 12px;
        }
        a { color: #bbf; }
        pre, code { background: rgba(0,0,0,0.4); padding: 8px; border-radius: 5px; overflow-x: auto; }
        table { border-collapse: collapse; }
        th, td { border: 1px solid rgba(255,255,255,0.3); padding: 4px 8px; }
        img { max-width: 100%; height: auto; }
"#;

fn open_document(page: &mut Markup, background_url: Option<&str>, extra_style: &'static str) {
    page.raw("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n")
        .raw("    <meta charset=\"UTF-8\">\n")
        .raw("    <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n")
        .raw("    <title>LiveDistro Portal</title>\n")
        .raw("    <style>\n        body {\n            margin: 0;\n            min-height: 100vh;\n            ")
        .background_css(background_url)
        .raw("\n            font-family: sans-serif;\n            color: white;\n")
        .raw("            text-shadow: 1px 1px 2px rgba(0,0,0,0.7);\n        }")
        .raw(extra_style)
        .raw("    </style>\n</head>\n<body>\n");
}

pub fn render_index_page(
    apps: &[AppEntry],
    docs: &[DocEntry],
    background_url: Option<&str>,
) -> String {
    let mut page = Markup::new();
    open_document(&mut page, background_url, INDEX_STYLE);
    page.raw("    <div class=\"container\">\n        <header>\n            <h1>")
        .text(PORTAL_TITLE)
        .raw("</h1>\n        </header>\n\n")
        .raw("        <div class=\"tabs\">\n")
        .raw("            <button class=\"tab active\" onclick=\"switchTab(this, 'apps')\">Apps</button>\n")
        .raw("            <button class=\"tab\" onclick=\"switchTab(this, 'docs')\">Docs</button>\n")
        .raw("        </div>\n\n");

    page.raw("        <div id=\"apps\" class=\"tab-content active\">\n");
    if apps.is_empty() {
        page.raw("            <p class=\"placeholder\">")
            .text(NO_APPS_MESSAGE)
            .raw("</p>\n");
    } else {
        page.raw("            <div class=\"grid\">\n");
        for app in apps {
            page.raw("                <div class=\"shortcut\"")
                .attr("title", &app.name)
                .js_call_attr("onclick", "launchApp", &app.exec)
                .raw(">\n                    <div class=\"shortcut-icon\"><img")
                .attr("src", &app.icon_url)
                .raw(" alt=\"\" loading=\"lazy\"></div>\n")
                .raw("                    <div class=\"shortcut-label\">")
                .text(&app.name)
                .raw("</div>\n                </div>\n");
        }
        page.raw("            </div>\n");
    }
    page.raw("        </div>\n\n");

    page.raw("        <div id=\"docs\" class=\"tab-content\">\n");
    if docs.is_empty() {
        page.raw("            <p class=\"placeholder\">")
            .text(NO_DOCS_MESSAGE)
            .raw("</p>\n");
    } else {
        page.raw("            <div class=\"grid\">\n");
        for doc in docs {
            page.raw("                <div class=\"shortcut\"")
                .attr("title", &doc.name)
                .js_call_attr("onclick", "openDoc", &doc.relative_path)
                .raw(">\n                    <div class=\"shortcut-icon\">&#x1F4D8;</div>\n")
                .raw("                    <div class=\"shortcut-label\">")
                .text(&doc.name)
                .raw("</div>\n                </div>\n");
        }
        page.raw("            </div>\n");
    }
    page.raw("        </div>\n    </div>\n")
        .raw(INDEX_SCRIPT)
        .raw("</body>\n</html>\n");
    page.into_string()
}

/// Wraps rendered Markdown in the document shell.
pub fn render_doc_page(body_html: &str, background_url: Option<&str>) -> String {
    let mut page = Markup::new();
    open_document(&mut page, background_url, DOC_STYLE);
    page.raw("    <div class=\"content\">\n")
        .trusted(body_html)
        .raw("\n    </div>\n</body>\n</html>\n");
    page.into_string()
}

/// Document shell holding a single escaped heading.
pub fn render_message_page(message: &str, background_url: Option<&str>) -> String {
    let mut page = Markup::new();
    open_document(&mut page, background_url, DOC_STYLE);
    page.raw("    <div class=\"content\">\n        <h2>")
        .text(message)
        .raw("</h2>\n    </div>\n</body>\n</html>\n");
    page.into_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPage {
    pub path: PathBuf,
    pub apps: usize,
    pub docs: usize,
    pub background: Option<String>,
    pub generated_at: DateTime<Utc>,
}

/// Rebuilds `index.html` from the current apps file and docs root.
pub fn generate_site(portal: &Portal) -> Result<GeneratedPage, PortalError> {
    let icons = IconStore::new(&portal.icons_dir);
    let apps = load_apps(&portal.apps_file, &icons);
    let docs = index_docs(&portal.docs_dir);
    let html = render_index_page(&apps, &docs, portal.background_url.as_deref());
    let path = portal.page_path();
    write_atomic_text_file(&path, &html)?;
    info!(
        path = %path.display(),
        apps = apps.len(),
        docs = docs.len(),
        "portal page generated"
    );
    Ok(GeneratedPage {
        path,
        apps: apps.len(),
        docs: docs.len(),
        background: portal.background_url.clone(),
        generated_at: Utc::now(),
    })
}

fn write_atomic_text_file(path: &Path, content: &str) -> Result<(), PortalError> {
    ensure_parent(path)?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let tmp_path = parent.join(format!(
        ".{}.tmp.{}.{}",
        path.file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "page".to_string()),
        pid,
        ts
    ));
    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
