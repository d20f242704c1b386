//! Loopback HTTP server for the portal.
//!
//! There is no authentication. The listener binds to `127.0.0.1` unless the
//! config says otherwise, and `/api/run_command` will run anything it is
//! given; reaching this server is equivalent to having a shell on the host.

use crate::config::Portal;
use crate::docs::render_markdown;
use crate::error::PortalError;
use crate::http::{read_http_request, write_http_response, HttpRequest, HttpResponse};
use crate::launcher::{run_command, CommandLauncher};
use crate::page::{render_doc_page, render_message_page};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const RENDER_MD_ROUTE: &str = "/render_md";
pub const RUN_COMMAND_ROUTE: &str = "/api/run_command";

pub struct ServerState {
    pub portal: Portal,
    pub launcher: Box<dyn CommandLauncher>,
}

#[derive(Debug, Deserialize)]
struct RunCommandRequest {
    cmd: String,
}

enum Resolved {
    Inside(PathBuf),
    Outside,
    Missing,
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves `relative` under `root` and checks containment after symlinks
/// and `..` have been resolved. Absolute inputs replace the root and so end
/// up outside it.
fn resolve_within(root: &Path, relative: &str) -> Resolved {
    let root = fs::canonicalize(root).unwrap_or_else(|_| normalize_lexically(root));
    let candidate = root.join(relative);
    match fs::canonicalize(&candidate) {
        Ok(resolved) if resolved.starts_with(&root) => Resolved::Inside(resolved),
        Ok(_) => Resolved::Outside,
        Err(_) => {
            if normalize_lexically(&candidate).starts_with(&root) {
                Resolved::Missing
            } else {
                Resolved::Outside
            }
        }
    }
}

pub fn handle_request(
    state: &ServerState,
    request: &HttpRequest,
) -> Result<HttpResponse, PortalError> {
    match request.path.as_str() {
        RENDER_MD_ROUTE => {
            if !matches!(request.method.as_str(), "GET" | "HEAD") {
                return Ok(HttpResponse::text(405, "method not allowed"));
            }
            Ok(handle_render_md(&state.portal, request))
        }
        RUN_COMMAND_ROUTE => {
            if request.method != "POST" {
                return Ok(HttpResponse::text(405, "method not allowed"));
            }
            handle_run_command(state, request)
        }
        path => {
            if !matches!(request.method.as_str(), "GET" | "HEAD") {
                return Ok(HttpResponse::text(405, "method not allowed"));
            }
            Ok(handle_static(&state.portal, path))
        }
    }
}

fn handle_render_md(portal: &Portal, request: &HttpRequest) -> HttpResponse {
    let background = portal.background_url.as_deref();
    let relative = match request.query.get("path") {
        Some(path) if !path.trim().is_empty() => path,
        _ => return HttpResponse::html(400, render_message_page("Path not specified", background)),
    };
    let path = match resolve_within(&portal.docs_dir, relative) {
        Resolved::Inside(path) => path,
        Resolved::Outside => {
            warn!(path = %relative, "rejected document path outside docs root");
            return HttpResponse::html(403, render_message_page("Access denied", background));
        }
        Resolved::Missing => {
            return HttpResponse::html(404, render_message_page("File not found", background));
        }
    };
    let rendered = fs::read(&path)
        .map_err(|err| err.to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|err| err.to_string()))
        .map(|text| render_markdown(&text));
    match rendered {
        Ok(body) => HttpResponse::html(200, render_doc_page(&body, background)),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "document render failed");
            HttpResponse::html(
                200,
                render_message_page(&format!("Render error: {err}"), background),
            )
        }
    }
}

fn handle_run_command(
    state: &ServerState,
    request: &HttpRequest,
) -> Result<HttpResponse, PortalError> {
    let payload: RunCommandRequest = match serde_json::from_slice(&request.body) {
        Ok(payload) => payload,
        Err(err) => {
            return HttpResponse::json(
                400,
                &json!({"ok": false, "error": format!("invalid run_command body: {err}")}),
            );
        }
    };
    let ok = run_command(state.launcher.as_ref(), &payload.cmd);
    HttpResponse::json(200, &json!({ "ok": ok }))
}

fn content_type_for(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}

fn handle_static(portal: &Portal, request_path: &str) -> HttpResponse {
    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() {
        "index.html"
    } else {
        relative
    };
    let path = match resolve_within(&portal.web_dir, relative) {
        Resolved::Inside(path) if path.is_file() => path,
        Resolved::Inside(_) | Resolved::Missing => return HttpResponse::text(404, "not found"),
        Resolved::Outside => return HttpResponse::text(403, "forbidden"),
    };
    match fs::read(&path) {
        Ok(body) => HttpResponse {
            status: 200,
            content_type: content_type_for(&path),
            body,
        },
        Err(err) => {
            warn!(path = %path.display(), error = %err, "static file read failed");
            HttpResponse::text(404, "not found")
        }
    }
}

fn handle_connection(mut stream: TcpStream, state: Arc<ServerState>) -> Result<(), PortalError> {
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let request = match read_http_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(err) => {
            let _ = write_http_response(&mut stream, &HttpResponse::text(400, "bad request"), false);
            return Err(err);
        }
    };
    let response = match handle_request(&state, &request) {
        Ok(response) => response,
        Err(err) => {
            warn!(path = %request.path, error = %err, "request handler failed");
            HttpResponse::text(500, "internal server error")
        }
    };
    debug!(
        method = %request.method,
        path = %request.path,
        status = response.status,
        agent = request.headers.get("user-agent").map(String::as_str).unwrap_or("-"),
        "request served"
    );
    write_http_response(&mut stream, &response, request.method == "HEAD")
}

pub fn bind(portal: &Portal) -> Result<TcpListener, io::Error> {
    TcpListener::bind(portal.bind_addr())
}

/// Accepts connections forever, one thread per connection.
pub fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<(), PortalError> {
    if !state.portal.is_loopback() {
        warn!(
            host = %state.portal.host,
            "portal bound to a non-loopback address; anyone who can reach it can run commands"
        );
    }
    info!(addr = %listener.local_addr()?, "portal listening");
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, state) {
                        debug!(error = %err, "connection closed with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(Duration::from_millis(250));
            }
        }
    }
    Ok(())
}

/// Succeeds when a portal answers on `base_url`.
pub fn portal_ping(base_url: &str) -> Result<(), PortalError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let response = client.get(format!("{base_url}/index.html")).send()?;
    if !response.status().is_success() {
        return Err(PortalError::Process(format!(
            "portal ping failed with status {}",
            response.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::launcher::DisabledLauncher;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingLauncher {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl CommandLauncher for RecordingLauncher {
        fn launch(&self, cmd: &str) -> Result<u32, io::Error> {
            self.calls.lock().unwrap().push(cmd.to_string());
            Ok(7)
        }
    }

    fn setup() -> (TempDir, ServerState, Arc<Mutex<Vec<String>>>) {
        let dir = tempdir().unwrap();
        let portal = Portal::from_config(&Config::default(), dir.path());
        fs::create_dir_all(&portal.docs_dir).unwrap();
        fs::create_dir_all(&portal.icons_dir).unwrap();
        fs::write(portal.docs_dir.join("guide.md"), "# Title\n\nSome *text*.\n").unwrap();
        fs::write(portal.page_path(), "<html>portal</html>").unwrap();
        let launcher = RecordingLauncher::default();
        let calls = Arc::clone(&launcher.calls);
        let state = ServerState {
            portal,
            launcher: Box::new(launcher),
        };
        (dir, state, calls)
    }

    #[test]
    fn render_md_returns_heading() {
        let (_dir, state, _) = setup();
        let response = handle_request(&state, &HttpRequest::get("/render_md?path=guide.md")).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "text/html; charset=utf-8");
        assert!(response.body_text().contains("<h1>Title</h1>"));
        assert!(response.body_text().contains("<em>text</em>"));
    }

    #[test]
    fn render_md_uses_background() {
        let (_dir, mut state, _) = setup();
        state.portal.background_url = Some("/background.png".to_string());
        let response = handle_request(&state, &HttpRequest::get("/render_md?path=guide.md")).unwrap();
        assert!(response.body_text().contains("url('/background.png')"));
    }

    #[test]
    fn render_md_requires_path() {
        let (_dir, state, _) = setup();
        for target in ["/render_md", "/render_md?path=", "/render_md?path=%20"] {
            let response = handle_request(&state, &HttpRequest::get(target)).unwrap();
            assert_eq!(response.status, 400, "{target}");
        }
    }

    #[test]
    fn render_md_rejects_traversal() {
        let (dir, state, _) = setup();
        fs::write(dir.path().join("secret.md"), "# secret").unwrap();
        fs::create_dir_all(dir.path().join("help_doc2")).unwrap();
        fs::write(dir.path().join("help_doc2").join("x.md"), "# x").unwrap();
        for target in [
            "/render_md?path=../../etc/passwd",
            "/render_md?path=..%2Fsecret.md",
            "/render_md?path=%2Fetc%2Fpasswd",
            "/render_md?path=../help_doc2/x.md",
            "/render_md?path=../nonexistent.md",
        ] {
            let response = handle_request(&state, &HttpRequest::get(target)).unwrap();
            assert_eq!(response.status, 403, "{target}");
            assert!(!response.body_text().contains("secret"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn render_md_rejects_symlink_escape() {
        let (dir, state, _) = setup();
        fs::write(dir.path().join("outside.md"), "# outside").unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("outside.md"),
            state.portal.docs_dir.join("link.md"),
        )
        .unwrap();
        let response = handle_request(&state, &HttpRequest::get("/render_md?path=link.md")).unwrap();
        assert_eq!(response.status, 403);
    }

    #[test]
    fn render_md_missing_file_is_404() {
        let (_dir, state, _) = setup();
        let response = handle_request(&state, &HttpRequest::get("/render_md?path=nope.md")).unwrap();
        assert_eq!(response.status, 404);
        let response =
            handle_request(&state, &HttpRequest::get("/render_md?path=sub/../nope.md")).unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn render_md_without_docs_dir_is_404() {
        let (_dir, state, _) = setup();
        fs::remove_dir_all(&state.portal.docs_dir).unwrap();
        let response = handle_request(&state, &HttpRequest::get("/render_md?path=guide.md")).unwrap();
        assert_eq!(response.status, 404);
    }

    #[test]
    fn render_failure_is_inline() {
        let (_dir, state, _) = setup();
        fs::write(state.portal.docs_dir.join("binary.md"), [0xff, 0xfe, 0x00]).unwrap();
        let response = handle_request(&state, &HttpRequest::get("/render_md?path=binary.md")).unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body_text().contains("Render error"));
    }

    #[test]
    fn render_md_rejects_post() {
        let (_dir, state, _) = setup();
        let request = HttpRequest::new("POST", "/render_md?path=guide.md", Vec::new());
        assert_eq!(handle_request(&state, &request).unwrap().status, 405);
    }

    #[test]
    fn run_command_invokes_launcher() {
        let (_dir, state, calls) = setup();
        let request = HttpRequest::new(
            "POST",
            RUN_COMMAND_ROUTE,
            br#"{"cmd":"xterm -e 'top'"}"#.to_vec(),
        );
        let response = handle_request(&state, &request).unwrap();
        assert_eq!(response.status, 200);
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(calls.lock().unwrap().as_slice(), ["xterm -e 'top'"]);
    }

    #[test]
    fn run_command_reports_launch_failure() {
        let (_dir, mut state, _) = setup();
        state.launcher = Box::new(DisabledLauncher);
        let request = HttpRequest::new("POST", RUN_COMMAND_ROUTE, br#"{"cmd":"true"}"#.to_vec());
        let response = handle_request(&state, &request).unwrap();
        assert_eq!(response.status, 200);
        let value: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(value["ok"], false);
    }

    #[test]
    fn run_command_rejects_bad_body_and_method() {
        let (_dir, state, calls) = setup();
        let request = HttpRequest::new("POST", RUN_COMMAND_ROUTE, b"not json".to_vec());
        assert_eq!(handle_request(&state, &request).unwrap().status, 400);
        let request = HttpRequest::get(RUN_COMMAND_ROUTE);
        assert_eq!(handle_request(&state, &request).unwrap().status, 405);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn static_files_are_served() {
        let (_dir, state, _) = setup();
        fs::write(state.portal.icons_dir.join("a.png"), b"\x89PNG").unwrap();
        let response = handle_request(&state, &HttpRequest::get("/index.html")).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "text/html; charset=utf-8");
        assert_eq!(response.body_text(), "<html>portal</html>");

        let root = handle_request(&state, &HttpRequest::get("/")).unwrap();
        assert_eq!(root.body, response.body);

        let icon = handle_request(&state, &HttpRequest::get("/icons/a.png")).unwrap();
        assert_eq!(icon.status, 200);
        assert_eq!(icon.content_type, "image/png");
    }

    #[test]
    fn static_rejects_escape_and_missing() {
        let (dir, state, _) = setup();
        fs::write(dir.path().join("ldp.conf"), "secret").unwrap();
        let escape = handle_request(&state, &HttpRequest::get("/../ldp.conf")).unwrap();
        assert_eq!(escape.status, 403);
        let encoded = handle_request(&state, &HttpRequest::get("/%2E%2E/ldp.conf")).unwrap();
        assert_eq!(encoded.status, 403);
        let missing = handle_request(&state, &HttpRequest::get("/nope.css")).unwrap();
        assert_eq!(missing.status, 404);
        let dir_listing = handle_request(&state, &HttpRequest::get("/icons")).unwrap();
        assert_eq!(dir_listing.status, 404);
        let post = HttpRequest::new("POST", "/index.html", Vec::new());
        assert_eq!(handle_request(&state, &post).unwrap().status, 405);
    }

    #[test]
    fn serves_over_tcp() {
        let (_dir, state, _) = setup();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state);
        thread::spawn(move || serve(listener, state));
        let base = format!("http://{addr}");
        portal_ping(&base).unwrap();
        let body = reqwest::blocking::get(format!("{base}/render_md?path=guide.md"))
            .unwrap()
            .text()
            .unwrap();
        assert!(body.contains("<h1>Title</h1>"));
    }
}
