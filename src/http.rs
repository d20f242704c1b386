use crate::error::PortalError;
use std::collections::BTreeMap;
use std::io::{Read, Write};

const MAX_HEADER_BYTES: usize = 64 * 1024;
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Percent-decoded path without the query string.
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[cfg(test)]
impl HttpRequest {
    pub fn get(target: &str) -> Self {
        Self::new("GET", target, Vec::new())
    }

    pub fn new(method: &str, target: &str, body: Vec<u8>) -> Self {
        let (path, query) = split_target(target);
        Self {
            method: method.to_string(),
            path,
            query,
            headers: BTreeMap::new(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8".to_string(),
            body: body.into_bytes(),
        }
    }

    pub fn json(status: u16, payload: &serde_json::Value) -> Result<Self, PortalError> {
        Ok(Self {
            status,
            content_type: "application/json".to_string(),
            body: serde_json::to_vec(payload)?,
        })
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[cfg(test)]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

pub fn parse_query_map(query: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for pair in query.split('&') {
        if pair.trim().is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            result.insert(decode_component(key), decode_component(value));
        } else {
            result.insert(decode_component(pair), String::new());
        }
    }
    result
}

fn split_target(target: &str) -> (String, BTreeMap<String, String>) {
    let (raw_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, parse_query_map(query)),
        None => (target, BTreeMap::new()),
    };
    let path = match urlencoding::decode(raw_path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw_path.to_string(),
    };
    (path, query)
}

/// Reads one request. `Ok(None)` means the peer closed before sending.
pub fn read_http_request<S: Read>(stream: &mut S) -> Result<Option<HttpRequest>, PortalError> {
    let mut buf = Vec::new();
    let mut header_end: Option<usize> = None;
    let mut chunk = [0u8; 1024];
    while header_end.is_none() {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buf.windows(4).position(|window| window == b"\r\n\r\n") {
            header_end = Some(pos);
        }
        if buf.len() > MAX_HEADER_BYTES && header_end.is_none() {
            return Err(PortalError::Process("request headers too large".to_string()));
        }
    }
    let header_end = header_end
        .ok_or_else(|| PortalError::Process("request missing header delimiter".to_string()))?;
    let header_text = String::from_utf8_lossy(&buf[..header_end]);
    let mut lines = header_text.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| PortalError::Process("request missing request line".to_string()))?;
    let mut request_parts = request_line.split_whitespace();
    let method = request_parts
        .next()
        .ok_or_else(|| PortalError::Process("request missing method".to_string()))?
        .to_string();
    let target = request_parts
        .next()
        .ok_or_else(|| PortalError::Process("request missing target".to_string()))?;
    let (path, query) = split_target(target);
    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(PortalError::Process("request body too large".to_string()));
    }
    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..read]);
    }
    if buf.len() < body_start + content_length {
        return Err(PortalError::Process(
            "request ended before full body was received".to_string(),
        ));
    }
    let body = buf[body_start..body_start + content_length].to_vec();
    Ok(Some(HttpRequest {
        method,
        path,
        query,
        headers,
        body,
    }))
}

/// Writes `response`; `head_only` omits the body but keeps its length.
pub fn write_http_response<S: Write>(
    stream: &mut S,
    response: &HttpResponse,
    head_only: bool,
) -> Result<(), PortalError> {
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        response.content_type,
        response.body.len()
    );
    stream.write_all(header.as_bytes())?;
    if !head_only {
        stream.write_all(&response.body)?;
    }
    stream.flush()?;
    Ok(())
}
