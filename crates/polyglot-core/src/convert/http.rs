//! HTTP/1.x request parsing and construction.
//!
//! Only requests are handled; the gateway translates client traffic, not
//! server responses. Framing: headers end at the first blank line, the
//! body length comes from `Content-Length` (absent means empty body).

use crate::error::TranslateError;

/// Headers that have an explicit mapping in the HTTP-sourced pairs.
///
/// HTTP -> MQTT maps the path to the topic and the body to the payload;
/// `Host`, `Content-Length` and `Content-Type` are consumed by framing.
/// Every other header is dropped and counted.
pub const MAPPED_HEADERS: [&str; 3] = ["host", "content-length", "content-type"];

/// A parsed HTTP/1.x request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method (GET, POST, ...)
    pub method: String,
    /// Request target path
    pub path: String,
    /// Protocol version string ("HTTP/1.1")
    pub version: String,
    /// Header name/value pairs in arrival order, names lowercased
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Value of a header, if present
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Number of headers with no mapping in the HTTP-sourced pairs
    pub fn unmapped_headers(&self) -> u64 {
        self.headers
            .iter()
            .filter(|(k, _)| !MAPPED_HEADERS.contains(&k.as_str()))
            .count() as u64
    }
}

/// Try to parse one complete request from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((request,
/// consumed)))` on success, and an error only for input that can never
/// become a valid request.
pub fn parse_request(buf: &[u8]) -> Result<Option<(HttpRequest, usize)>, TranslateError> {
    // A request line has a space within the longest method + 1 bytes
    if buf.len() >= 9 && !buf[..9].contains(&b' ') {
        return Err(TranslateError::MalformedFrame(
            "no request line".to_string(),
        ));
    }

    let Some(header_end) = find_blank_line(buf) else {
        return Ok(None);
    };

    let head = std::str::from_utf8(&buf[..header_end])
        .map_err(|_| TranslateError::MalformedFrame("non-utf8 header block".to_string()))?;
    let mut lines = head.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| TranslateError::MalformedFrame("empty header block".to_string()))?;
    let mut parts = request_line.split(' ');
    let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(p), Some(v), None) if v.starts_with("HTTP/") && !m.is_empty() => {
            (m.to_string(), p.to_string(), v.to_string())
        }
        _ => {
            return Err(TranslateError::MalformedFrame(format!(
                "bad request line: {request_line:?}"
            )));
        }
    };

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            TranslateError::MalformedFrame(format!("bad header line: {line:?}"))
        })?;
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let body_len = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, v)) => v.parse::<usize>().map_err(|_| {
            TranslateError::MalformedFrame(format!("bad content-length: {v:?}"))
        })?,
        None => 0,
    };

    let body_start = header_end + 4;
    if buf.len() < body_start + body_len {
        return Ok(None);
    }

    let request = HttpRequest {
        method,
        path,
        version,
        headers,
        body: buf[body_start..body_start + body_len].to_vec(),
    };
    Ok(Some((request, body_start + body_len)))
}

/// Serialize a request, used by the MQTT -> HTTP direction.
///
/// Field mapping: topic -> path, payload -> body, CONNECT client id (when
/// one was seen earlier in the session) -> `x-client-id`. The synthetic
/// request is always a POST with an octet-stream body.
pub fn build_request(path: &str, body: &[u8], client_id: Option<&str>) -> Vec<u8> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut head = format!(
        "POST {path} HTTP/1.1\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\n",
        body.len()
    );
    if let Some(id) = client_id {
        head.push_str(&format!("x-client-id: {id}\r\n"));
    }
    head.push_str("\r\n");
    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
