//! HTTP request/response codec: splits a byte buffer into start-line,
//! ordered header list and body, and can reserialize.
//!
//! Grounded in `original_source/RequestPacket.py` and `ResponsePacket.py`,
//! built on `httparse` the way the teacher's `parse_request`/
//! `parse_response` free functions do, generalized to own their data so a
//! parsed message can outlive the read buffer across `.await` points.

use crate::error::ProxyError;
use crate::time::HttpDate;

const MAX_HEADERS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepAliveParam {
    Timeout,
    Max,
}

fn header_list(raw: &[httparse::Header<'_>]) -> Vec<(String, String)> {
    raw.iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    if let Some(entry) = headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        entry.1 = value;
    } else {
        headers.push((name.to_string(), value));
    }
}

/// For a non-`CONNECT` request, strips absolute-URI scheme and host to
/// leave the origin-form path; for `CONNECT`, strips the trailing `:port`.
fn compute_file_path(method: &str, target: &str) -> String {
    if method.eq_ignore_ascii_case("connect") {
        return match target.rfind(':') {
            Some(idx) => target[..idx].to_string(),
            None => target.to_string(),
        };
    }
    if let Some(scheme_end) = target.find("://") {
        let after_scheme = &target[scheme_end + 3..];
        return match after_scheme.find('/') {
            Some(slash) => after_scheme[slash..].to_string(),
            None => "/".to_string(),
        };
    }
    target.to_string()
}

#[derive(Clone, Debug)]
pub struct Request {
    method: String,
    /// Request-target as it will be reserialized to origin: already
    /// reduced to origin-form via `compute_file_path` at parse time, the
    /// only start-line mutation the codec performs before forwarding.
    target: String,
    version: u8,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    pub fn parse(data: &[u8]) -> Result<Self, ProxyError> {
        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut raw_headers);
        match req.parse(data) {
            Ok(httparse::Status::Complete(header_len)) => {
                let method = req
                    .method
                    .ok_or_else(|| ProxyError::ParseError("missing method".into()))?
                    .to_string();
                let raw_target = req
                    .path
                    .ok_or_else(|| ProxyError::ParseError("missing request-target".into()))?;
                let version = req.version.unwrap_or(1);
                let headers = header_list(req.headers);
                let target = compute_file_path(&method, raw_target);
                Ok(Self {
                    method,
                    target,
                    version,
                    headers,
                    body: data[header_len..].to_vec(),
                })
            }
            Ok(httparse::Status::Partial) => {
                Err(ProxyError::ParseError("partial request".into()))
            }
            Err(e) => Err(ProxyError::ParseError(e.to_string())),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("connect")
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("get")
    }

    /// The `Host` header value, stripped of a trailing `:port` for `CONNECT`.
    pub fn host_header(&self) -> Option<&str> {
        find_header(&self.headers, "host")
    }

    /// Host and explicit port (443 default for `CONNECT`, 80 otherwise).
    pub fn host_and_port(&self) -> Option<(String, u16)> {
        let host_value = self.host_header()?;
        if let Some(colon) = host_value.rfind(':') {
            let host = host_value[..colon].to_string();
            let port = host_value[colon + 1..].parse().unwrap_or(if self.is_connect() {
                443
            } else {
                80
            });
            Some((host, port))
        } else {
            Some((host_value.to_string(), if self.is_connect() { 443 } else { 80 }))
        }
    }

    pub fn file_path(&self) -> &str {
        &self.target
    }

    pub fn set_if_modified_since(&mut self, when: &HttpDate) {
        upsert_header(&mut self.headers, "If-Modified-Since", when.to_string());
    }

    pub fn if_modified_since(&self) -> Option<&str> {
        find_header(&self.headers, "if-modified-since")
    }

    pub fn connection(&self) -> &str {
        find_header(&self.headers, "connection").unwrap_or("nil")
    }

    pub fn accept_encoding(&self) -> &str {
        find_header(&self.headers, "accept-encoding").unwrap_or("nil")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(
            format!("{} {} HTTP/1.{}\r\n", self.method, self.target, self.version).as_bytes(),
        );
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    version: u8,
    code: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Parses a buffer as an HTTP response. Fails with `NotAResponse` if
    /// the buffer doesn't begin with `HTTP` (case-insensitively, matching
    /// the original's `.lower() != b'http'` check) — used by the chunked
    /// assembly loop to tell a full response apart from a tail-only chunk.
    pub fn parse(data: &[u8]) -> Result<Self, ProxyError> {
        if data.len() < 4 || !data[..4].eq_ignore_ascii_case(b"HTTP") {
            return Err(ProxyError::NotAResponse);
        }
        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut resp = httparse::Response::new(&mut raw_headers);
        match resp.parse(data) {
            Ok(httparse::Status::Complete(header_len)) => {
                let code = resp
                    .code
                    .ok_or_else(|| ProxyError::ParseError("missing status code".into()))?;
                let reason = resp.reason.unwrap_or("").to_string();
                let version = resp.version.unwrap_or(1);
                let headers = header_list(resp.headers);
                Ok(Self {
                    version,
                    code,
                    reason,
                    headers,
                    body: data[header_len..].to_vec(),
                })
            }
            Ok(httparse::Status::Partial) => {
                Err(ProxyError::ParseError("partial response".into()))
            }
            Err(e) => Err(ProxyError::ParseError(e.to_string())),
        }
    }

    pub fn status(&self) -> u16 {
        self.code
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| {
                v.split(',')
                    .any(|tok| tok.trim().eq_ignore_ascii_case("chunked"))
            })
            .unwrap_or(false)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn date(&self) -> Option<HttpDate> {
        self.header("date").and_then(|v| HttpDate::parse(v).ok())
    }

    pub fn set_date(&mut self, when: &HttpDate) {
        upsert_header(&mut self.headers, "Date", when.to_string());
    }

    pub fn keep_alive_param(&self, which: KeepAliveParam) -> Option<String> {
        let raw = self.header("keep-alive")?;
        for part in raw.split(',') {
            let part = part.trim();
            let (key, value) = part.split_once('=')?;
            let matches = match which {
                KeepAliveParam::Timeout => key.eq_ignore_ascii_case("timeout"),
                KeepAliveParam::Max => key.eq_ignore_ascii_case("max"),
            };
            if matches {
                return Some(value.trim().to_string());
            }
        }
        None
    }

    /// Lower-cased, comma-split, trimmed `Cache-Control` directive tokens.
    pub fn cache_control_tokens(&self) -> Vec<String> {
        self.header("cache-control")
            .map(|v| {
                v.to_ascii_lowercase()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.header("content-encoding")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(self.status_line().as_bytes());
        for (k, v) in &self.headers {
            out.extend_from_slice(format!("{k}: {v}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    fn status_line(&self) -> String {
        format!("HTTP/1.{} {} {}\r\n", self.version, self.code, self.reason)
    }

    fn synthesize(request: &Request, code: u16, reason: &str, body: &'static str) -> Self {
        let mut headers = Vec::new();
        if let Some(date) = request.header("date") {
            headers.push(("Date".to_string(), date.to_string()));
        }
        headers.push(("Content-Type".to_string(), "text/html".to_string()));
        headers.push(("Content-Length".to_string(), body.len().to_string()));
        Self {
            version: request_http_minor(request),
            code,
            reason: reason.to_string(),
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    /// Synthesized reply for a denylisted host.
    pub fn synthesize_404(request: &Request) -> Self {
        Self::synthesize(request, 404, "Not Found", NOT_FOUND_BODY)
    }

    /// Synthesized reply when the origin round-trip produced no response.
    pub fn synthesize_504(request: &Request) -> Self {
        Self::synthesize(request, 504, "Gateway Timeout", GATEWAY_TIMEOUT_BODY)
    }
}

/// Synthesized replies inherit the request's own HTTP version.
fn request_http_minor(request: &Request) -> u8 {
    request.version()
}

const NOT_FOUND_BODY: &str = "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>oops</title></head><body><h1>Oops</h1><h1>404 Not Found</h1></body></html>";
const GATEWAY_TIMEOUT_BODY: &str = "<!DOCTYPE html><html><head><meta charset=\"UTF-8\"><title>oops</title></head><body><h1>Oops</h1><h1>504 Gateway Timeout</h1></body></html>";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_request_and_strips_absolute_uri() {
        let raw = b"GET http://example.com/a/b HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.method(), "GET");
        assert_eq!(req.file_path(), "/a/b");
        assert_eq!(req.host_header(), Some("example.com"));
    }

    #[test]
    fn parses_origin_form_request_unchanged() {
        let raw = b"GET /a/b HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.file_path(), "/a/b");
    }

    #[test]
    fn connect_strips_port() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert!(req.is_connect());
        assert_eq!(req.file_path(), "example.com");
        assert_eq!(req.host_and_port(), Some(("example.com".to_string(), 443)));
    }

    #[test]
    fn connection_defaults_to_nil() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.connection(), "nil");
    }

    #[test]
    fn set_if_modified_since_upserts_header() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        let mut req = Request::parse(raw).unwrap();
        let date = HttpDate::parse("Sat, 30 Mar 2019 12:30:18 GMT").unwrap();
        req.set_if_modified_since(&date);
        assert_eq!(
            req.if_modified_since(),
            Some("Sat, 30 Mar 2019 12:30:18 GMT")
        );
        // Upsert again should replace, not duplicate
        let date2 = HttpDate::parse("Sun, 31 Mar 2019 00:00:00 GMT").unwrap();
        req.set_if_modified_since(&date2);
        let bytes = req.to_bytes();
        let count = String::from_utf8_lossy(&bytes)
            .matches("If-Modified-Since")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn response_not_a_response_error() {
        let raw = b"not an http response at all";
        assert!(matches!(Response::parse(raw), Err(ProxyError::NotAResponse)));
    }

    #[test]
    fn response_parses_status_and_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let resp = Response::parse(raw).unwrap();
        assert_eq!(resp.status(), 200);
        assert!(resp.is_chunked());
    }

    #[test]
    fn keep_alive_params_parsed() {
        let raw = b"HTTP/1.1 200 OK\r\nKeep-Alive: timeout=5, max=100\r\n\r\n";
        let resp = Response::parse(raw).unwrap();
        assert_eq!(
            resp.keep_alive_param(KeepAliveParam::Timeout).as_deref(),
            Some("5")
        );
        assert_eq!(
            resp.keep_alive_param(KeepAliveParam::Max).as_deref(),
            Some("100")
        );
    }

    #[test]
    fn cache_control_tokens_split_and_lowercase() {
        let raw = b"HTTP/1.1 200 OK\r\nCache-Control: Public, Max-Age=60\r\n\r\n";
        let resp = Response::parse(raw).unwrap();
        assert_eq!(
            resp.cache_control_tokens(),
            vec!["public".to_string(), "max-age=60".to_string()]
        );
    }

    #[test]
    fn synthesize_404_inherits_request_version_and_date() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\nDate: Sat, 30 Mar 2019 12:30:18 GMT\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        let resp = Response::synthesize_404(&req);
        assert_eq!(resp.status(), 404);
        assert_eq!(resp.header("date"), Some("Sat, 30 Mar 2019 12:30:18 GMT"));
        assert!(String::from_utf8_lossy(&resp.to_bytes()).contains("404 Not Found"));
    }

    #[test]
    fn synthesize_504_for_missing_origin_reply() {
        let raw = b"GET / HTTP/1.1\r\nHost: h\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        let resp = Response::synthesize_504(&req);
        assert_eq!(resp.status(), 504);
    }

    #[test]
    fn synthesize_inherits_http_1_0_version() {
        let raw = b"GET / HTTP/1.0\r\nHost: h\r\n\r\n";
        let req = Request::parse(raw).unwrap();
        assert_eq!(req.version(), 0);
        let resp = Response::synthesize_404(&req);
        assert!(String::from_utf8_lossy(&resp.to_bytes()).starts_with("HTTP/1.0 404"));
    }
}
