//! Response envelope.
//!
//! The same type carries handler output, cached entries, network responses and the
//! failure responses produced by the dispatch engine. It can be serialized to HTTP/1.1
//! wire format for the TCP host adapter.

use bytes::{BufMut, Bytes, BytesMut};

use super::headers::single_line;
use super::{Headers, StatusCode};

/// Distinguishes ordinary responses from the network-error sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Basic,
    /// A response standing for "the fetch failed". Produced when a handler fails and
    /// no exception handler is configured, or when a request is aborted.
    Error,
}

/// A response, ready to be returned to the client or stored in a cache generation.
///
/// # Examples
///
/// ```
/// use fetchgate::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::InternalServerError)
///     .with_status_text("Cannot say that")
///     .body("nope");
///
/// assert_eq!(response.status_text(), "Cannot say that");
/// let text = String::from_utf8(response.into_bytes().to_vec()).unwrap();
/// assert!(text.starts_with("HTTP/1.1 500 Cannot say that\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    status_text: Option<String>,
    headers: Headers,
    body: Bytes,
    kind: ResponseKind,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            status_text: None,
            headers: Headers::new(),
            body: Bytes::new(),
            kind: ResponseKind::Basic,
            keep_alive: true,
        }
    }

    /// The network-error sentinel.
    pub fn network_error() -> Self {
        let mut response = Self::new(StatusCode::BadGateway).with_status_text("Network Error");
        response.kind = ResponseKind::Error;
        response
    }

    /// Overrides the reason phrase sent after the status code. CR and LF become spaces.
    #[must_use]
    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(single_line(text.into()));
        self
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets a header in-place, replacing earlier values. Intended for response filters
    /// that decorate a response they did not build.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The reason phrase: the override if one was set, the canonical one otherwise.
    pub fn status_text(&self) -> &str {
        self.status_text
            .as_deref()
            .unwrap_or_else(|| self.status.canonical_reason())
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn kind(&self) -> ResponseKind {
        self.kind
    }

    pub fn is_network_error(&self) -> bool {
        self.kind == ResponseKind::Error
    }

    /// `true` when the status is 2xx and this is not the error sentinel.
    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Basic && self.status.is_success()
    }

    /// Serializes the response into HTTP/1.1 wire format.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` for non-empty bodies without a
    /// content type, and always writes `Connection` and `Content-Length`. Headers with
    /// those two names already present are replaced.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.append("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.remove("content-length");

        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers.set("Connection", connection);

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(format!("HTTP/1.1 {} {}\r\n", self.status.as_u16(), self.status_text()).as_bytes());
        buf.put(self.headers.to_string().as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n\r\n").as_bytes());
        buf.put(self.body);

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let s = to_string(Response::new(StatusCode::Ok).body("Said: hi").into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 8\r\n"));
        assert!(s.ends_with("\r\n\r\nSaid: hi"));
    }

    #[test]
    fn stale_content_length_is_replaced() {
        let r = Response::new(StatusCode::Ok)
            .header("Content-Length", "999")
            .body("ok");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("999"));
        assert!(s.contains("Content-Length: 2\r\n"));
    }

    #[test]
    fn empty_body_has_no_content_type() {
        let s = to_string(Response::new(StatusCode::NoContent).into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn connection_close() {
        let s = to_string(Response::new(StatusCode::Ok).keep_alive(false).into_bytes());
        assert!(s.contains("Connection: close\r\n"));
    }

    #[test]
    fn network_error_sentinel() {
        let r = Response::network_error();
        assert!(r.is_network_error());
        assert!(!r.is_ok());
        assert_eq!(r.kind(), ResponseKind::Error);
        assert!(r.status().is_failure());
    }

    #[test]
    fn set_header_replaces() {
        let mut r = Response::new(StatusCode::Ok).header("X-Served-By", "network");
        r.set_header("x-served-by", "cache");
        assert_eq!(r.headers().get("X-Served-By"), Some("cache"));
        assert_eq!(r.headers().len(), 1);
    }

    #[test]
    fn status_text_cannot_inject_headers() {
        let r = Response::new(StatusCode::InternalServerError)
            .with_status_text("bad\r\nSet-Cookie: session=evil");
        assert_eq!(r.status_text(), "bad  Set-Cookie: session=evil");

        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 500 bad  Set-Cookie: session=evil\r\nConnection: keep-alive\r\n"));
        assert!(!s.contains("\r\nSet-Cookie"));
    }

    #[test]
    fn header_values_cannot_inject_headers() {
        let mut r = Response::new(StatusCode::Ok).header("X-Said", "hi\r\nX-Evil: 1");
        r.set_header("X-Echo", "a\nX-Evil: 2");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("\r\nX-Evil"));
        assert!(!s.contains("\nX-Evil"));
        assert!(s.contains("X-Said: hi  X-Evil: 1\r\n"));
    }
}
