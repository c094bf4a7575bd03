//! Intercepted requests.
//!
//! A [`Request`] always carries an absolute [`Url`]: manifest matching and scope
//! stripping both work on absolute locations. Raw HTTP/1.1 bytes from the host adapter
//! are parsed with the [`httparse`] crate.

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use super::{Headers, Method};

/// Errors that can occur while turning raw bytes into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request target {target:?} is not a valid URL: {source}")]
    InvalidUrl {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// A request as seen by the dispatch engine.
///
/// # Examples
///
/// ```
/// use fetchgate::http::{Method, Request};
///
/// let request = Request::get("https://example.com/app/a.txt#top").unwrap();
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.cache_key(), "https://example.com/app/a.txt");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers accepted per request.
    const MAX_HEADERS: usize = 64;

    /// Creates a request with an empty body and no headers.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Parses `url` and creates a `GET` request for it.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::Get, Url::parse(url)?))
    }

    /// Parses `url` and creates a `POST` request for it.
    pub fn post(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::Post, Url::parse(url)?))
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Parses a raw HTTP/1.1 request head from `buf`.
    ///
    /// Origin-form targets (`/path?q`) are made absolute with the `Host` header and
    /// `scheme`; absolute-form targets (`http://host/path`, as sent to a proxy) are used
    /// as-is. The body is *not* read: the returned offset tells the caller where it
    /// begins so it can wait for `Content-Length` bytes and attach them with
    /// [`Request::body`].
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — the head is not fully buffered yet.
    /// - [`RequestError::Parse`] — the bytes are not HTTP.
    /// - [`RequestError::MissingField`] — method, target or `Host` is absent.
    /// - [`RequestError::InvalidUrl`] — the target cannot be made into an absolute URL.
    pub fn parse(buf: &[u8], scheme: &str) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Request::new(&mut headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };
        let target = raw.path.ok_or(RequestError::MissingField { field: "path" })?;

        let mut header_map = Headers::new();
        for header in raw.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.append(header.name, value);
            }
        }

        let absolute = if target.starts_with('/') {
            let host = header_map
                .get("host")
                .ok_or(RequestError::MissingField { field: "host" })?;
            format!("{scheme}://{host}{target}")
        } else {
            target.to_owned()
        };
        let url = Url::parse(&absolute).map_err(|source| RequestError::InvalidUrl {
            target: target.to_owned(),
            source,
        })?;

        Ok((
            Self {
                method,
                url,
                headers: header_map,
                body: Bytes::new(),
            },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// The URL in canonical form with any fragment removed.
    ///
    /// Cache entries are keyed by this string, so `a.txt` and `a.txt#x` share an entry
    /// while `a.txt?v=2` does not.
    pub fn cache_key(&self) -> String {
        cache_key(&self.url)
    }

    /// Returns the value of `Content-Length` parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// `true` unless the client asked to close the connection.
    pub fn is_keep_alive(&self) -> bool {
        !self
            .headers
            .get("connection")
            .is_some_and(|conn| conn.eq_ignore_ascii_case("close"))
    }
}

/// Canonical cache key for `url`: its serialization without the fragment.
pub(crate) fn cache_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}
