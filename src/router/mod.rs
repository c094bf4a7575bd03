//! Request routing — select at most one handler by matching the scope-relative path.
//!
//! A request's path is made relative to the registration scope by stripping the scope
//! prefix (origin plus scope path, without its trailing slash) and percent-decoding the
//! rest, so for the scope `https://example.com/app/`:
//!
//! | Request URL                              | Relative path   |
//! |------------------------------------------|-----------------|
//! | `https://example.com/app/say/hi`         | `/say/hi`       |
//! | `https://example.com/app/say/h%C3%A9`    | `/say/hé`       |
//! | `https://example.com/app/`               | `/`             |
//! | `https://example.com/other`              | *(out of scope)* |
//!
//! Handlers are tested in table order; the first whose matcher accepts the relative
//! path wins. Regex patterns are unanchored, so `/say/(.+)` matches anywhere in the
//! path unless the pattern itself uses `^` and `$`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use regex::Regex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::BoxFuture;
use crate::context::RequestContext;
use crate::http::Response;

/// Failure raised by a request filter, a handler or a response filter.
///
/// The filter pipeline hands it to the configured exception handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Capture groups of a successful match.
///
/// Group 0 is the whole match; numbered groups follow in pattern order and are `None`
/// when they did not participate. Named groups are also reachable by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl Captures {
    fn from_regex(regex: &Regex, captures: &regex::Captures<'_>) -> Self {
        let groups = captures
            .iter()
            .map(|group| group.map(|m| m.as_str().to_owned()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| Some((name.to_owned(), captures.name(name)?.as_str().to_owned())))
            .collect();
        Self { groups, named }
    }

    /// Group `index`, if it exists and participated in the match.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index)?.as_deref()
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Number of groups including group 0.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// A route table entry: a matcher and an async processor.
pub trait RequestHandler: Send + Sync {
    /// Test the scope-relative, decoded path. `Some` selects this handler.
    fn matches(&self, path: &str) -> Option<Captures>;

    /// Produce the response for a request this handler matched.
    fn process(&self, ctx: RequestContext) -> BoxFuture<'_, Result<Response, HandlerError>>;
}

/// Type-erased processing closure stored by [`Route`].
///
/// Any `Fn(RequestContext) -> impl Future<Output = Result<Response, HandlerError>>`
/// that is `Send + Sync + 'static` implements it through the blanket impl below.
pub trait Process: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, Result<Response, HandlerError>>;
}

impl<T, F> Process for T
where
    T: Fn(RequestContext) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, Result<Response, HandlerError>> {
        Box::pin((self)(ctx))
    }
}

/// A regex pattern bound to a processing closure.
///
/// # Examples
///
/// ```
/// use fetchgate::{Response, Route, StatusCode};
/// use fetchgate::router::RequestHandler;
///
/// let route = Route::new(r"/say/(.+)", |ctx| async move {
///     let word = ctx.captures().get(1).unwrap_or_default().to_owned();
///     Ok(Response::new(StatusCode::Ok).body(format!("Said: {word}")))
/// })
/// .unwrap();
///
/// assert_eq!(route.matches("/say/hi").unwrap().get(1), Some("hi"));
/// assert!(route.matches("/shout/hi").is_none());
/// ```
pub struct Route {
    pattern: Regex,
    process: Box<dyn Process>,
}

impl Route {
    /// Compile `pattern` and bind it to `process`.
    ///
    /// # Errors
    ///
    /// Returns the [`regex::Error`] if the pattern does not compile.
    pub fn new<F, Fut>(pattern: &str, process: F) -> Result<Self, regex::Error>
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        Ok(Self::from_regex(Regex::new(pattern)?, process))
    }

    pub fn from_regex<F, Fut>(pattern: Regex, process: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        Self {
            pattern,
            process: Box::new(process),
        }
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl RequestHandler for Route {
    fn matches(&self, path: &str) -> Option<Captures> {
        let captures = self.pattern.captures(path)?;
        Some(Captures::from_regex(&self.pattern, &captures))
    }

    fn process(&self, ctx: RequestContext) -> BoxFuture<'_, Result<Response, HandlerError>> {
        self.process.call(ctx)
    }
}

/// Ordered route table bound to a scope.
pub struct Router {
    scope_prefix: String,
    routes: Vec<Arc<dyn RequestHandler>>,
}

impl Router {
    /// Create an empty table for `scope`.
    pub fn new(scope: &Url) -> Self {
        let scope_prefix = format!(
            "{}{}",
            scope.origin().ascii_serialization(),
            scope.path().trim_end_matches('/')
        );
        Self {
            scope_prefix,
            routes: Vec::new(),
        }
    }

    /// Append `handler` to the end of the table.
    pub fn push(&mut self, handler: Arc<dyn RequestHandler>) {
        self.routes.push(handler);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// The decoded path of `url` relative to the scope, or `None` if `url` lies outside
    /// the scope. Invalid UTF-8 after decoding is replaced, not rejected.
    pub fn relative_path(&self, url: &Url) -> Option<String> {
        let location = format!("{}{}", url.origin().ascii_serialization(), url.path());
        let rest = location.strip_prefix(&self.scope_prefix)?;
        if !rest.starts_with('/') {
            return None;
        }
        Some(percent_decode_str(rest).decode_utf8_lossy().into_owned())
    }

    /// Select the first handler whose matcher accepts the relative path of `url`.
    pub fn find(&self, url: &Url) -> Option<(Arc<dyn RequestHandler>, Captures)> {
        let path = self.relative_path(url)?;

        self.routes.iter().enumerate().find_map(|(index, route)| {
            let captures = route.matches(&path)?;
            debug!(path = %path, route = index, "route matched");
            Some((Arc::clone(route), captures))
        })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("scope_prefix", &self.scope_prefix)
            .field("routes", &self.routes.len())
            .finish()
    }
}
