//! Per-request context handed through the filter pipeline to a handler.
//!
//! A [`RequestContext`] bundles the intercepted request with its decoded query and
//! form parameters, the captures of the route that matched, and a type-keyed
//! [`Extensions`] map that request filters can use to pass state to handlers.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use url::{Url, form_urlencoded};

use crate::http::Request;
use crate::router::Captures;

/// Type-erased values keyed by their type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

/// Everything a handler knows about the request it is processing.
///
/// Query and form parameters keep their order and repeated keys; lookups by key return
/// the first value.
///
/// # Examples
///
/// ```
/// use fetchgate::{Request, RequestContext};
/// use fetchgate::router::Captures;
///
/// let request = Request::post("https://example.com/app/login?next=%2Fhome")
///     .unwrap()
///     .body("user=ada&remember=1");
/// let ctx = RequestContext::new(request, Captures::default());
///
/// assert_eq!(ctx.query("next"), Some("/home"));
/// assert_eq!(ctx.form("user"), Some("ada"));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request: Request,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    captures: Captures,
    extensions: Extensions,
}

impl RequestContext {
    /// Decompose `request` into a context carrying `captures`.
    ///
    /// The body is decoded as `application/x-www-form-urlencoded` whatever its content
    /// type; a body that is not form data simply yields odd or no pairs.
    pub fn new(request: Request, captures: Captures) -> Self {
        let query = request
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let form = form_urlencoded::parse(request.body_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Self {
            request,
            query,
            form,
            captures,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn url(&self) -> &Url {
        self.request.url()
    }

    /// First query parameter named `key`.
    pub fn query(&self, key: &str) -> Option<&str> {
        first(&self.query, key)
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// First form parameter named `key`.
    pub fn form(&self, key: &str) -> Option<&str> {
        first(&self.form, key)
    }

    pub fn form_pairs(&self) -> &[(String, String)] {
        &self.form
    }

    /// Captures of the route pattern that selected the handler.
    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Consume the context, returning the original request.
    pub fn into_request(self) -> Request {
        self.request
    }
}

fn first<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}
