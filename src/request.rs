//! Incoming HTTP request type.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;
use http::header::{self, AsHeaderName, HeaderMap};
use http::{Method, Uri};

use crate::app::{App, AppInner};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::negotiation::Accept;
use crate::session::{self, Session};

/// Lazily resolved session, shared with the dispatcher so it can be saved
/// after the handler has consumed the request.
pub(crate) type SessionSlot = Arc<OnceLock<Session>>;

/// An incoming HTTP request, routed to an endpoint.
///
/// Created once per request by the dispatcher and handed to exactly one
/// handler. Holds a non-owning reference back to its [`App`].
pub struct Request {
    pub(crate) parts: http::request::Parts,
    pub(crate) body: Bytes,
    pub(crate) endpoint: String,
    pub(crate) params: HashMap<String, String>,
    pub(crate) app: Weak<AppInner>,
    pub(crate) context: Context,
    pub(crate) session: SessionSlot,
}

impl Request {
    pub(crate) fn new(
        parts: http::request::Parts,
        body: Bytes,
        endpoint: String,
        params: HashMap<String, String>,
        app: Weak<AppInner>,
        session: SessionSlot,
    ) -> Self {
        Self { parts, body, endpoint, params, app, context: Context::new(), session }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// The endpoint the request was routed to.
    pub fn endpoint(&self) -> &str { &self.endpoint }

    /// Header lookup (case-insensitive). Returns the first value.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a header joined with `, `.
    pub(crate) fn header_joined<K: AsHeaderName>(&self, name: K) -> String {
        self.parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Returns a named path parameter.
    ///
    /// For a rule `/people/{name}`, `req.param("name")` on `/people/alice`
    /// returns `Some("alice")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// First query-string value for `key`, percent-decoded.
    pub fn query(&self, key: &str) -> Option<String> {
        let query = self.parts.uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Cookie value sent by the client.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        let values = self.parts.headers.get_all(header::COOKIE).into_iter().filter_map(|v| v.to_str().ok());
        session::find_cookie(values, name)
    }

    /// The parsed `Accept` header; empty when absent.
    pub fn accept(&self) -> Accept {
        Accept::parse(&self.header_joined(header::ACCEPT))
    }

    /// The application serving this request.
    ///
    /// # Errors
    ///
    /// [`Error::Detached`] if the application has been dropped.
    pub fn app(&self) -> Result<App> {
        self.app.upgrade().map(App::from_inner).ok_or(Error::Detached)
    }

    /// Per-request scratch storage.
    pub fn context(&self) -> &Context { &self.context }
    pub fn context_mut(&mut self) -> &mut Context { &mut self.context }

    /// The session for this request, loaded on first access.
    ///
    /// Uses the cookie named by the `session_cookie` config key. Without a
    /// cookie a new session is started; it is only stored (and the cookie
    /// only set) if the handler writes to it.
    pub fn session(&self) -> Result<&Session> {
        if let Some(session) = self.session.get() {
            return Ok(session);
        }
        let app = self.app()?;
        let store = app.session_store();
        let session = match self.cookie(app.config().session_cookie()) {
            Some(sid) => store.get(sid),
            None => store.create(),
        };
        Ok(self.session.get_or_init(|| session))
    }

    /// Reverse-routes `endpoint` with `values`. Values that are not path
    /// variables become the query string.
    pub fn build_url<K, V>(&self, endpoint: &str, values: &[(K, V)]) -> Result<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let values: Vec<(&str, &str)> = values.iter().map(|(k, v)| (k.as_ref(), v.as_ref())).collect();
        self.app()?.build_url(endpoint, &values, None)
    }

    /// Like [`build_url`](Self::build_url) but absolute, using the request's
    /// `Host` header.
    pub fn build_external_url<K, V>(&self, endpoint: &str, values: &[(K, V)]) -> Result<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let path = self.build_url(endpoint, values)?;
        let host = self
            .header(header::HOST)
            .or_else(|| self.parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        let scheme = self.parts.uri.scheme_str().unwrap_or("http");
        Ok(format!("{scheme}://{host}{path}"))
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.parts.method)
            .field("uri", &self.parts.uri)
            .field("endpoint", &self.endpoint)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
