//! Outgoing HTTP response type and what handlers may return.
//!
//! A handler returns anything that is [`IntoRenderable`]: a plain string, a
//! fully built [`Response`], a bare [`StatusCode`], or a `Result` of any of
//! those. The dispatcher normalizes the outcome into a [`Renderable`] and then
//! into the response that goes on the wire.

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue, IntoHeaderName};
use http::StatusCode;
use http_body_util::Full;
use tracing::warn;

use crate::error::{Error, Result};

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
    /// Any other media type, e.g. one picked by content negotiation.
    Other(String),
}

impl ContentType {
    fn as_str(&self) -> &str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
            Self::Other(s)    => s,
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use resin::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(http::header::LOCATION, "/pastes/42")
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().bytes(ContentType::Html, body.into().into_bytes())
    }

    /// `200 OK`, `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Redirect to `location` with the given 3xx status.
    pub fn redirect(code: StatusCode, location: &str) -> Self {
        Self::builder().status(code).header(header::LOCATION, location).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The response for an HTTP-signaling error, or `None` if `err` is not
    /// one. The body carries only the reason phrase.
    pub(crate) fn from_error(err: &Error) -> Option<Self> {
        let status = err.status()?;
        let reason = status.canonical_reason().unwrap_or_default();
        let mut builder = Self::builder().status(status);
        if let Error::MethodNotAllowed { allowed } = err {
            let allow = allowed.iter().map(http::Method::as_str).collect::<Vec<_>>().join(", ");
            builder = builder.header(header::ALLOW, allow);
        }
        Some(builder.text(reason))
    }

    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Values that are not valid header text are dropped
    /// with a warning.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: IntoHeaderName,
        V: TryInto<HeaderValue>,
    {
        match value.try_into() {
            Ok(value) => { self.headers.append(name, value); }
            Err(_) => warn!("dropping response header with an invalid value"),
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(ContentType::Json.as_str(), body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text.as_str(), body.into().into())
    }

    /// Terminate with a typed body. Use this for XML, HTML, negotiated types, etc.
    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.finish(content_type.as_str(), body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`, redirects).
    pub fn no_body(self) -> Response {
        Response { body: Bytes::new(), headers: self.headers, status: self.status }
    }

    fn finish(mut self, content_type: &str, body: Bytes) -> Response {
        match HeaderValue::from_str(content_type) {
            Ok(v) => { self.headers.insert(header::CONTENT_TYPE, v); }
            Err(_) => warn!(content_type, "dropping invalid content-type"),
        }
        Response { body, headers: self.headers, status: self.status }
    }
}

// ── Renderable ────────────────────────────────────────────────────────────────

/// What a handler produced, before the dispatcher turns it into a response.
#[derive(Debug)]
pub enum Renderable {
    /// A bare string; wrapped into a `200 OK` text response.
    Text(String),
    /// A response built by the handler; passed through unchanged.
    Full(Response),
}

impl Renderable {
    pub fn into_response(self) -> Response {
        match self {
            Self::Text(body) => Response::text(body),
            Self::Full(res) => res,
        }
    }
}

/// Conversion of a handler's return value into a [`Renderable`].
///
/// Implement on your own types to return them directly from handlers.
/// Errors are kept as errors: the dispatcher decides whether they become an
/// HTTP response or propagate.
pub trait IntoRenderable {
    fn into_renderable(self) -> Result<Renderable>;
}

impl IntoRenderable for Renderable {
    fn into_renderable(self) -> Result<Renderable> { Ok(self) }
}

impl IntoRenderable for Response {
    fn into_renderable(self) -> Result<Renderable> { Ok(Renderable::Full(self)) }
}

impl IntoRenderable for String {
    fn into_renderable(self) -> Result<Renderable> { Ok(Renderable::Text(self)) }
}

impl IntoRenderable for &'static str {
    fn into_renderable(self) -> Result<Renderable> { Ok(Renderable::Text(self.to_owned())) }
}

/// Return a status directly from a handler: `return StatusCode::NO_CONTENT`
impl IntoRenderable for StatusCode {
    fn into_renderable(self) -> Result<Renderable> { Ok(Renderable::Full(Response::status(self))) }
}

impl<T, E> IntoRenderable for std::result::Result<T, E>
where
    T: IntoRenderable,
    E: Into<Error>,
{
    fn into_renderable(self) -> Result<Renderable> {
        self.map_err(Into::<Error>::into)?.into_renderable()
    }
}
