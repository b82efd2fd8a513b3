//! Content negotiation.
//!
//! The application's mimetype mapping (see
//! [`AppClass::add_serializer`](crate::AppClass::add_serializer) and
//! [`AppClass::associate_mimetypes`](crate::AppClass::associate_mimetypes))
//! lists what the server can produce. The request's `Accept` header says what
//! the client wants. [`render`] picks the best pair and either serializes the
//! value directly or hands off to the template resolver.
//!
//! Selection: the highest client quality wins; among equal qualities the
//! mimetype registered first wins. A client quality is taken from the most
//! specific matching media range (`text/html` beats `text/*` beats `*/*`).
//! A missing or empty `Accept` header accepts everything.

use http::header;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::Renderer;
use crate::request::Request;
use crate::response::{ContentType, Response};
use crate::template::Values;

// ── Accept header ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct MediaRange {
    kind: String,
    subtype: String,
    q: f32,
}

impl MediaRange {
    fn parse(item: &str) -> Option<Self> {
        let mut params = item.split(';');
        let (kind, subtype) = params.next()?.trim().split_once('/')?;
        let (kind, subtype) = (kind.trim(), subtype.trim());
        if kind.is_empty() || subtype.is_empty() || (kind == "*" && subtype != "*") {
            return None;
        }
        let q = params
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("q"))
            .and_then(|(_, v)| v.trim().parse::<f32>().ok())
            .filter(|q| q.is_finite())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        Some(Self { kind: kind.to_ascii_lowercase(), subtype: subtype.to_ascii_lowercase(), q })
    }

    /// 2 for an exact match, 1 for `type/*`, 0 for `*/*`; `None` if the
    /// range does not cover the mimetype.
    fn specificity(&self, kind: &str, subtype: &str) -> Option<u8> {
        match (self.kind.as_str(), self.subtype.as_str()) {
            ("*", "*") => Some(0),
            (k, "*") if k == kind => Some(1),
            (k, s) if k == kind && s == subtype => Some(2),
            _ => None,
        }
    }
}

/// A parsed `Accept` header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accept {
    ranges: Vec<MediaRange>,
}

impl Accept {
    /// Parses a header value. Malformed items are skipped; an unparsable or
    /// non-finite quality counts as `1`.
    pub fn parse(header: &str) -> Self {
        Self { ranges: header.split(',').filter_map(MediaRange::parse).collect() }
    }

    /// True when the client stated no preference.
    pub fn is_empty(&self) -> bool { self.ranges.is_empty() }

    /// The client's quality for `mimetype`, in `0.0..=1.0`.
    pub fn quality(&self, mimetype: &str) -> f32 {
        if self.ranges.is_empty() {
            return 1.0;
        }
        let essence = mimetype.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        let Some((kind, subtype)) = essence.split_once('/') else {
            return 0.0;
        };
        self.ranges
            .iter()
            .filter_map(|r| r.specificity(kind, subtype).map(|s| (s, r.q)))
            .max_by_key(|(s, _)| *s)
            .map_or(0.0, |(_, q)| q)
    }

    /// Index of the best of `offered` (server order), or `None` when the
    /// client accepts none of them.
    pub fn best_match<'a, I>(&self, offered: I) -> Option<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(usize, f32)> = None;
        for (idx, mimetype) in offered.into_iter().enumerate() {
            let q = self.quality(mimetype);
            if q > 0.0 && best.is_none_or(|(_, top)| q > top) {
                best = Some((idx, q));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Picks the mimetype and renderer for `request` from `mapping`.
pub(crate) fn negotiate<'m>(
    request: &Request,
    mapping: &'m [(String, Renderer)],
) -> Result<(&'m str, &'m Renderer)> {
    let accept = request.accept();
    let idx = accept
        .best_match(mapping.iter().map(|(m, _)| m.as_str()))
        .ok_or_else(|| Error::NotAcceptable { accept: request.header_joined(header::ACCEPT) })?;
    let (mimetype, renderer) = &mapping[idx];
    debug!(mimetype = %mimetype, "negotiated");
    Ok((mimetype, renderer))
}

/// Renders `value` in the representation the client prefers.
///
/// If the negotiated mimetype has a serializer, it receives `value` and
/// `path` / `values` are ignored. If it has a suffix, the template
/// `path + "." + suffix` is rendered with `values` overlaid by `keywords`.
///
/// ```rust,no_run
/// use resin::{Request, Result, negotiation::render, template::Values};
/// use serde_json::json;
///
/// async fn home(req: Request) -> Result<String> {
///     let mut kw = Values::new();
///     kw.insert("pi".into(), json!(3.14));
///     render(&req, &json!({"pi": 3.14}), "home", &Values::new(), kw)
/// }
/// ```
///
/// # Errors
///
/// [`Error::NotAcceptable`] when nothing registered satisfies the client,
/// [`Error::Render`] when the suffix has no template file.
pub fn render(request: &Request, value: &Value, path: &str, values: &Values, keywords: Values) -> Result<String> {
    render_negotiated(request, value, path, values, keywords).map(|(_, body)| body)
}

/// Like [`render`], but returns a response tagged with the negotiated
/// `Content-Type` and `Vary: Accept`.
pub fn respond(request: &Request, value: &Value, path: &str, values: &Values, keywords: Values) -> Result<Response> {
    let (mimetype, body) = render_negotiated(request, value, path, values, keywords)?;
    Ok(Response::builder()
        .header(header::VARY, "Accept")
        .bytes(ContentType::Other(mimetype), body.into_bytes()))
}

fn render_negotiated(
    request: &Request,
    value: &Value,
    path: &str,
    values: &Values,
    keywords: Values,
) -> Result<(String, String)> {
    let app = request.app()?;
    let (mimetype, renderer) = negotiate(request, app.mimetype_mapping())?;
    let body = match renderer {
        Renderer::Serializer(serialize) => serialize(request, value)?,
        Renderer::Suffix(suffix) => {
            app.render_template(request, &format!("{path}.{suffix}"), values, keywords)?
        }
    };
    Ok((mimetype.to_owned(), body))
}
