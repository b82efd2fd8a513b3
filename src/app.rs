//! Application classes, instances and request dispatch.
//!
//! An [`AppClass`] is the definition of an application: its rules, endpoints,
//! template engines and mimetype renderers. Classes are assembled once at
//! startup, and [`AppClass::clone_as`] derives a subclass that starts from the
//! parent's registrations without ever writing back into them.
//!
//! An [`App`] is a configured instance of a class, ready to serve. It compiles
//! the class's rules into a [`Matcher`], takes its own copy of the endpoint
//! table and owns its [`Config`].
//!
//! ```rust,no_run
//! use resin::{AppClass, Config, Request, Server};
//!
//! async fn person(req: Request) -> String {
//!     format!("{} says hi", req.param("name").unwrap_or("nobody"))
//! }
//!
//! # async fn run() -> resin::Result<()> {
//! let mut class = AppClass::new("Greeter");
//! class.route("/people/{name}", person)?;
//!
//! let app = class.instantiate(Config::new())?;
//! Server::bind("0.0.0.0:5555")?.serve(app).await
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::StatusCode;
use serde_json::Value;
use tracing::{Instrument, debug, debug_span, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Handler};
use crate::registry::{Registry, Renderer, Serializer};
use crate::request::{Request, SessionSlot};
use crate::response::Response;
use crate::routing::{MatchOutcome, Matcher, Rule};
use crate::session::{self, MemoryStore, SessionStore};
use crate::template::{self, FsDirectory, TemplateDirectory, TemplateEngine, Values};

/// Template directory used when a class does not set one.
pub const DEFAULT_TEMPLATE_PATH: &str = "templates";

// ── AppClass ──────────────────────────────────────────────────────────────────

/// The definition of an application.
///
/// Registration methods return `&mut Self` so calls chain with `?`:
///
/// ```rust,no_run
/// # use resin::{AppClass, Request};
/// # async fn home(_: Request) -> &'static str { "" }
/// # async fn about(_: Request) -> &'static str { "" }
/// # fn main() -> resin::Result<()> {
/// let mut class = AppClass::new("Site");
/// class
///     .route("/", home)?
///     .route("/about", about)?
///     .associate_mimetypes([("text/html", "html")])?;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct AppClass {
    name: String,
    registry: Registry,
    template_directory: Arc<dyn TemplateDirectory>,
}

impl AppClass {
    /// A new class with empty registries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: Registry::new(),
            template_directory: Arc::new(FsDirectory::new(DEFAULT_TEMPLATE_PATH)),
        }
    }

    /// Derives a subclass named `name`.
    ///
    /// The subclass sees every registration its parent has at this moment.
    /// Registrations made afterwards, on either side, stay on that side.
    pub fn clone_as(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(parent = %self.name, class = %name, "class cloned");
        Self { name, ..self.clone() }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn registry(&self) -> &Registry { &self.registry }
    pub fn template_directory(&self) -> &Arc<dyn TemplateDirectory> { &self.template_directory }

    /// Where this class's templates live. Defaults to `./templates`.
    pub fn set_template_directory(&mut self, directory: impl TemplateDirectory) -> &mut Self {
        self.template_directory = Arc::new(directory);
        self
    }

    /// Adds `rule` and maps its endpoint to `handler`.
    ///
    /// The rule must name its endpoint. Reusing an endpoint name replaces the
    /// handler for that name.
    pub fn add_rule(&mut self, rule: Rule, handler: impl Handler) -> Result<&mut Self> {
        self.registry.add_rule(rule, handler.into_boxed_handler())?;
        Ok(self)
    }

    /// Routes `rule` (a pattern or a full [`Rule`]) to `handler`.
    ///
    /// Without an explicit endpoint the handler's function name is used;
    /// closures need one.
    pub fn route(&mut self, rule: impl Into<Rule>, handler: impl Handler) -> Result<&mut Self> {
        let mut rule = rule.into();
        if rule.endpoint_name().is_none() {
            let name = handler.endpoint_name().ok_or_else(|| {
                Error::config(format!(
                    "rule `{}`: handler has no name; give the rule an endpoint",
                    rule.pattern()
                ))
            })?;
            rule.set_endpoint(name);
        }
        self.add_rule(rule, handler)
    }

    /// Registers the template engine for files ending in `.suffix`.
    ///
    /// The engine receives the template path relative to the template
    /// directory, e.g. `people/show.html.suffix`.
    pub fn add_template_engine<F>(&mut self, suffix: &str, engine: F) -> Result<&mut Self>
    where
        F: Fn(&Request, &str, &Values) -> Result<String> + Send + Sync + 'static,
    {
        let engine: TemplateEngine = Arc::new(engine);
        self.registry.add_template_engine(suffix, engine)?;
        Ok(self)
    }

    /// Registers a serializer for one mimetype.
    pub fn add_serializer<F>(&mut self, mimetype: &str, serializer: F) -> Result<&mut Self>
    where
        F: Fn(&Request, &Value) -> Result<String> + Send + Sync + 'static,
    {
        self.serializer(&[mimetype], serializer)
    }

    /// Registers one serializer for several mimetypes. Nothing is registered
    /// if any of them is already taken.
    pub fn serializer<F>(&mut self, mimetypes: &[&str], serializer: F) -> Result<&mut Self>
    where
        F: Fn(&Request, &Value) -> Result<String> + Send + Sync + 'static,
    {
        let serializer: Serializer = Arc::new(serializer);
        self.registry.add_serializer(mimetypes, serializer)?;
        Ok(self)
    }

    /// Associates mimetypes with template suffixes, e.g.
    /// `[("text/html", "html"), ("text/xml", "xml")]`.
    ///
    /// Fails on an empty batch or if any mimetype is taken; on failure no
    /// association from the batch is kept.
    pub fn associate_mimetypes<I, M, S>(&mut self, pairs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (M, S)>,
        M: Into<String>,
        S: Into<String>,
    {
        let pairs = pairs.into_iter().map(|(m, s)| (m.into(), s.into())).collect();
        self.registry.associate_mimetypes(pairs)?;
        Ok(self)
    }

    /// Builds a servable instance with an in-memory session store.
    pub fn instantiate(&self, config: Config) -> Result<App> {
        self.instantiate_with(config, MemoryStore::new())
    }

    /// Builds a servable instance backed by `store`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when two rules claim the same path and method.
    pub fn instantiate_with(&self, config: Config, store: impl SessionStore) -> Result<App> {
        if self.registry.rules().is_empty() {
            warn!(class = %self.name, "instantiating a class with no rules; every request will 404");
        }
        let matcher = Matcher::new(self.registry.rules())?;
        debug!(class = %self.name, rules = self.registry.rules().len(), "application instantiated");
        Ok(App(Arc::new(AppInner {
            class_name: self.name.clone(),
            config,
            matcher,
            endpoints: self.registry.endpoints().clone(),
            registry: self.registry.clone(),
            template_directory: Arc::clone(&self.template_directory),
            session_store: Arc::new(store),
        })))
    }
}

// ── App ───────────────────────────────────────────────────────────────────────

pub(crate) struct AppInner {
    class_name: String,
    config: Config,
    matcher: Matcher,
    endpoints: HashMap<String, BoxedHandler>,
    registry: Registry,
    template_directory: Arc<dyn TemplateDirectory>,
    session_store: Arc<dyn SessionStore>,
}

/// A configured application instance. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct App(Arc<AppInner>);

impl App {
    pub(crate) fn from_inner(inner: Arc<AppInner>) -> Self {
        Self(inner)
    }

    /// Name of the class this instance was built from.
    pub fn class_name(&self) -> &str { &self.0.class_name }
    pub fn config(&self) -> &Config { &self.0.config }
    pub fn matcher(&self) -> &Matcher { &self.0.matcher }
    pub fn template_directory(&self) -> &dyn TemplateDirectory { self.0.template_directory.as_ref() }
    pub fn session_store(&self) -> &Arc<dyn SessionStore> { &self.0.session_store }
    pub fn template_engines(&self) -> &[(String, TemplateEngine)] { self.0.registry.template_engines() }
    pub fn mimetype_mapping(&self) -> &[(String, Renderer)] { self.0.registry.mimetype_mapping() }

    pub fn has_endpoint(&self, endpoint: &str) -> bool {
        self.0.endpoints.contains_key(endpoint)
    }

    /// Renders the template at `path` (without engine suffix) with `values`
    /// overlaid by `keywords`. See [`template`](crate::template).
    pub fn render_template(
        &self,
        request: &Request,
        path: &str,
        values: &Values,
        keywords: Values,
    ) -> Result<String> {
        let (resolved, engine) = template::resolve(self.template_engines(), self.template_directory(), path)?;
        engine(request, &resolved, &template::merge(values, keywords))
    }

    /// Reverse routing. See [`Matcher::build_url`].
    pub fn build_url(&self, endpoint: &str, values: &[(&str, &str)], method: Option<&http::Method>) -> Result<String> {
        self.0.matcher.build_url(endpoint, values, method)
    }

    /// Runs one request through the application.
    ///
    /// Routing misses, method mismatches and negotiation / rendering failures
    /// come back as `Ok` responses (404, 405, 406). Any other error raised by
    /// the handler is returned as `Err` for the transport to deal with.
    pub async fn dispatch(&self, req: http::Request<Bytes>) -> Result<Response> {
        let span = debug_span!("dispatch", method = %req.method(), path = req.uri().path());
        self.dispatch_inner(req).instrument(span).await
    }

    async fn dispatch_inner(&self, req: http::Request<Bytes>) -> Result<Response> {
        let (parts, body) = req.into_parts();

        // Matching.
        let (endpoint, variables) = match self.0.matcher.match_path(&parts.method, parts.uri.path()) {
            MatchOutcome::Matched { endpoint, variables } => (endpoint, variables),
            MatchOutcome::Redirect { mut location } => {
                if let Some(query) = parts.uri.query() {
                    location.push('?');
                    location.push_str(query);
                }
                debug!(location = %location, "redirect");
                return Ok(Response::redirect(StatusCode::PERMANENT_REDIRECT, &location));
            }
            MatchOutcome::MethodNotAllowed { allowed } => {
                return Ok(http_error(Error::MethodNotAllowed { allowed }));
            }
            MatchOutcome::NoMatch => return Ok(http_error(Error::NotFound)),
        };

        // Dispatching.
        let Some(handler) = self.0.endpoints.get(&endpoint) else {
            warn!(endpoint = %endpoint, "matched endpoint has no handler");
            return Ok(http_error(Error::NotFound));
        };
        debug!(endpoint = %endpoint, "dispatching");
        let slot: SessionSlot = Arc::new(OnceLock::new());
        let request = Request::new(
            parts,
            body,
            endpoint,
            variables,
            Arc::downgrade(&self.0),
            Arc::clone(&slot),
        );

        // Rendering.
        let mut response = match handler.call(request).await {
            Ok(renderable) => renderable.into_response(),
            Err(err) => match Response::from_error(&err) {
                Some(res) => {
                    warn!(error = %err, status = %res.status_code(), "request failed");
                    res
                }
                None => return Err(err),
            },
        };

        self.persist_session(&slot, &mut response);
        Ok(response)
    }

    /// Saves a session the handler wrote to and hands out its cookie if the
    /// client does not have it yet.
    fn persist_session(&self, slot: &SessionSlot, response: &mut Response) {
        let Some(session) = slot.get() else { return };
        if !session.is_modified() {
            return;
        }
        self.0.session_store.save(session);
        if session.is_new() {
            let cookie = session::session_cookie(self.0.config.session_cookie(), session.id());
            match HeaderValue::from_str(&cookie) {
                Ok(value) => { response.headers.append(header::SET_COOKIE, value); }
                Err(_) => warn!("session cookie name is not a valid header value"),
            }
        }
    }
}

fn http_error(err: Error) -> Response {
    debug!(error = %err, "responding with http error");
    Response::from_error(&err).unwrap_or_else(|| Response::status(StatusCode::INTERNAL_SERVER_ERROR))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn home(_req: Request) -> &'static str {
        "home"
    }

    fn noop_engine(_: &Request, path: &str, _: &Values) -> Result<String> {
        Ok(path.to_owned())
    }

    #[test]
    fn route_derives_endpoint_from_function_name() {
        let mut class = AppClass::new("App");
        class.route("/", home).unwrap();
        assert_eq!(class.registry().rules()[0].endpoint_name(), Some("home"));
        assert!(class.registry().endpoints().contains_key("home"));
    }

    #[test]
    fn route_rejects_unnamed_handlers_without_endpoint() {
        let mut class = AppClass::new("App");
        let err = class.route("/", |_req: Request| async { "anon" });
        assert!(matches!(err, Err(Error::Config(_))));
        class
            .route(Rule::new("/").endpoint("anon"), |_req: Request| async { "anon" })
            .unwrap();
    }

    #[test]
    fn subclasses_are_isolated_from_parents_and_siblings() {
        let mut base = AppClass::new("Base");
        base.add_template_engine("t1", noop_engine).unwrap();
        base.associate_mimetypes([("text/html", "html")]).unwrap();
        base.route("/", home).unwrap();

        let mut child = base.clone_as("Child");
        let sibling = base.clone_as("Sibling");
        assert_eq!(child.name(), "Child");
        assert!(child.registry().has_template_engine("t1"));

        child.add_template_engine("t2", noop_engine).unwrap();
        child.associate_mimetypes([("text/xml", "xml")]).unwrap();
        child.route(Rule::new("/child").endpoint("child"), home).unwrap();

        for other in [&base, &sibling] {
            assert!(!other.registry().has_template_engine("t2"));
            assert!(!other.registry().has_mimetype("text/xml"));
            assert_eq!(other.registry().rules().len(), 1);
            assert!(!other.registry().endpoints().contains_key("child"));
        }
        assert_eq!(child.registry().rules().len(), 2);
    }

    #[test]
    fn parent_writes_after_cloning_stay_on_the_parent() {
        let mut base = AppClass::new("Base");
        let child = base.clone_as("Child");
        base.add_template_engine("t1", noop_engine).unwrap();
        assert!(!child.registry().has_template_engine("t1"));
    }

    #[test]
    fn instances_copy_endpoints() {
        let mut class = AppClass::new("App");
        class.route("/", home).unwrap();
        let app = class.instantiate(Config::new()).unwrap();
        class.route(Rule::new("/later").endpoint("later"), home).unwrap();
        assert!(app.has_endpoint("home"));
        assert!(!app.has_endpoint("later"));
        assert_eq!(app.class_name(), "App");
    }

    #[test]
    fn conflicting_routes_fail_instantiation() {
        let mut class = AppClass::new("App");
        class.route(Rule::new("/a/{x}").endpoint("one"), home).unwrap();
        class.route(Rule::new("/a/{y}").endpoint("two"), home).unwrap();
        assert!(matches!(class.instantiate(Config::new()), Err(Error::Config(_))));
    }
}
