//! # resin
//!
//! A small web framework built around application classes, content
//! negotiation and pluggable template engines.
//!
//! ## The model
//!
//! An [`AppClass`] collects everything an application knows: URL rules and
//! the endpoints they route to, template engines keyed by file suffix, and
//! renderers keyed by mimetype. [`AppClass::clone_as`] derives a subclass that
//! inherits those registrations and can add its own without touching the
//! parent. [`AppClass::instantiate`] turns a class plus a [`Config`] into an
//! [`App`], which [`Server`] serves over HTTP/1 and HTTP/2.
//!
//! A handler is any `async fn(Request) -> impl IntoRenderable`. It can return
//! text, a full [`Response`] or an error; routing misses, method mismatches and
//! failed negotiation become 404, 405 and 406 responses.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use resin::{AppClass, Config, Request, Result, Server};
//! use resin::template::Values;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut class = AppClass::new("Greeter");
//!     class
//!         .route("/", home)?
//!         .route("/people/{name}", person)?
//!         .serializer(&["application/json"], |_req, value| Ok(value.to_string()))?
//!         .associate_mimetypes([("text/html", "html")])?;
//!
//!     let app = class.instantiate(Config::new())?;
//!     Server::bind("0.0.0.0:5555")?.serve(app).await
//! }
//!
//! async fn home(_req: Request) -> &'static str {
//!     "Hello, world!"
//! }
//!
//! async fn person(req: Request) -> Result<String> {
//!     let name = req.param("name").unwrap_or("nobody");
//!     // Picks `application/json` or `people/show.html.*` from the Accept header.
//!     resin::negotiation::render(&req, &json!({ "name": name }), "people/show", &Values::new(), Values::new())
//! }
//! ```

mod app;
mod config;
mod context;
mod error;
mod handler;
mod request;
mod response;
mod routing;
mod server;
mod session;

pub mod negotiation;
pub mod registry;
pub mod template;

pub use app::{App, AppClass, DEFAULT_TEMPLATE_PATH};
pub use config::{Config, DEFAULT_SESSION_COOKIE, SESSION_COOKIE_KEY};
pub use context::Context;
pub use error::{Error, Result};
pub use handler::Handler;
pub use http::{Method, StatusCode};
pub use negotiation::Accept;
pub use registry::{Renderer, Serializer};
pub use request::Request;
pub use response::{ContentType, IntoRenderable, Renderable, Response, ResponseBuilder};
pub use routing::{MatchOutcome, Matcher, Rule};
pub use server::{DEFAULT_MAX_BODY_SIZE, Server};
pub use session::{MemoryStore, Session, SessionStore, generate_sid};
pub use template::{FsDirectory, MemoryDirectory, TemplateDirectory};
