//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The registry holds handlers of *different* types in one endpoint table, so
//! each handler is hidden behind a trait object (`dyn ErasedHandler`):
//!
//! ```text
//! async fn person(req: Request) -> String { … }   ← user writes this
//!        ↓ class.route("/people/{name}", person)
//! person.into_boxed_handler()                     ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(person))                     ← stored as BoxedHandler
//!        ↓
//! handler.call(req)  at request time              ← one vtable dispatch
//!        ↓
//! Box::pin(async { person(req).await.into_renderable() })
//! ```
//!
//! Cloning an [`AppClass`](crate::AppClass) or building an
//! [`App`](crate::App) copies endpoint tables; with `Arc` that is one atomic
//! increment per handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::request::Request;
use crate::response::{IntoRenderable, Renderable};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to the handler outcome.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<Renderable>> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across classes, instances and requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any function with the shape
///
/// ```text
/// async fn name(req: Request) -> impl IntoRenderable
/// ```
///
/// Path variables are read from the request with
/// [`Request::param`](crate::Request::param). The trait is sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;

    /// The endpoint name derived from the function's own name, or `None`
    /// for closures and other unnamed callables.
    #[doc(hidden)]
    fn endpoint_name(&self) -> Option<String>;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoRenderable + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoRenderable + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }

    fn endpoint_name(&self) -> Option<String> {
        endpoint_name_of(std::any::type_name::<F>())
    }
}

/// Last path segment of a type name, if it is a plain identifier.
/// `my_app::views::person` → `person`; closures (`…::{{closure}}`) → `None`.
fn endpoint_name_of(type_name: &str) -> Option<String> {
    let last = type_name.rsplit("::").next()?;
    let mut chars = last.chars();
    let first = chars.next()?;
    let is_ident = (first == '_' || first.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric());
    is_ident.then(|| last.to_owned())
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Holds a concrete handler `F` and implements [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoRenderable + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_renderable() })
    }
}
