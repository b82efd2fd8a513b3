//! Unified error type.

use http::StatusCode;
use thiserror::Error;

/// Result alias used throughout resin.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by resin's fallible operations.
///
/// Two families live here. Registration mistakes (`Config`) surface while an
/// [`AppClass`](crate::AppClass) is being put together and are never retried.
/// Everything with a [`status`](Error::status) is an HTTP-level signal: the
/// dispatcher turns it into a 404 / 405 / 406 response. The rest propagate to
/// the hosting transport untouched.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid registration: duplicate suffix or mimetype, malformed rule,
    /// handler without a usable endpoint name, conflicting routes.
    #[error("configuration error: {0}")]
    Config(String),

    /// None of the registered mimetypes satisfies the request's `Accept`.
    #[error("not acceptable: no registered mimetype satisfies `{accept}`")]
    NotAcceptable { accept: String },

    /// No template file exists for any registered engine suffix.
    #[error("no matched template files: {path}")]
    Render { path: String },

    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed { allowed: Vec<http::Method> },

    /// Reverse routing found no rule for the endpoint that accepts the
    /// given variables.
    #[error("cannot build a url for endpoint `{0}`")]
    UrlBuild(String),

    /// The request was used after its application was dropped.
    #[error("request is detached from its application")]
    Detached,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("serialization: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Application-defined failure raised from a handler, engine or serializer.
    #[error("handler: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wraps an arbitrary application error.
    pub fn handler(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Handler(Box::new(e))
    }

    /// The HTTP status this error maps to, if it is one the dispatcher
    /// recognizes. `None` means the error is not an HTTP signal.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::NotAcceptable { .. } | Self::Render { .. } => Some(StatusCode::NOT_ACCEPTABLE),
            Self::NotFound => Some(StatusCode::NOT_FOUND),
            Self::MethodNotAllowed { .. } => Some(StatusCode::METHOD_NOT_ALLOWED),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_signals_carry_a_status() {
        assert_eq!(Error::NotFound.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(
            Error::Render { path: "page.html".into() }.status(),
            Some(StatusCode::NOT_ACCEPTABLE),
        );
        assert_eq!(
            Error::NotAcceptable { accept: "text/plain".into() }.status(),
            Some(StatusCode::NOT_ACCEPTABLE),
        );
        assert_eq!(Error::config("dup").status(), None);
        assert_eq!(Error::Detached.status(), None);
        let io = std::io::Error::other("disk on fire");
        assert_eq!(Error::from(io).status(), None);
    }

    #[test]
    fn render_error_keeps_the_attempted_path() {
        let err = Error::Render { path: "people/show.html".into() };
        assert!(err.to_string().contains("people/show.html"));
    }
}
