//! Template lookup and engine dispatch.
//!
//! resin does not ship a template language. Applications register one
//! engine function per filename suffix (`mako`, `hbs`, ...) on their
//! [`AppClass`](crate::AppClass), and name templates *without* that suffix:
//!
//! ```text
//! render_template(&req, "people/show.html", &values, Values::new())
//!        ↓  engines registered: ["tera", "hbs"]
//! templates/people/show.html.tera   exists?  no
//! templates/people/show.html.hbs    exists?  yes  → hbs engine("people/show.html.hbs")
//! ```
//!
//! The first registered suffix with an existing file wins.

use std::collections::BTreeMap;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::request::Request;

/// Values handed to a template engine.
pub type Values = Map<String, Value>;

/// A template engine: renders the template at `path` (relative to the
/// application's template directory) with `values`.
pub type TemplateEngine = Arc<dyn Fn(&Request, &str, &Values) -> Result<String> + Send + Sync>;

// ── Directories ───────────────────────────────────────────────────────────────

/// Where templates live.
pub trait TemplateDirectory: Send + Sync + 'static {
    /// Whether `path` names an existing file or directory.
    fn exists(&self, path: &str) -> bool;

    /// Opens the file at `path` for reading.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    fn read_to_string(&self, path: &str) -> io::Result<String> {
        let mut buf = String::new();
        self.open(path)?.read_to_string(&mut buf)?;
        Ok(buf)
    }
}

/// Templates on the filesystem, below `root`.
///
/// Paths are always relative: absolute paths and `..` components resolve to
/// nothing.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path { &self.root }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path);
        let contained = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        contained.then(|| self.root.join(relative))
    }
}

impl TemplateDirectory for FsDirectory {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some_and(|p| p.exists())
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let full = self
            .resolve(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{path}: outside template root")))?;
        Ok(Box::new(std::fs::File::open(full)?))
    }
}

/// Templates held in memory, keyed by relative path. Handy for tests and for
/// templates compiled into the binary.
#[derive(Debug, Default, Clone)]
pub struct MemoryDirectory {
    files: BTreeMap<String, String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }
}

impl TemplateDirectory for MemoryDirectory {
    fn exists(&self, path: &str) -> bool {
        if self.files.contains_key(path) {
            return true;
        }
        let dir = format!("{}/", path.trim_end_matches('/'));
        self.files.range(dir.clone()..).next().is_some_and(|(k, _)| k.starts_with(&dir))
    }

    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        match self.files.get(path) {
            Some(content) => Ok(Box::new(io::Cursor::new(content.clone().into_bytes()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_owned())),
        }
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// Finds the template file for `path` (given without engine suffix).
///
/// Returns the relative path of the winning file and its engine. Each
/// candidate is checked once, in registration order.
pub(crate) fn resolve<'e>(
    engines: &'e [(String, TemplateEngine)],
    directory: &dyn TemplateDirectory,
    path: &str,
) -> Result<(String, &'e TemplateEngine)> {
    let (dirname, basename) = match path.rsplit_once('/') {
        Some((dir, base)) => (format!("{dir}/"), base),
        None => (String::new(), path),
    };

    for (suffix, engine) in engines {
        let candidate = format!("{dirname}{basename}.{suffix}");
        if directory.exists(&candidate) {
            debug!(template = %candidate, "template resolved");
            return Ok((candidate, engine));
        }
    }
    Err(Error::Render { path: path.to_owned() })
}

/// Merges positional `values` with `keywords`; keywords win on collision.
pub(crate) fn merge(values: &Values, keywords: Values) -> Values {
    let mut merged = values.clone();
    merged.extend(keywords);
    merged
}

/// Renders the template at `path` (without engine suffix) using the engines
/// registered on the request's application.
///
/// ```rust,no_run
/// use resin::{Request, Result, template::{render_template, Values}};
///
/// async fn profile(req: Request) -> Result<String> {
///     let mut kw = Values::new();
///     kw.insert("user".into(), req.param("user").unwrap_or_default().into());
///     render_template(&req, "user_profile.html", &Values::new(), kw)
/// }
/// ```
///
/// # Errors
///
/// [`Error::Render`] when no registered suffix has a matching file.
pub fn render_template(request: &Request, path: &str, values: &Values, keywords: Values) -> Result<String> {
    request.app()?.render_template(request, path, values, keywords)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(tag: &'static str) -> TemplateEngine {
        Arc::new(move |_req: &Request, path: &str, _v: &Values| -> Result<String> {
            Ok(format!("{tag}:{path}"))
        })
    }

    fn engines() -> Vec<(String, TemplateEngine)> {
        vec![("t1".to_owned(), engine("t1")), ("t2".to_owned(), engine("t2"))]
    }

    #[test]
    fn first_existing_suffix_wins() {
        let dir = MemoryDirectory::new().with("page.html.t2", "");
        let engines = engines();
        let (path, _) = resolve(&engines, &dir, "page.html").unwrap();
        assert_eq!(path, "page.html.t2");

        let dir = dir.with("page.html.t1", "");
        let (path, _) = resolve(&engines, &dir, "page.html").unwrap();
        assert_eq!(path, "page.html.t1");
    }

    #[test]
    fn nested_paths_keep_their_directory() {
        let dir = MemoryDirectory::new().with("people/show.html.t1", "");
        let engines = engines();
        let (path, _) = resolve(&engines, &dir, "people/show.html").unwrap();
        assert_eq!(path, "people/show.html.t1");
    }

    #[test]
    fn missing_template_is_a_render_error() {
        let engines = engines();
        let Err(err) = resolve(&engines, &MemoryDirectory::new(), "page.html") else {
            panic!("expected a render error");
        };
        assert!(matches!(err, Error::Render { ref path } if path == "page.html"));
    }

    #[test]
    fn keywords_override_values() {
        let mut values = Values::new();
        values.insert("a".into(), 1.into());
        values.insert("b".into(), 2.into());
        let mut kw = Values::new();
        kw.insert("b".into(), 3.into());
        let merged = merge(&values, kw);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 3);
        assert_eq!(values["b"], 2);
    }

    #[test]
    fn memory_directory_knows_files_and_directories() {
        let dir = MemoryDirectory::new().with("c/a", "c-a").with("c/c/a", "c-c-a").with("d", "d");
        assert!(dir.exists("c"));
        assert!(dir.exists("c/c"));
        assert!(dir.exists("c/c/a"));
        assert!(!dir.exists("c/c/b"));
        assert!(!dir.exists("e"));
        assert_eq!(dir.read_to_string("c/c/a").unwrap(), "c-c-a");
        assert!(dir.open("c").is_err());
    }

    #[test]
    fn fs_directory_stays_inside_its_root() {
        let root = std::env::temp_dir().join(format!("resin-templates-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(root.join("people")).unwrap();
        std::fs::write(root.join("people/show.html.t1"), "hi {name}").unwrap();

        let dir = FsDirectory::new(&root);
        assert!(dir.exists("people"));
        assert!(dir.exists("people/show.html.t1"));
        assert!(!dir.exists("people/show.html.t2"));
        assert!(!dir.exists("../etc/passwd"));
        assert_eq!(dir.read_to_string("people/show.html.t1").unwrap(), "hi {name}");
        assert!(dir.open("/etc/passwd").is_err());

        std::fs::remove_dir_all(root).unwrap();
    }
}
