//! Per-class registries.
//!
//! A [`Registry`] holds what an application class knows before it serves:
//! routing rules, the endpoint table, template engines by suffix and
//! renderers by mimetype. Every table sits behind an `Arc`; cloning a registry
//! shares them, and the first mutation through [`Arc::make_mut`] gives the
//! mutating registry its own copy. A subclass therefore starts out seeing its
//! parent's entries and never writes through to the parent or to siblings.
//!
//! Suffix and mimetype keys are unique per registry: registering one twice is
//! a configuration error. Endpoint names may be reused; the newest handler
//! wins.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::routing::Rule;
use crate::template::TemplateEngine;

/// A serializer: turns a value into its textual representation.
pub type Serializer = Arc<dyn Fn(&Request, &Value) -> Result<String> + Send + Sync>;

/// What a negotiated mimetype renders with.
#[derive(Clone)]
pub enum Renderer {
    /// Serialize the value directly.
    Serializer(Serializer),
    /// Render the template `path + "." + suffix`.
    Suffix(String),
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serializer(_) => f.write_str("Serializer(..)"),
            Self::Suffix(s) => f.debug_tuple("Suffix").field(s).finish(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    rules: Arc<Vec<Rule>>,
    endpoints: Arc<HashMap<String, BoxedHandler>>,
    template_engines: Arc<Vec<(String, TemplateEngine)>>,
    mimetype_mapping: Arc<Vec<(String, Renderer)>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> &[Rule] { &self.rules }
    pub fn endpoints(&self) -> &HashMap<String, BoxedHandler> { &self.endpoints }

    /// Template engines in registration order.
    pub fn template_engines(&self) -> &[(String, TemplateEngine)] { &self.template_engines }

    /// Mimetype renderers in registration order.
    pub fn mimetype_mapping(&self) -> &[(String, Renderer)] { &self.mimetype_mapping }

    pub fn has_template_engine(&self, suffix: &str) -> bool {
        self.template_engines.iter().any(|(s, _)| s == suffix)
    }

    pub fn has_mimetype(&self, mimetype: &str) -> bool {
        self.mimetype_mapping.iter().any(|(m, _)| m == mimetype)
    }

    /// Appends `rule` and maps its endpoint to `handler`.
    pub fn add_rule(&mut self, rule: Rule, handler: BoxedHandler) -> Result<()> {
        rule.validate()?;
        let endpoint = rule
            .endpoint_name()
            .ok_or_else(|| Error::config(format!("rule `{}` has no endpoint", rule.pattern())))?
            .to_owned();
        trace!(pattern = rule.pattern(), endpoint = %endpoint, "rule added");
        Arc::make_mut(&mut self.rules).push(rule);
        Arc::make_mut(&mut self.endpoints).insert(endpoint, handler);
        Ok(())
    }

    pub fn add_template_engine(&mut self, suffix: &str, engine: TemplateEngine) -> Result<()> {
        validate_suffix(suffix)?;
        if self.has_template_engine(suffix) {
            return Err(Error::config(format!("suffix `{suffix}` already exists")));
        }
        trace!(suffix, "template engine added");
        Arc::make_mut(&mut self.template_engines).push((suffix.to_owned(), engine));
        Ok(())
    }

    /// Maps every one of `mimetypes` to `serializer`. Validated as a batch:
    /// on error nothing is registered.
    pub fn add_serializer(&mut self, mimetypes: &[&str], serializer: Serializer) -> Result<()> {
        if mimetypes.is_empty() {
            return Err(Error::config("one or more mimetypes required"));
        }
        let entries = mimetypes
            .iter()
            .map(|m| (m.to_string(), Renderer::Serializer(Arc::clone(&serializer))))
            .collect();
        self.commit_mimetypes(entries)
    }

    /// Associates each mimetype with a template suffix. All-or-nothing: any
    /// conflict, with existing entries or within the batch, leaves the
    /// mapping untouched.
    pub fn associate_mimetypes(&mut self, pairs: Vec<(String, String)>) -> Result<()> {
        if pairs.is_empty() {
            return Err(Error::config("one or more mimetypes/suffixes required"));
        }
        for (_, suffix) in &pairs {
            validate_suffix(suffix)?;
        }
        let entries = pairs.into_iter().map(|(m, s)| (m, Renderer::Suffix(s))).collect();
        self.commit_mimetypes(entries)
    }

    fn commit_mimetypes(&mut self, entries: Vec<(String, Renderer)>) -> Result<()> {
        for (idx, (mimetype, _)) in entries.iter().enumerate() {
            if !mimetype.contains('/') {
                return Err(Error::config(format!("`{mimetype}` is not a mimetype")));
            }
            let repeated = entries[..idx].iter().any(|(m, _)| m == mimetype);
            if repeated || self.has_mimetype(mimetype) {
                return Err(Error::config(format!("mimetype `{mimetype}` already exists")));
            }
        }
        trace!(count = entries.len(), "mimetypes added");
        Arc::make_mut(&mut self.mimetype_mapping).extend(entries);
        Ok(())
    }
}

fn validate_suffix(suffix: &str) -> Result<()> {
    if suffix.is_empty() || suffix.contains(['.', '/']) {
        return Err(Error::config(format!("invalid template suffix `{suffix}`")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;

    async fn home(_req: Request) -> &'static str {
        "home"
    }

    fn engine() -> TemplateEngine {
        Arc::new(|_req: &Request, path: &str, _v: &crate::template::Values| -> Result<String> {
            Ok(path.to_owned())
        })
    }

    fn serializer() -> Serializer {
        Arc::new(|_req: &Request, v: &Value| -> Result<String> { Ok(v.to_string()) })
    }

    #[test]
    fn duplicate_suffix_is_rejected() {
        let mut reg = Registry::new();
        reg.add_template_engine("t1", engine()).unwrap();
        assert!(matches!(reg.add_template_engine("t1", engine()), Err(Error::Config(_))));
        assert!(reg.add_template_engine("", engine()).is_err());
        assert!(reg.add_template_engine("a.b", engine()).is_err());
        assert_eq!(reg.template_engines().len(), 1);
    }

    #[test]
    fn duplicate_mimetype_is_rejected() {
        let mut reg = Registry::new();
        reg.add_serializer(&["application/json"], serializer()).unwrap();
        assert!(reg.add_serializer(&["application/json"], serializer()).is_err());
        assert!(reg
            .associate_mimetypes(vec![("application/json".into(), "json".into())])
            .is_err());
        assert!(reg.add_serializer(&["nonsense"], serializer()).is_err());
    }

    #[test]
    fn associate_mimetypes_is_all_or_nothing() {
        let mut reg = Registry::new();
        reg.associate_mimetypes(vec![("text/xml".into(), "xml".into())]).unwrap();

        let err = reg.associate_mimetypes(vec![
            ("text/html".into(), "html".into()),
            ("text/xml".into(), "xml2".into()),
        ]);
        assert!(err.is_err());
        assert!(!reg.has_mimetype("text/html"));

        let err = reg.associate_mimetypes(vec![
            ("text/csv".into(), "csv".into()),
            ("text/csv".into(), "csv".into()),
        ]);
        assert!(err.is_err());
        assert!(!reg.has_mimetype("text/csv"));

        assert!(reg.associate_mimetypes(Vec::new()).is_err());
        assert_eq!(reg.mimetype_mapping().len(), 1);
    }

    #[test]
    fn multi_mimetype_serializer_is_atomic() {
        let mut reg = Registry::new();
        reg.add_serializer(&["text/xml"], serializer()).unwrap();
        assert!(reg.add_serializer(&["application/x-plist", "text/xml"], serializer()).is_err());
        assert!(!reg.has_mimetype("application/x-plist"));
        assert!(reg.add_serializer(&[], serializer()).is_err());
    }

    #[test]
    fn endpoint_names_may_be_reused() {
        let mut reg = Registry::new();
        reg.add_rule(Rule::new("/").endpoint("home"), home.into_boxed_handler()).unwrap();
        reg.add_rule(Rule::new("/index").endpoint("home"), home.into_boxed_handler()).unwrap();
        assert_eq!(reg.rules().len(), 2);
        assert_eq!(reg.endpoints().len(), 1);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        let mut reg = Registry::new();
        assert!(reg.add_rule(Rule::new("/"), home.into_boxed_handler()).is_err());
        assert!(reg.add_rule(Rule::new("nope").endpoint("x"), home.into_boxed_handler()).is_err());
        assert!(reg.rules().is_empty());
    }

    #[test]
    fn clones_share_until_written() {
        let mut parent = Registry::new();
        parent.add_template_engine("t1", engine()).unwrap();

        let mut child = parent.clone();
        assert!(Arc::ptr_eq(&parent.template_engines, &child.template_engines));
        assert!(child.has_template_engine("t1"));

        child.add_template_engine("t2", engine()).unwrap();
        assert!(!Arc::ptr_eq(&parent.template_engines, &child.template_engines));
        assert!(!parent.has_template_engine("t2"));
        assert!(Arc::ptr_eq(&parent.mimetype_mapping, &child.mimetype_mapping));
    }
}
