//! Routing rules, path matching and reverse routing.
//!
//! A [`Rule`] is a path pattern, a set of accepted methods and an endpoint
//! name. Rules are collected on an [`AppClass`](crate::AppClass); each
//! [`App`](crate::App) compiles them once into a [`Matcher`].
//!
//! Matching is delegated to radix trees from [`matchit`], one tree per HTTP
//! method plus one for rules that accept any method. Pattern syntax is
//! matchit's: `{name}` captures one segment, `{*name}` captures the rest of
//! the path, `{{` / `}}` are literal braces.

use std::collections::{HashMap, HashSet};

use http::Method;
use matchit::Router as MatchitRouter;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ').add(b'"').add(b'#').add(b'%').add(b'<').add(b'>')
    .add(b'?').add(b'`').add(b'{').add(b'}').add(b'/');

/// Same as [`SEGMENT`] but keeps `/`, for catch-all variables.
const TAIL: &AsciiSet = &CONTROLS
    .add(b' ').add(b'"').add(b'#').add(b'%').add(b'<').add(b'>')
    .add(b'?').add(b'`').add(b'{').add(b'}');

// ── Rule ──────────────────────────────────────────────────────────────────────

/// A URL pattern, the methods it accepts and the endpoint it routes to.
///
/// ```rust
/// use http::Method;
/// use resin::Rule;
///
/// let rule = Rule::new("/people/{name}").method(Method::GET).endpoint("person");
/// assert_eq!(rule.endpoint_name(), Some("person"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pattern: String,
    methods: Vec<Method>,
    endpoint: Option<String>,
}

impl Rule {
    /// A rule for `pattern` accepting every method, with no endpoint yet.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), methods: Vec::new(), endpoint: None }
    }

    /// Restricts the rule to `method` (cumulative). Accepting `GET` implies
    /// accepting `HEAD`.
    pub fn method(mut self, method: Method) -> Self {
        if method == Method::GET && !self.methods.contains(&Method::HEAD) {
            self.methods.push(Method::HEAD);
        }
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn methods(self, methods: impl IntoIterator<Item = Method>) -> Self {
        methods.into_iter().fold(self, Rule::method)
    }

    pub fn endpoint(mut self, name: impl Into<String>) -> Self {
        self.endpoint = Some(name.into());
        self
    }

    pub fn pattern(&self) -> &str { &self.pattern }
    pub fn endpoint_name(&self) -> Option<&str> { self.endpoint.as_deref() }

    /// Accepted methods; empty means any method.
    pub fn allowed_methods(&self) -> &[Method] { &self.methods }

    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    pub(crate) fn set_endpoint(&mut self, name: String) {
        self.endpoint = Some(name);
    }

    /// Checks that the pattern is well formed and that matchit accepts it.
    pub(crate) fn validate(&self) -> Result<()> {
        if !self.pattern.starts_with('/') {
            return Err(Error::config(format!("rule `{}` must start with `/`", self.pattern)));
        }
        parse_pattern(&self.pattern)?;
        MatchitRouter::new()
            .insert(self.pattern.as_str(), ())
            .map_err(|e| Error::config(format!("invalid rule `{}`: {e}", self.pattern)))
    }
}

impl From<&str> for Rule {
    fn from(pattern: &str) -> Self { Self::new(pattern) }
}

impl From<String> for Rule {
    fn from(pattern: String) -> Self { Self::new(pattern) }
}

// ── Pattern parsing (reverse routing) ─────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum Part<'a> {
    Literal(String),
    Param(&'a str),
    CatchAll(&'a str),
}

fn parse_pattern(pattern: &str) -> Result<Vec<Part<'_>>> {
    let malformed = || Error::config(format!("malformed rule `{pattern}`"));
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = pattern;

    while let Some(c) = rest.chars().next() {
        match c {
            '{' if rest.starts_with("{{") => { literal.push('{'); rest = &rest[2..]; }
            '}' if rest.starts_with("}}") => { literal.push('}'); rest = &rest[2..]; }
            '{' => {
                let end = rest.find('}').ok_or_else(malformed)?;
                let name = &rest[1..end];
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(match name.strip_prefix('*') {
                    Some(tail) if !tail.is_empty() => Part::CatchAll(tail),
                    None if !name.is_empty() => Part::Param(name),
                    _ => return Err(malformed()),
                });
                rest = &rest[end + 1..];
            }
            '}' => return Err(malformed()),
            _ => { literal.push(c); rest = &rest[c.len_utf8()..]; }
        }
    }
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    Ok(parts)
}

// ── Matcher ───────────────────────────────────────────────────────────────────

/// Result of matching a request path against the compiled rules.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A rule matched. Variables are percent-decoded.
    Matched { endpoint: String, variables: HashMap<String, String> },
    /// Only the slash-terminated form of the path matches.
    Redirect { location: String },
    /// The path matches, but not for this method.
    MethodNotAllowed { allowed: Vec<Method> },
    NoMatch,
}

/// Rules compiled into per-method radix trees. Immutable once built.
pub struct Matcher {
    rules: Vec<Rule>,
    by_method: HashMap<Method, MatchitRouter<usize>>,
    any_method: MatchitRouter<usize>,
}

impl Matcher {
    /// Compiles `rules`.
    ///
    /// Rules that accept any method are added to every method's tree, so
    /// matchit's static-over-wildcard priority holds across method sets. When
    /// two rules share a pattern for the same method the one registered first
    /// wins. Fails if a rule has no endpoint or if two different patterns
    /// cannot live in the same tree.
    pub fn new(rules: &[Rule]) -> Result<Self> {
        let named: Vec<Method> = rules
            .iter()
            .flat_map(|r| r.methods.iter().cloned())
            .fold(Vec::new(), |mut acc, m| {
                if !acc.contains(&m) {
                    acc.push(m);
                }
                acc
            });

        let mut by_method: HashMap<Method, MatchitRouter<usize>> =
            named.iter().map(|m| (m.clone(), MatchitRouter::new())).collect();
        let mut any_method = MatchitRouter::new();
        // (tree, pattern) pairs already taken; `None` is the any-method tree.
        let mut taken: HashSet<(Option<Method>, &str)> = HashSet::new();

        for (idx, rule) in rules.iter().enumerate() {
            if rule.endpoint.is_none() {
                return Err(Error::config(format!("rule `{}` has no endpoint", rule.pattern)));
            }
            let targets: Vec<Option<Method>> = if rule.methods.is_empty() {
                named.iter().cloned().map(Some).chain([None]).collect()
            } else {
                rule.methods.iter().cloned().map(Some).collect()
            };

            for target in targets {
                if !taken.insert((target.clone(), rule.pattern.as_str())) {
                    debug!(pattern = %rule.pattern, method = ?target, "shadowed by an earlier rule");
                    continue;
                }
                let tree = match &target {
                    Some(method) => by_method.entry(method.clone()).or_default(),
                    None => &mut any_method,
                };
                tree.insert(rule.pattern.as_str(), idx)
                    .map_err(|e| Error::config(format!("cannot route `{}`: {e}", rule.pattern)))?;
            }
        }

        Ok(Self { rules: rules.to_vec(), by_method, any_method })
    }

    pub fn rules(&self) -> &[Rule] { &self.rules }

    /// Matches `path` for `method`.
    ///
    /// Order: the method's tree (any-method rules alone for methods no rule
    /// names), then the slash-terminated path (redirect), then other methods
    /// (405).
    pub fn match_path(&self, method: &Method, path: &str) -> MatchOutcome {
        if let Some(outcome) = self.lookup(method, path) {
            return outcome;
        }

        if !path.ends_with('/') {
            let slashed = format!("{path}/");
            if self.lookup(method, &slashed).is_some() {
                trace!(path, "redirecting to slash-terminated path");
                return MatchOutcome::Redirect { location: slashed };
            }
        }

        let mut allowed: Vec<Method> = self
            .by_method
            .iter()
            .filter(|(m, tree)| *m != method && tree.at(path).is_ok())
            .map(|(m, _)| m.clone())
            .collect();
        if !allowed.is_empty() {
            allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
            return MatchOutcome::MethodNotAllowed { allowed };
        }

        MatchOutcome::NoMatch
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<MatchOutcome> {
        let tree = self.by_method.get(method).unwrap_or(&self.any_method);
        let matched = tree.at(path).ok()?;

        let rule = &self.rules[*matched.value];
        let variables = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), percent_decode_str(v).decode_utf8_lossy().into_owned()))
            .collect();
        Some(MatchOutcome::Matched {
            endpoint: rule.endpoint.clone().unwrap_or_default(),
            variables,
        })
    }

    /// Builds the path for `endpoint` from `values`.
    ///
    /// The first rule for the endpoint (in registration order) that accepts
    /// `method` and whose variables are all supplied wins. Values that are not
    /// part of the pattern become the query string.
    pub fn build_url(
        &self,
        endpoint: &str,
        values: &[(&str, &str)],
        method: Option<&Method>,
    ) -> Result<String> {
        for rule in &self.rules {
            if rule.endpoint.as_deref() != Some(endpoint) {
                continue;
            }
            if method.is_some_and(|m| !rule.accepts(m)) {
                continue;
            }
            let parts = parse_pattern(&rule.pattern)?;
            if let Some(url) = substitute(&parts, values) {
                return Ok(url);
            }
        }
        Err(Error::UrlBuild(endpoint.to_owned()))
    }
}

fn substitute(parts: &[Part<'_>], values: &[(&str, &str)]) -> Option<String> {
    let lookup = |name: &str| values.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
    let mut path = String::new();
    let mut used = Vec::new();

    for part in parts {
        match part {
            Part::Literal(text) => path.push_str(text),
            Part::Param(name) => {
                path.extend(utf8_percent_encode(lookup(name)?, SEGMENT));
                used.push(*name);
            }
            Part::CatchAll(name) => {
                path.extend(utf8_percent_encode(lookup(name)?, TAIL));
                used.push(*name);
            }
        }
    }

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    let mut has_query = false;
    for (key, value) in values.iter().filter(|(k, _)| !used.contains(k)) {
        query.append_pair(key, value);
        has_query = true;
    }
    if has_query {
        path.push('?');
        path.push_str(&query.finish());
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn matcher() -> Matcher {
        Matcher::new(&[
            Rule::new("/people/{name}").method(Method::GET).endpoint("person"),
            Rule::new("/people").method(Method::POST).endpoint("create_person"),
            Rule::new("/files/{*path}").endpoint("file"),
            Rule::new("/docs/").method(Method::GET).endpoint("docs"),
        ])
        .unwrap()
    }

    #[test]
    fn matches_with_decoded_variables() {
        let m = matcher();
        assert_eq!(
            m.match_path(&Method::GET, "/people/alice%20b"),
            MatchOutcome::Matched { endpoint: "person".into(), variables: vars(&[("name", "alice b")]) },
        );
        assert_eq!(
            m.match_path(&Method::DELETE, "/files/a/b.txt"),
            MatchOutcome::Matched { endpoint: "file".into(), variables: vars(&[("path", "a/b.txt")]) },
        );
    }

    #[test]
    fn get_rules_answer_head() {
        let m = matcher();
        assert!(matches!(m.match_path(&Method::HEAD, "/people/bob"), MatchOutcome::Matched { .. }));
    }

    #[test]
    fn missing_trailing_slash_redirects() {
        assert_eq!(
            matcher().match_path(&Method::GET, "/docs"),
            MatchOutcome::Redirect { location: "/docs/".into() },
        );
    }

    #[test]
    fn wrong_method_is_reported_with_allowed_set() {
        assert_eq!(
            matcher().match_path(&Method::GET, "/people"),
            MatchOutcome::MethodNotAllowed { allowed: vec![Method::POST] },
        );
    }

    #[test]
    fn unknown_paths_do_not_match() {
        assert_eq!(matcher().match_path(&Method::GET, "/nope"), MatchOutcome::NoMatch);
    }

    #[test]
    fn conflicting_rules_are_rejected() {
        let err = Matcher::new(&[
            Rule::new("/a/{x}").method(Method::GET).endpoint("one"),
            Rule::new("/a/{y}").method(Method::GET).endpoint("two"),
        ]);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn duplicate_patterns_keep_the_first_rule() {
        let m = Matcher::new(&[
            Rule::new("/").endpoint("home"),
            Rule::new("/").endpoint("index"),
            Rule::new("/about").method(Method::GET).endpoint("about"),
            Rule::new("/about").method(Method::GET).endpoint("about_v2"),
        ])
        .unwrap();
        assert_eq!(
            m.match_path(&Method::GET, "/"),
            MatchOutcome::Matched { endpoint: "home".into(), variables: HashMap::new() },
        );
        assert_eq!(
            m.match_path(&Method::GET, "/about"),
            MatchOutcome::Matched { endpoint: "about".into(), variables: HashMap::new() },
        );
    }

    #[test]
    fn static_any_method_rules_beat_method_wildcards() {
        let m = Matcher::new(&[
            Rule::new("/files/{*path}").method(Method::GET).endpoint("files"),
            Rule::new("/files/readme").endpoint("readme"),
        ])
        .unwrap();
        assert_eq!(
            m.match_path(&Method::GET, "/files/readme"),
            MatchOutcome::Matched { endpoint: "readme".into(), variables: HashMap::new() },
        );
        assert_eq!(
            m.match_path(&Method::GET, "/files/other"),
            MatchOutcome::Matched { endpoint: "files".into(), variables: vars(&[("path", "other")]) },
        );
        assert!(matches!(
            m.match_path(&Method::DELETE, "/files/readme"),
            MatchOutcome::Matched { ref endpoint, .. } if endpoint == "readme"
        ));
        assert_eq!(
            m.match_path(&Method::DELETE, "/files/other"),
            MatchOutcome::MethodNotAllowed { allowed: vec![Method::GET, Method::HEAD] },
        );
    }

    #[test]
    fn rule_validation() {
        assert!(Rule::new("/ok/{id}").validate().is_ok());
        assert!(Rule::new("no-slash").validate().is_err());
        assert!(Rule::new("/open/{id").validate().is_err());
        assert!(Rule::new("/empty/{}").validate().is_err());
        assert!(Rule::new("/stray}").validate().is_err());
    }

    #[test]
    fn build_url_substitutes_and_round_trips() {
        let m = matcher();
        let url = m.build_url("person", &[("name", "alice b")], None).unwrap();
        assert_eq!(url, "/people/alice%20b");
        assert_eq!(
            m.match_path(&Method::GET, &url),
            MatchOutcome::Matched { endpoint: "person".into(), variables: vars(&[("name", "alice b")]) },
        );

        let url = m.build_url("file", &[("path", "a/b c.txt")], None).unwrap();
        assert_eq!(url, "/files/a/b%20c.txt");
    }

    #[test]
    fn build_url_puts_extra_values_in_the_query() {
        let url = matcher().build_url("person", &[("name", "bob"), ("page", "2")], None).unwrap();
        assert_eq!(url, "/people/bob?page=2");
    }

    #[test]
    fn build_url_failures() {
        let m = matcher();
        assert!(matches!(m.build_url("person", &[], None), Err(Error::UrlBuild(_))));
        assert!(matches!(m.build_url("ghost", &[], None), Err(Error::UrlBuild(_))));
        assert!(m.build_url("create_person", &[], Some(&Method::GET)).is_err());
        assert_eq!(m.build_url("create_person", &[], Some(&Method::POST)).unwrap(), "/people");
    }
}
