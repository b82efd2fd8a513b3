//! Application configuration.
//!
//! A [`Config`] is a flat, string-keyed mapping owned by one [`App`](crate::App)
//! instance. resin itself reads a single key (`session_cookie`); everything
//! else belongs to the application. Values are loaded from TOML files or set
//! programmatically.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

/// Config key naming the session cookie.
pub const SESSION_COOKIE_KEY: &str = "session_cookie";

/// Cookie name used when `session_cookie` is not configured.
pub const DEFAULT_SESSION_COOKIE: &str = "resin_session";

/// String-keyed configuration mapping.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Deserializes the value under `key` into `T`.
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()).map_err(Error::from))
            .transpose()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize { self.values.len() }
    pub fn is_empty(&self) -> bool { self.values.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Inserts every pair whose key is not already present. Existing keys
    /// keep their values.
    pub fn update_unless_exists<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in pairs {
            self.values.entry(key.into()).or_insert_with(|| value.into());
        }
    }

    /// Loads top-level keys from a TOML file.
    ///
    /// Keys already present are kept unless `overwrite` is set. Keys starting
    /// with `_` are ignored.
    pub fn update_from_file(&mut self, path: impl AsRef<Path>, overwrite: bool) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.update_from_str(&content, overwrite)
    }

    /// Same as [`update_from_file`](Self::update_from_file) for TOML text.
    pub fn update_from_str(&mut self, toml_text: &str, overwrite: bool) -> Result<()> {
        let table: BTreeMap<String, Value> = toml::from_str(toml_text)?;
        self.merge(table, overwrite);
        Ok(())
    }

    /// Loads the fields of any serializable value, typically a struct of
    /// defaults. Same key rules as [`update_from_file`](Self::update_from_file).
    ///
    /// ```rust
    /// use resin::Config;
    ///
    /// #[derive(serde::Serialize)]
    /// struct Defaults { debug: bool }
    ///
    /// let mut config = Config::new();
    /// config.update_from_serializable(&Defaults { debug: true }, false).unwrap();
    /// assert_eq!(config.get_as::<bool>("debug").unwrap(), Some(true));
    /// ```
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `value` does not serialize to a map.
    pub fn update_from_serializable<T: Serialize>(&mut self, value: &T, overwrite: bool) -> Result<()> {
        match serde_json::to_value(value)? {
            Value::Object(map) => {
                self.merge(map, overwrite);
                Ok(())
            }
            other => Err(Error::Config(format!("config source must be a map, got `{other}`"))),
        }
    }

    fn merge(&mut self, table: impl IntoIterator<Item = (String, Value)>, overwrite: bool) {
        for (key, value) in table {
            if key.starts_with('_') {
                continue;
            }
            if overwrite || !self.values.contains_key(&key) {
                self.values.insert(key, value);
            }
        }
    }

    /// The configured session cookie name.
    pub fn session_cookie(&self) -> &str {
        self.values
            .get(SESSION_COOKIE_KEY)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_SESSION_COOKIE)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_unless_exists_keeps_existing_keys() {
        let mut config: Config = [("a", 1), ("b", 2), ("c", 3)].into_iter().collect();
        config.update_unless_exists([("b", 1), ("d", 2), ("e", 3), ("c", 4), ("f", 5)]);
        let expected: Config =
            [("a", 1), ("b", 2), ("c", 3), ("d", 2), ("e", 3), ("f", 5)].into_iter().collect();
        assert_eq!(config, expected);
    }

    #[test]
    fn toml_loading_respects_overwrite_and_private_keys() {
        let mut config = Config::new();
        config.insert("debug", true);
        config
            .update_from_str("debug = false\ndatabase_uri = \"sqlite://\"\n_secret = 1\n", false)
            .unwrap();
        assert_eq!(config.get("debug"), Some(&Value::Bool(true)));
        assert_eq!(config.get_as::<String>("database_uri").unwrap().as_deref(), Some("sqlite://"));
        assert!(!config.contains_key("_secret"));

        config.update_from_str("debug = false", true).unwrap();
        assert_eq!(config.get_as::<bool>("debug").unwrap(), Some(false));
    }

    #[test]
    fn tables_deserialize_into_structs() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct Database {
            uri: String,
            pool: u32,
        }

        let mut config = Config::new();
        config.update_from_str("[database]\nuri = \"postgres://db\"\npool = 4\n", true).unwrap();
        let db: Option<Database> = config.get_as("database").unwrap();
        assert_eq!(db, Some(Database { uri: "postgres://db".into(), pool: 4 }));
        assert_eq!(config.get_as::<Database>("missing").unwrap(), None);
    }

    #[test]
    fn serializable_defaults_respect_overwrite_and_private_keys() {
        #[derive(serde::Serialize)]
        struct Defaults {
            debug: bool,
            database_uri: &'static str,
            #[serde(rename = "_secret")]
            secret: u32,
        }
        let defaults = Defaults { debug: false, database_uri: "sqlite://", secret: 7 };

        let mut config = Config::new();
        config.insert("debug", true);
        config.update_from_serializable(&defaults, false).unwrap();
        assert_eq!(config.get("debug"), Some(&Value::Bool(true)));
        assert_eq!(config.get_as::<String>("database_uri").unwrap().as_deref(), Some("sqlite://"));
        assert!(!config.contains_key("_secret"));

        config.update_from_serializable(&defaults, true).unwrap();
        assert_eq!(config.get("debug"), Some(&Value::Bool(false)));

        assert!(matches!(config.update_from_serializable(&42, false), Err(Error::Config(_))));
        assert_eq!(config.len(), 2);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let mut config = Config::new();
        assert!(matches!(config.update_from_str("= nope", false), Err(Error::ConfigFile(_))));
    }

    #[test]
    fn session_cookie_defaults() {
        let mut config = Config::new();
        assert_eq!(config.session_cookie(), DEFAULT_SESSION_COOKIE);
        config.insert(SESSION_COOKIE_KEY, "sid");
        assert_eq!(config.session_cookie(), "sid");
    }
}
