//! Cookie-keyed sessions.
//!
//! A request resolves its session lazily: the first call to
//! [`Request::session`](crate::Request::session) reads the session cookie and
//! asks the application's [`SessionStore`] for that id, or for a fresh session
//! when there is no cookie. After the handler returns, a modified session is
//! saved and, if it is new, its id is sent back in a `Set-Cookie` header.
//!
//! The store is the only place sessions are shared between requests. Two
//! concurrent requests on the same id are not serialized here: the last save
//! wins.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::trace;
use uuid::Uuid;

/// A mutable, string-keyed session mapping.
#[derive(Debug)]
pub struct Session {
    id: String,
    data: Mutex<Map<String, Value>>,
    is_new: bool,
    modified: AtomicBool,
}

impl Session {
    /// A session with `id` holding `data`. `is_new` marks sessions the client
    /// does not know about yet.
    pub fn new(id: impl Into<String>, data: Map<String, Value>, is_new: bool) -> Self {
        Self { id: id.into(), data: Mutex::new(data), is_new, modified: AtomicBool::new(false) }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn is_new(&self) -> bool { self.is_new }

    /// Whether anything was written since the session was loaded.
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let previous = self.data.lock().insert(key.into(), value.into());
        self.modified.store(true, Ordering::Release);
        previous
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        let removed = self.data.lock().remove(key);
        if removed.is_some() {
            self.modified.store(true, Ordering::Release);
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    pub fn len(&self) -> usize { self.data.lock().len() }
    pub fn is_empty(&self) -> bool { self.data.lock().is_empty() }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.lock().clone()
    }
}

/// Backend holding session contents between requests.
pub trait SessionStore: Send + Sync + 'static {
    /// The session stored under `sid`. Unknown ids yield a new, empty session
    /// with a freshly generated id.
    fn get(&self, sid: &str) -> Session;

    /// A new, empty session with a freshly generated id.
    fn create(&self) -> Session;

    /// Persists the session's current contents.
    fn save(&self, session: &Session);
}

/// Generates an unguessable session id.
pub fn generate_sid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// In-process session store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<String, Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize { self.sessions.len() }
    pub fn is_empty(&self) -> bool { self.sessions.is_empty() }
}

impl SessionStore for MemoryStore {
    fn get(&self, sid: &str) -> Session {
        match self.sessions.get(sid) {
            Some(data) => Session::new(sid, data.value().clone(), false),
            None => {
                trace!("unknown session id, starting a new session");
                self.create()
            }
        }
    }

    fn create(&self) -> Session {
        Session::new(generate_sid(), Map::new(), true)
    }

    fn save(&self, session: &Session) {
        self.sessions.insert(session.id().to_owned(), session.snapshot());
    }
}

// ── Cookies ───────────────────────────────────────────────────────────────────

/// Finds `name` in `Cookie` header values.
pub(crate) fn find_cookie<'a, I>(headers: I, name: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    headers
        .into_iter()
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"'))
}

/// `Set-Cookie` value for a session id.
pub(crate) fn session_cookie(name: &str, sid: &str) -> String {
    format!("{name}={sid}; Path=/; HttpOnly")
}
