//! The backend pool: an ordered set of backends, dual-indexed by position and
//! URL, behind a single reader-writer lock. Mutations are exclusive; reads
//! (including `range`) are shared.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::state::{BackendState, Statistics};

/// A small, bounded opaque key→value cache consulted by fan-out-after-read
/// policies. Unused by minimal implementations.
#[derive(Debug)]
pub struct BackendCache {
    capacity: usize,
    entries: Mutex<HashMap<String, String>>,
    order: Mutex<Vec<String>>,
}

impl BackendCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: String) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        let mut order = self.order.lock().unwrap();

        if !entries.contains_key(&key) {
            if order.len() >= self.capacity {
                if let Some(oldest) = order.first().cloned() {
                    order.remove(0);
                    entries.remove(&oldest);
                }
            }
            order.push(key.clone());
        }
        entries.insert(key, value);
    }
}

/// One configured upstream endpoint. Identity is the URL string.
#[derive(Debug)]
pub struct Backend {
    pub url: String,
    pub state: BackendState,
    pub stats: Statistics,
    pub cache: Option<BackendCache>,
}

impl Backend {
    pub fn new(url: impl Into<String>, cache_size: usize) -> Self {
        Self {
            url: url.into(),
            state: BackendState::new(),
            stats: Statistics::new(),
            cache: if cache_size > 0 {
                Some(BackendCache::new(cache_size))
            } else {
                None
            },
        }
    }
}

/// A key for `Pool::get`: either a positional index or the backend's URL.
pub enum Key<'a> {
    Index(usize),
    Url(&'a str),
}

impl<'a> From<usize> for Key<'a> {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(s: &'a str) -> Self {
        Key::Url(s)
    }
}

struct Inner {
    nodes: Vec<Arc<Backend>>,
    by_url: HashMap<String, usize>,
}

/// Ordered sequence of backends with a URL→backend index. Invariants: the
/// index's key set equals the (duplicate-free) set of URLs in `nodes`;
/// sequence order is insertion order of surviving entries.
pub struct Pool {
    inner: RwLock<Inner>,
}

impl Pool {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                nodes: Vec::new(),
                by_url: HashMap::new(),
            }),
        }
    }

    /// Insert `backend`. No-op, returns `false`, if its URL is already present.
    pub fn add(&self, backend: Backend) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.by_url.contains_key(&backend.url) {
            return false;
        }
        let idx = inner.nodes.len();
        inner.by_url.insert(backend.url.clone(), idx);
        inner.nodes.push(Arc::new(backend));
        true
    }

    /// Remove the backend with the given URL, preserving the relative order
    /// of the remaining entries. No-op, returns `false`, if not present.
    pub fn delete(&self, url: &str) -> bool {
        let mut inner = self.inner.write().unwrap();
        let Some(&idx) = inner.by_url.get(url) else {
            return false;
        };
        inner.nodes.remove(idx);
        inner.by_url.remove(url);
        for (u, i) in inner.by_url.iter_mut() {
            if *i > idx {
                *i -= 1;
            }
            let _ = u;
        }
        true
    }

    pub fn get<'a>(&self, key: impl Into<Key<'a>>) -> Option<Arc<Backend>> {
        let inner = self.inner.read().unwrap();
        match key.into() {
            Key::Index(i) => inner.nodes.get(i).cloned(),
            Key::Url(u) => inner.by_url.get(u).and_then(|&i| inner.nodes.get(i)).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate in sequence order, passing `(index, backend)`. Stops early if
    /// `f` returns `false`. Must not mutate the pool from within `f` — the
    /// callback runs under the shared read lock.
    pub fn range(&self, mut f: impl FnMut(usize, &Arc<Backend>) -> bool) {
        let inner = self.inner.read().unwrap();
        for (i, node) in inner.nodes.iter().enumerate() {
            if !f(i, node) {
                break;
            }
        }
    }

    /// Snapshot `(index, url)` pairs under one read-lock acquisition. Lets
    /// callers (fan-out dispatch, in particular) work from a consistent view
    /// without holding the pool's lock across an await point.
    pub fn snapshot(&self) -> Vec<(usize, String)> {
        let inner = self.inner.read().unwrap();
        inner
            .nodes
            .iter()
            .enumerate()
            .map(|(i, b)| (i, b.url.clone()))
            .collect()
    }

    /// All backend URLs currently in the pool, insertion order.
    pub fn urls(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner.nodes.iter().map(|b| b.url.clone()).collect()
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}
