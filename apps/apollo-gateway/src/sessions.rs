use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;
use uuid::Uuid;

/// The transport-side half of a session that the registry can close.
pub trait SessionStream: Send + Sync + 'static {
    fn close(&self) -> anyhow::Result<()>;
}

pub type CloseHook = Box<dyn FnOnce(&str) + Send>;

struct Entry<S> {
    stream: Arc<S>,
    on_close: Option<CloseHook>,
}

/// Live sessions keyed by a generated id.
///
/// The registry only references each stream; the transport that opened it owns it.
/// Every operation holds the lock for its whole critical section, so create and
/// remove never interleave.
pub struct SessionRegistry<S> {
    inner: Arc<Mutex<HashMap<String, Entry<S>>>>,
}

impl<S> Clone for SessionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<S: SessionStream> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<S>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `stream` under a fresh id and return the id.
    pub fn create(&self, stream: S, on_close: Option<CloseHook>) -> String {
        let mut sessions = self.lock();
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(
            id.clone(),
            Entry {
                stream: Arc::new(stream),
                on_close,
            },
        );
        debug!(session_id = %id, active = sessions.len(), "session registered");
        id
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<S>> {
        self.lock().get(id).map(|e| e.stream.clone())
    }

    /// Forget `id` and fire its close hook. Absent ids are ignored.
    pub fn remove(&self, id: &str) {
        let entry = self.lock().remove(id);
        if let Some(entry) = entry {
            if let Some(hook) = entry.on_close {
                hook(id);
            }
            debug!(session_id = %id, "session removed");
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close and forget every session.
    ///
    /// A failing close does not stop the others; failures come back per id.
    pub fn close_all(&self) -> Vec<(String, anyhow::Error)> {
        let drained = self.lock().drain().collect::<Vec<_>>();
        let mut failures = Vec::new();
        for (id, entry) in drained {
            if let Err(e) = entry.stream.close() {
                failures.push((id.clone(), e));
            }
            if let Some(hook) = entry.on_close {
                hook(&id);
            }
        }
        failures
    }
}
