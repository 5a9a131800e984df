//! Short-lived local handles for in-memory payloads.
//!
//! A handle is a `blob:vista/<uuid>` URL naming a payload held by a
//! [`HandleRegistry`]. Handles are created while a load is in flight and must
//! be released when that load settles; [`HandleScope`] records every handle it
//! creates and releases them all exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::asset_map::Payload;

const HANDLE_PREFIX: &str = "blob:vista/";

/// A URL naming an in-memory payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalHandle {
    id: Uuid,
    url: String,
}

impl LocalHandle {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            url: format!("{}{}", HANDLE_PREFIX, id),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parse a handle URL back into its id.
    pub fn parse_id(url: &str) -> Option<Uuid> {
        url.strip_prefix(HANDLE_PREFIX)
            .and_then(|rest| Uuid::parse_str(rest).ok())
    }
}

/// Lifetime counters for a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleStats {
    pub created: usize,
    pub released: usize,
    /// Releases of handles that were already gone.
    pub stale_releases: usize,
}

impl HandleStats {
    pub fn live(&self) -> usize {
        self.created - self.released
    }
}

#[derive(Default)]
struct RegistryInner {
    live: Mutex<HashMap<Uuid, Payload>>,
    created: AtomicUsize,
    released: AtomicUsize,
    stale_releases: AtomicUsize,
}

/// Process-wide store of live local handles. Cloning shares the store.
#[derive(Clone, Default)]
pub struct HandleRegistry {
    inner: Arc<RegistryInner>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a payload under a fresh handle.
    pub fn create(&self, payload: Payload) -> LocalHandle {
        let handle = LocalHandle::new(Uuid::new_v4());
        self.inner.live.lock().insert(handle.id, payload);
        self.inner.created.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Look up the payload behind a handle URL.
    pub fn get(&self, url: &str) -> Option<Payload> {
        let id = LocalHandle::parse_id(url)?;
        self.inner.live.lock().get(&id).cloned()
    }

    /// Release a handle. Returns `false` if it was not live.
    pub fn release(&self, handle: &LocalHandle) -> bool {
        if self.inner.live.lock().remove(&handle.id).is_some() {
            self.inner.released.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.inner.stale_releases.fetch_add(1, Ordering::Relaxed);
            warn!("Release of unknown handle {}", handle.url);
            false
        }
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    pub fn stats(&self) -> HandleStats {
        HandleStats {
            created: self.inner.created.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            stale_releases: self.inner.stale_releases.load(Ordering::Relaxed),
        }
    }
}

/// The set of handles created on behalf of one load operation.
///
/// `release_all` drains the set, so calling it more than once (or dropping the
/// scope afterwards) never releases a handle twice.
pub struct HandleScope {
    registry: HandleRegistry,
    handles: Mutex<Vec<LocalHandle>>,
}

impl HandleScope {
    pub fn new(registry: HandleRegistry) -> Self {
        Self {
            registry,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn create(&self, payload: Payload) -> LocalHandle {
        let handle = self.registry.create(payload);
        self.handles.lock().push(handle.clone());
        handle
    }

    /// Number of handles created and not yet released by this scope.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every handle created so far. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        let count = handles.len();
        for handle in &handles {
            self.registry.release(handle);
        }
        if count > 0 {
            debug!("Released {} local handles", count);
        }
        count
    }
}

impl Drop for HandleScope {
    fn drop(&mut self) {
        self.release_all();
    }
}
