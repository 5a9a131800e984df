//! The single active-resolver slot shared by all loads of one loader.
//!
//! Every load takes a generation number when it starts. Only the load holding
//! the newest generation may install its resolver or deliver a scene; older
//! loads notice at their next suspension point and wind down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use vista_assets::Resolver;

struct Installed {
    generation: u64,
    resolver: Arc<Resolver>,
}

#[derive(Default)]
pub struct ActiveSlot {
    generation: AtomicU64,
    active: Mutex<Option<Installed>>,
}

impl ActiveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new load, superseding whatever was in flight.
    pub fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Load generation {} started", generation);
        generation
    }

    /// Generation of the newest load.
    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Install `resolver` for `generation`, replacing any previous one.
    /// Refused (returns `false`) once the generation has been superseded.
    pub fn install(&self, generation: u64, resolver: Arc<Resolver>) -> bool {
        let mut active = self.active.lock();
        if !self.is_current(generation) {
            return false;
        }
        *active = Some(Installed {
            generation,
            resolver,
        });
        true
    }

    /// Run `deliver` only if `generation` is still the newest load. Holding
    /// the slot lock while delivering keeps a concurrent install out.
    pub fn deliver_if_current(&self, generation: u64, deliver: impl FnOnce()) -> bool {
        let _active = self.active.lock();
        if !self.is_current(generation) {
            return false;
        }
        deliver();
        true
    }

    /// Drop the installed resolver if it belongs to `generation`.
    pub fn clear(&self, generation: u64) {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.generation) == Some(generation) {
            *active = None;
        }
    }

    /// Generation whose resolver is installed, if any.
    pub fn installed_generation(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|a| a.generation)
    }

    /// The installed resolver, if any.
    pub fn resolver(&self) -> Option<Arc<Resolver>> {
        self.active.lock().as_ref().map(|a| Arc::clone(&a.resolver))
    }
}
