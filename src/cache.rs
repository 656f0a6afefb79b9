use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use primitive_types::H256;
use tiny_keccak::{Hasher, Keccak};
use tracing::debug;

use crate::compiler::CompiledRoutine;
use crate::operation::JitError;

pub trait RoutineCache {
    fn lookup(&self, hash: &H256) -> Option<Arc<CompiledRoutine>>;
    fn insert(&self, hash: H256, routine: Arc<CompiledRoutine>);
}

pub fn code_hash(code: &[u8]) -> H256 {
    let mut out = [0u8; 32];
    let mut hasher = Keccak::v256();
    hasher.update(code);
    hasher.finalize(&mut out);
    H256(out)
}

type Slot = Arc<Mutex<Option<Arc<CompiledRoutine>>>>;

/// In-process cache. Each hash owns a slot whose lock is held for the
/// duration of a compilation, so concurrent misses on the same code wait
/// for the first compiler instead of racing it.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: Mutex<HashMap<H256, Slot>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, hash: H256) -> Slot {
        lock(&self.slots).entry(hash).or_default().clone()
    }

    /// Returns the cached routine for `hash`, compiling it with `compile`
    /// on a miss. Failed compilations are not kept.
    pub fn get_or_compile<F>(&self, hash: H256, compile: F) -> Result<Arc<CompiledRoutine>, JitError>
    where
        F: FnOnce() -> Result<CompiledRoutine, JitError>,
    {
        let slot = self.slot(hash);
        let mut entry = lock(&*slot);
        if let Some(routine) = entry.as_ref() {
            debug!(%hash, "routine cache hit");
            return Ok(routine.clone());
        }
        debug!(%hash, "routine cache miss");
        let routine = match compile() {
            Ok(routine) => Arc::new(routine),
            Err(err) => {
                drop(entry);
                self.evict_empty(hash, &slot);
                return Err(err);
            }
        };
        *entry = Some(routine.clone());
        Ok(routine)
    }

    fn evict_empty(&self, hash: H256, slot: &Slot) {
        let mut slots = lock(&self.slots);
        // Clones are only taken under the map lock, so a count of two means
        // the map and this caller are the sole holders and nobody is queued.
        let unused = Arc::strong_count(slot) == 2;
        if unused && slot.try_lock().map(|e| e.is_none()).unwrap_or(false) {
            slots.remove(&hash);
        }
    }

    /// Number of hashes with a compiled routine.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.try_lock().map(|e| e.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        lock(&self.slots).len()
    }
}

impl RoutineCache for MemoryCache {
    fn lookup(&self, hash: &H256) -> Option<Arc<CompiledRoutine>> {
        let slot = lock(&self.slots).get(hash).cloned()?;
        // A slot that is locked is mid-compilation; treat it as a miss.
        let entry = slot.try_lock().ok()?;
        entry.clone()
    }

    fn insert(&self, hash: H256, routine: Arc<CompiledRoutine>) {
        let slot = self.slot(hash);
        *lock(&*slot) = Some(routine);
    }
}
