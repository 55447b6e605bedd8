use std::sync::atomic::{AtomicU64, Ordering};

/// Issues continuous, monotonically increasing ids in a multi-threaded
/// environment. Mirrors the original `id_manager<id_type>`: a minimum id
/// plus a counter, except the counter is a lock-free atomic rather than a
/// mutex-guarded integer since an atomic increment is sufficient here.
pub struct IdManager {
    min_id: u64,
    next_id: AtomicU64,
}

impl IdManager {
    /// Creates a manager that will hand out `min_id`, `min_id + 1`, ...
    pub fn new(min_id: u64) -> Self {
        Self {
            min_id,
            next_id: AtomicU64::new(min_id),
        }
    }

    /// Returns the next id and advances the counter. Thread-safe.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn min_id(&self) -> u64 {
        self.min_id
    }
}

impl Default for IdManager {
    fn default() -> Self {
        Self::new(0)
    }
}
