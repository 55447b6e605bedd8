//! Process-wide (or, per the re-design notes, explicitly-constructed)
//! language name/id registry (spec §4.2).
//!
//! The original is a singleton; here it is a plain struct constructed once
//! at startup and passed to whatever needs it, so tests get a fresh
//! instance instead of sharing global state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

/// A registered language's numeric id, as handed out by [`LanguageRegistry`].
pub type LangId = u32;

/// The reserved id for an unregistered language name.
pub const UNKNOWN: LangId = 0;

const UNKNOWN_NAME: &str = "<unknown>";

/// Bidirectional `name <-> uid` mapping. Reads use a shared lock, writes an
/// exclusive one; ids are dense and monotonically increasing starting at 1.
pub struct LanguageRegistry {
    by_name: RwLock<HashMap<String, u32>>,
    by_id: RwLock<HashMap<u32, String>>,
    next_id: AtomicU32,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self {
            by_name: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(UNKNOWN + 1),
        }
    }

    /// Returns the uid for `name`, or `UNKNOWN` if it has not been
    /// registered. Shared lock only.
    pub fn get_uid(&self, name: &str) -> u32 {
        self.by_name
            .read()
            .expect("language registry poisoned")
            .get(name)
            .copied()
            .unwrap_or(UNKNOWN)
    }

    /// Registers `name` if absent and returns its uid; idempotent — calling
    /// it twice with the same name returns the same id.
    pub fn register_uid(&self, name: &str) -> u32 {
        if let Some(existing) = self.by_name.read().expect("poisoned").get(name) {
            return *existing;
        }
        let mut by_name = self.by_name.write().expect("poisoned");
        // Re-check: another writer may have registered `name` while we
        // waited for the exclusive lock.
        if let Some(existing) = by_name.get(name) {
            return *existing;
        }
        let uid = self.next_id.fetch_add(1, Ordering::SeqCst);
        by_name.insert(name.to_owned(), uid);
        self.by_id
            .write()
            .expect("poisoned")
            .insert(uid, name.to_owned());
        uid
    }

    /// Returns the name for `uid`, or the sentinel `"<unknown>"` if absent.
    pub fn name_of(&self, uid: u32) -> String {
        self.by_id
            .read()
            .expect("poisoned")
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_NAME.to_owned())
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
