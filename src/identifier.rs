// Identifier interning
// Maps strings to stable 32-bit ids with a process-wide table.
// Equality and hashing on ids are integer-fast; stringification is a lookup.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Placeholder returned when an id is not present in the table.
pub const UNKNOWN_IDENTIFIER: &str = "[?]";

/// An interned string, represented by its 32-bit id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Intern `name` and return its id. Registering the same string twice
    /// yields the same id.
    pub fn new(name: &str) -> Self {
        Self(IdentifierTable::global().register(name))
    }

    /// The raw 32-bit value. Stable for the lifetime of the process.
    pub fn value(self) -> u32 {
        self.0
    }

    /// The canonical string for this id, or `"[?]"` if it was never
    /// registered in this process.
    pub fn as_str(self) -> Arc<str> {
        IdentifierTable::global()
            .lookup(self.0)
            .unwrap_or_else(|| Arc::from(UNKNOWN_IDENTIFIER))
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.as_str())
    }
}

impl From<&str> for StringId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Process-wide identifier table shared by every runtime.
/// Collisions of the 32-bit hash are resolved by linear probing at
/// registration time; the mutex is held across the whole probe-and-insert.
pub struct IdentifierTable {
    inner: Mutex<TableInner>,
}

#[derive(Default)]
struct TableInner {
    by_id: FxHashMap<u32, Arc<str>>,
    by_name: FxHashMap<Arc<str>, u32>,
}

impl IdentifierTable {
    pub fn global() -> &'static Self {
        static TABLE: OnceLock<IdentifierTable> = OnceLock::new();
        TABLE.get_or_init(|| IdentifierTable {
            inner: Mutex::new(TableInner::default()),
        })
    }

    fn register(&self, name: &str) -> u32 {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_name.get(name) {
            return id;
        }
        let mut id = hash(name);
        while inner.by_id.contains_key(&id) {
            // occupied by a different string
            id = id.wrapping_add(1);
        }
        let entry: Arc<str> = Arc::from(name);
        inner.by_id.insert(id, entry.clone());
        inner.by_name.insert(entry, id);
        id
    }

    fn lookup(&self, id: u32) -> Option<Arc<str>> {
        self.inner.lock().by_id.get(&id).cloned()
    }
}

fn hash(name: &str) -> u32 {
    let mut h: u32 = 0;
    for byte in name.bytes() {
        h ^= (byte as u32).wrapping_add(h).wrapping_mul(1234393) % 0x00ff_ffff;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let id = StringId::new("someAttribute");
        assert_eq!(&*id.as_str(), "someAttribute");
        assert_eq!(StringId::new("someAttribute"), id);
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let a = StringId::new("alpha");
        let b = StringId::new("beta");
        assert_ne!(a, b);
        assert_eq!(&*a.as_str(), "alpha");
        assert_eq!(&*b.as_str(), "beta");
    }

    #[test]
    fn many_registrations_stay_consistent() {
        let ids: Vec<StringId> = (0..512)
            .map(|i| StringId::new(&format!("ident_{i}")))
            .collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(&*id.as_str(), format!("ident_{i}").as_str());
            assert_eq!(StringId::new(&format!("ident_{i}")), *id);
        }
    }

    #[test]
    fn unknown_id_renders_placeholder() {
        // An id that was never registered: probe far away from real hashes.
        let ghost = StringId(0xdead_beef);
        assert_eq!(&*ghost.as_str(), UNKNOWN_IDENTIFIER);
    }
}
