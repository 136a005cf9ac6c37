//! String interning for names that flow into a `Code` object's name pools.
//!
//! Identifiers, attribute names, and import targets are deduplicated here so
//! that `names`/`var_names`/`cell_vars`/`free_vars` entries can be compared
//! by a cheap integer instead of a string.

use std::sync::{LazyLock, RwLock};

use ahash::AHashMap;

/// Index into the global intern table.
///
/// The low 128 values are reserved for single ASCII bytes so single-character
/// identifiers (`x`, `i`, `_`) never allocate a map entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

const ASCII_BAND: u32 = 128;

impl StringId {
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }

    fn from_ascii(byte: u8) -> Self {
        Self(u32::from(byte))
    }
}

struct InternTable {
    strings: Vec<&'static str>,
    index: AHashMap<&'static str, StringId>,
}

impl InternTable {
    fn new() -> Self {
        Self {
            strings: Vec::new(),
            index: AHashMap::new(),
        }
    }
}

static ASCII_STRS: LazyLock<[&'static str; 128]> = LazyLock::new(|| {
    let mut out: [&'static str; 128] = [""; 128];
    for (byte, slot) in out.iter_mut().enumerate() {
        let s = (byte as u8 as char).to_string();
        *slot = Box::leak(s.into_boxed_str());
    }
    out
});

static TABLE: LazyLock<RwLock<InternTable>> = LazyLock::new(|| RwLock::new(InternTable::new()));

/// Deduplicating interner producing [`StringId`] handles.
///
/// Cheap to construct (it only references the shared global table); cloning
/// an `Interner` is free.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interner;

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Interns `s`, returning the same id for equal strings across every
    /// `Interner` instance (the table is process-global).
    pub fn intern(&self, s: &str) -> StringId {
        if s.len() == 1 {
            let byte = s.as_bytes()[0];
            if byte < 128 {
                return StringId::from_ascii(byte);
            }
        }

        if let Some(id) = self.lookup(s) {
            return id;
        }

        let mut table = TABLE.write().expect("intern table poisoned");
        if let Some(&id) = table.index.get(s) {
            return id;
        }
        let leaked: &'static str = Box::leak(s.to_string().into_boxed_str());
        let id = StringId(ASCII_BAND + u32::try_from(table.strings.len()).expect("intern table overflow"));
        table.strings.push(leaked);
        table.index.insert(leaked, id);
        id
    }

    fn lookup(&self, s: &str) -> Option<StringId> {
        let table = TABLE.read().expect("intern table poisoned");
        table.index.get(s).copied()
    }

    #[must_use]
    pub fn resolve(&self, id: StringId) -> &'static str {
        let idx = id.index();
        if idx < ASCII_BAND {
            return ASCII_STRS[idx as usize];
        }
        let table = TABLE.read().expect("intern table poisoned");
        table.strings[(idx - ASCII_BAND) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_singles_never_touch_the_map() {
        let interner = Interner::new();
        let a = interner.intern("a");
        let b = interner.intern("a");
        assert_eq!(a, b);
        assert_eq!(a.index(), u32::from(b'a'));
    }

    #[test]
    fn longer_strings_dedupe() {
        let interner = Interner::new();
        let a = interner.intern("hello_world");
        let b = interner.intern("hello_world");
        assert_eq!(a, b);
        assert_eq!(interner.resolve(a), "hello_world");
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        assert_ne!(a, b);
    }
}
