//! Interning pool for the heap strings shared across the interpreter.
//!
//! Interned strings are `Rc<str>` handles: equality-deduplicated on entry
//! and refcounted for the rest of their life. The pool itself keeps one
//! reference, so `purge` can drop entries nothing else holds anymore.
//! The pool is shared between sibling interpreter states and is not
//! synchronized; the interpreter is single-threaded by design.

use rustc_hash::FxHashSet;
use std::rc::Rc;

/// Deduplicating store of refcounted strings.
#[derive(Default)]
pub struct StringPool {
    entries: FxHashSet<Rc<str>>,
}

impl StringPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> StringPool {
        StringPool::default()
    }

    /// Intern a string, returning the canonical shared handle for its
    /// contents.
    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(existing) = self.entries.get(s) {
            return existing.clone();
        }
        let handle: Rc<str> = Rc::from(s);
        self.entries.insert(handle.clone());
        handle
    }

    /// Number of distinct strings held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries whose only remaining reference is the pool's own.
    pub fn purge(&mut self) {
        self.entries.retain(|s| Rc::strong_count(s) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedupes() {
        let mut pool = StringPool::new();
        let a = pool.intern("hello");
        let b = pool.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_contents_distinct_handles() {
        let mut pool = StringPool::new();
        let a = pool.intern("a");
        let b = pool.intern("b");
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn purge_drops_unreferenced() {
        let mut pool = StringPool::new();
        let keep = pool.intern("keep");
        pool.intern("drop");
        pool.purge();
        assert_eq!(pool.len(), 1);
        assert_eq!(&*pool.intern("keep"), "keep");
        drop(keep);
    }
}
