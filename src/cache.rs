//! Per-parse memo table and recursion regulation
//!
//! One [`ParseCache`] exists per top-level parse, shared through the
//! context by `Rc<RefCell<_>>`. It carries three pieces of state:
//!
//! - the memo table, holding the best expression found per
//!   `(position, rule)` for cacheable rules evaluated under a pristine
//!   context;
//! - the visiting set, which marks `(position, rule)` keys whose
//!   evaluation is currently on the stack. A lookup that re-enters a
//!   visiting key is recursion: it is answered with an interrupt (no
//!   result) rather than allowed to loop, and the re-entry is logged so
//!   enclosing evaluations can tell they were cut short;
//! - the poison slot, parking the first fatal stream fault so candidate
//!   iterators can stay infallible while the entry point reports it.
//!
//! Visiting keys are held by [`VisitGuard`]s that clear the flag on drop,
//! so every exit path, early returns included, releases its key.

use crate::expression::Expression;
use crate::rule::RuleId;
use crate::stream::StreamError;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

pub(crate) type CacheKey = (usize, RuleId);

/// A memoized outcome, together with the quality floor it was computed
/// under. A stored best is the global maximum for its key and is valid
/// under any floor; a stored miss only proves there is nothing at or above
/// the recorded floor.
pub(crate) struct MemoEntry {
    pub floor: i64,
    pub best: Option<Expression>,
}

pub struct ParseCache {
    memo: HashMap<CacheKey, MemoEntry>,
    visiting: HashSet<CacheKey>,
    /// Re-entries observed, in order. Consumers snapshot the log length and
    /// later ask whether any re-entry since then targeted a key that is
    /// still being evaluated.
    reentry_log: Vec<CacheKey>,
    poison: Option<StreamError>,
}

impl ParseCache {
    pub fn new() -> Self {
        ParseCache {
            memo: HashMap::new(),
            visiting: HashSet::new(),
            reentry_log: Vec::new(),
            poison: None,
        }
    }

    pub(crate) fn lookup(&self, key: &CacheKey) -> Option<&MemoEntry> {
        self.memo.get(key)
    }

    pub(crate) fn store(&mut self, key: CacheKey, floor: i64, best: Option<Expression>) {
        self.memo.insert(key, MemoEntry { floor, best });
    }

    pub(crate) fn is_visiting(&self, key: &CacheKey) -> bool {
        self.visiting.contains(key)
    }

    pub(crate) fn note_reentry(&mut self, key: CacheKey) {
        self.reentry_log.push(key);
    }

    /// Current position in the re-entry log, for later interrupt checks.
    pub(crate) fn log_mark(&self) -> usize {
        self.reentry_log.len()
    }

    /// Whether any re-entry since `mark` targeted a key whose evaluation is
    /// still in progress. Re-entries that were resolved by a nested
    /// regulator (their key has since left the visiting set) do not count:
    /// only an interrupt aimed at a still-active ancestor makes the
    /// current result unstable.
    pub(crate) fn interrupted_since(&self, mark: usize) -> bool {
        self.reentry_log[mark..]
            .iter()
            .any(|key| self.visiting.contains(key))
    }

    /// Whether a specific key was re-entered since `mark`.
    pub(crate) fn reentered_since(&self, mark: usize, key: &CacheKey) -> bool {
        self.reentry_log[mark..].contains(key)
    }

    pub(crate) fn poison(&mut self, err: StreamError) {
        if self.poison.is_none() {
            self.poison = Some(err);
        }
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poison.is_some()
    }

    pub(crate) fn take_poison(&mut self) -> Option<StreamError> {
        self.poison.take()
    }
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped membership of a key in the visiting set. Dropping the guard
/// clears the flag, so a panic-free early return can never leave a key
/// permanently marked.
pub struct VisitGuard {
    cache: Rc<RefCell<ParseCache>>,
    key: CacheKey,
}

impl VisitGuard {
    /// Mark `key` as being evaluated. Returns `None` (and logs the
    /// re-entry) if the key is already on the stack.
    pub(crate) fn enter(cache: &Rc<RefCell<ParseCache>>, key: CacheKey) -> Option<VisitGuard> {
        let mut inner = cache.borrow_mut();
        if !inner.visiting.insert(key) {
            inner.note_reentry(key);
            return None;
        }
        Some(VisitGuard {
            cache: Rc::clone(cache),
            key,
        })
    }
}

impl Drop for VisitGuard {
    fn drop(&mut self) {
        let mut inner = self.cache.borrow_mut();
        inner.visiting.remove(&self.key);
        // Once the outermost evaluation unwinds, old re-entries can no
        // longer satisfy any interrupt check; reclaim the log.
        if inner.visiting.is_empty() {
            inner.reentry_log.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(pos: usize, rule: u32) -> CacheKey {
        (pos, RuleId(rule))
    }

    #[test]
    fn test_guard_clears_on_drop() {
        let cache = Rc::new(RefCell::new(ParseCache::new()));
        {
            let _guard = VisitGuard::enter(&cache, key(0, 1)).unwrap();
            assert!(cache.borrow().is_visiting(&key(0, 1)));
        }
        assert!(!cache.borrow().is_visiting(&key(0, 1)));
    }

    #[test]
    fn test_reentry_is_refused_and_logged() {
        let cache = Rc::new(RefCell::new(ParseCache::new()));
        let mark = cache.borrow().log_mark();
        let _guard = VisitGuard::enter(&cache, key(0, 1)).unwrap();
        assert!(VisitGuard::enter(&cache, key(0, 1)).is_none());
        assert!(cache.borrow().reentered_since(mark, &key(0, 1)));
        assert!(cache.borrow().interrupted_since(mark));
    }

    #[test]
    fn test_resolved_reentry_does_not_interrupt() {
        let cache = Rc::new(RefCell::new(ParseCache::new()));
        let _outer = VisitGuard::enter(&cache, key(0, 1)).unwrap();
        let mark = cache.borrow().log_mark();
        {
            let _inner = VisitGuard::enter(&cache, key(2, 1)).unwrap();
            // Nested re-entry of the inner key, resolved before the check.
            assert!(VisitGuard::enter(&cache, key(2, 1)).is_none());
        }
        // The re-entered key is no longer visiting, so the outer
        // evaluation was not cut short.
        assert!(!cache.borrow().interrupted_since(mark));
        assert!(cache.borrow().reentered_since(mark, &key(2, 1)));
    }

    #[test]
    fn test_log_reclaimed_when_stack_empties() {
        let cache = Rc::new(RefCell::new(ParseCache::new()));
        {
            let _guard = VisitGuard::enter(&cache, key(0, 1)).unwrap();
            assert!(VisitGuard::enter(&cache, key(0, 1)).is_none());
            assert_eq!(cache.borrow().log_mark(), 1);
        }
        assert_eq!(cache.borrow().log_mark(), 0);
    }

    #[test]
    fn test_poison_keeps_first_fault() {
        let mut cache = ParseCache::new();
        cache.poison(StreamError::InvalidUtf8 { offset: 3 });
        cache.poison(StreamError::InvalidUtf8 { offset: 9 });
        assert!(cache.is_poisoned());
        match cache.take_poison() {
            Some(StreamError::InvalidUtf8 { offset }) => assert_eq!(offset, 3),
            other => panic!("unexpected poison: {:?}", other),
        }
        assert!(!cache.is_poisoned());
    }
}
