//! Per-thread "current context" bookkeeping for backends without a driver
//! notion of current (headless, Metal).

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identifier of a native context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

thread_local! {
    static CURRENT: Cell<Option<ContextId>> = const { Cell::new(None) };
}

/// Bind `id` on the calling thread, replacing whatever was bound.
pub fn bind(id: ContextId) {
    CURRENT.with(|c| c.set(Some(id)));
}

/// Unbind `id` if it is the context bound on the calling thread.
pub fn unbind(id: ContextId) {
    CURRENT.with(|c| {
        if c.get() == Some(id) {
            c.set(None);
        }
    });
}

pub fn current() -> Option<ContextId> {
    CURRENT.with(Cell::get)
}

pub fn is_current(id: ContextId) -> bool {
    current() == Some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_is_per_thread() {
        let id = ContextId::next();
        bind(id);
        assert!(is_current(id));
        let other = std::thread::spawn(move || is_current(id)).join().unwrap();
        assert!(!other);
        unbind(id);
        assert_eq!(current(), None);
    }

    #[test]
    fn unbind_ignores_other_contexts() {
        let a = ContextId::next();
        let b = ContextId::next();
        bind(a);
        unbind(b);
        assert!(is_current(a));
        unbind(a);
    }
}
