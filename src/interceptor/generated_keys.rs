// SPDX-License-Identifier: Apache-2.0

//! Generated-keys cache
//!
//! Keeps the last generated-keys cursor of one statement so that repeated
//! accessor calls return the same handle until it is closed or replaced.

use tracing::warn;

use super::cursor::CursorHandle;

/// `Empty` or `Cached(cursor)`; owned by a single statement proxy
#[derive(Debug, Default)]
pub struct GeneratedKeysCache {
    cached: Option<CursorHandle>,
}

impl GeneratedKeysCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves to `Cached` with the given cursor
    pub fn store(&mut self, cursor: CursorHandle) {
        self.cached = Some(cursor);
    }

    /// Cached cursor, if it is still open
    pub fn reusable(&self) -> Option<CursorHandle> {
        self.cached.as_ref().filter(|c| !c.is_closed()).cloned()
    }

    /// Forgets the cached cursor without closing it
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Closes the cached cursor and moves to `Empty`
    ///
    /// Closing an already-closed cursor is a no-op.
    pub fn close_cached(&mut self) {
        if let Some(cursor) = self.cached.take() {
            if cursor.is_closed() {
                return;
            }
            if let Err(e) = cursor.close() {
                warn!("Failed to close generated keys cursor: {}", e);
            }
        }
    }

    pub fn current(&self) -> Option<&CursorHandle> {
        self.cached.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qore_core::mock::{MockCursor, MockState};
    use std::sync::Arc;

    fn handle(state: &Arc<MockState>) -> CursorHandle {
        CursorHandle::new(Box::new(MockCursor::new(
            Arc::clone(state),
            "MockKeysCursor",
            vec![vec![qore_core::Value::Int(1)]],
        )))
    }

    #[test]
    fn test_reusable_only_while_open() {
        let state = MockState::new();
        let mut cache = GeneratedKeysCache::new();
        assert!(cache.reusable().is_none());

        let cursor = handle(&state);
        cache.store(cursor.clone());
        assert!(cache.reusable().unwrap().ptr_eq(&cursor));

        cursor.close().unwrap();
        assert!(cache.reusable().is_none());
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_close_cached_empties_and_skips_closed() {
        let state = MockState::new();
        let mut cache = GeneratedKeysCache::new();
        let cursor = handle(&state);
        cache.store(cursor.clone());

        cache.close_cached();
        assert!(cache.is_empty());
        assert!(cursor.is_closed());
        assert_eq!(state.count("close_cursor(MockKeysCursor)"), 1);

        cache.store(cursor);
        cache.close_cached();
        assert_eq!(state.count("close_cursor(MockKeysCursor)"), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_keeps_cursor_open() {
        let state = MockState::new();
        let mut cache = GeneratedKeysCache::new();
        let cursor = handle(&state);
        cache.store(cursor.clone());
        cache.invalidate();

        assert!(cache.current().is_none());
        assert!(!cursor.is_closed());
    }
}
