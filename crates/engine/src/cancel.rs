//! In-flight request cancellation.
//!
//! Every running exchange gets a [`CancellationToken`]. The same token is
//! threaded through retrieval, model calls and tool calls, so cancelling it
//! aborts the agent loop at its next suspension point.
//!
//! Every token is a child of the map's root, so [`CancelMap::cancel_all`]
//! on shutdown reaches requests registered before and after it. A request
//! id can be in flight only once; completing it frees the id.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Tracks cancellation tokens per request id.
pub struct CancelMap {
    root: CancellationToken,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a request. Returns `None` while a
    /// request with the same id is still registered.
    pub fn register(&self, request_id: &str) -> Option<CancellationToken> {
        let mut tokens = self.tokens.lock();
        if tokens.contains_key(request_id) {
            return None;
        }
        let token = self.root.child_token();
        tokens.insert(request_id.to_owned(), token.clone());
        Some(token)
    }

    /// Cancel a running request. Returns true if it was registered.
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.tokens.lock().get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget a request (called when it completes).
    pub fn remove(&self, request_id: &str) {
        self.tokens.lock().remove(request_id);
    }

    pub fn is_running(&self, request_id: &str) -> bool {
        self.tokens.lock().contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }

    /// Cancel every registered request, and any registered later.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("r1").unwrap();
        assert!(!token.is_cancelled());
        assert!(map.is_running("r1"));

        assert!(map.cancel("r1"));
        assert!(token.is_cancelled());

        map.remove("r1");
        assert!(!map.is_running("r1"));
        assert!(!map.cancel("r1"));
    }

    #[test]
    fn in_flight_id_cannot_be_registered_twice() {
        let map = CancelMap::new();
        let first = map.register("r1").unwrap();
        assert!(map.register("r1").is_none());
        assert_eq!(map.len(), 1);

        // The original request is still the one a cancel reaches.
        assert!(map.cancel("r1"));
        assert!(first.is_cancelled());

        map.remove("r1");
        let again = map.register("r1").unwrap();
        assert!(!again.is_cancelled());
    }

    #[test]
    fn cancel_all_reaches_every_request() {
        let map = CancelMap::new();
        let a = map.register("a").unwrap();
        let b = map.register("b").unwrap();
        map.cancel_all();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        // Registered after shutdown: born cancelled.
        assert!(map.register("c").unwrap().is_cancelled());
    }

    #[test]
    fn remove_is_idempotent() {
        let map = CancelMap::default();
        map.register("r");
        map.remove("r");
        map.remove("r");
        assert!(map.is_empty());
    }
}
