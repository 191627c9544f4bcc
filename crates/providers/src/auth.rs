//! Embedding credential rotation.
//!
//! [`AuthRotator`] hands out embedding keys round robin. A key that the
//! service rejects (401/403/429) sits out a cooldown window and is skipped
//! until it expires. When every key is cooling down the one that failed
//! first is used anyway, so a request is never refused locally.
//!
//! Chat credentials do not go through here: [`crate::KeyRotatingClient`]
//! rotates strictly and never skips a key.

use std::time::{Duration, Instant};

use cb_domain::error::{Error, Result};
use cb_domain::tenant::ApiKey;
use parking_lot::Mutex;

use crate::round_robin::RoundRobin;

pub struct AuthRotator {
    keys: Vec<ApiKey>,
    /// Parallel to `keys`: when each key was last rejected.
    rejected_at: Mutex<Vec<Option<Instant>>>,
    rr: RoundRobin,
    cooldown: Duration,
}

/// The key picked for one request. Pass `index` back to
/// [`AuthRotator::mark_failed`] if the service rejects it.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub index: usize,
    pub key: ApiKey,
}

impl AuthRotator {
    pub fn new(keys: Vec<ApiKey>, cooldown: Duration) -> Result<Self> {
        let keys: Vec<ApiKey> = keys.into_iter().filter(|k| !k.is_empty()).collect();
        if keys.is_empty() {
            return Err(Error::Config("no embedding API keys configured".into()));
        }
        Ok(Self {
            rejected_at: Mutex::new(vec![None; keys.len()]),
            keys,
            rr: RoundRobin::new(),
            cooldown,
        })
    }

    pub fn next_key(&self) -> KeyEntry {
        let len = self.keys.len();
        let start = self.rr.next(len);
        let now = Instant::now();
        let rejected = self.rejected_at.lock();

        let cooling = |i: usize| matches!(rejected[i], Some(at) if now.duration_since(at) < self.cooldown);

        let index = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| !cooling(i))
            .unwrap_or_else(|| {
                // All cooling: the oldest rejection is closest to expiry.
                (0..len)
                    .min_by_key(|&i| rejected[i].unwrap_or(now))
                    .unwrap_or(start)
            });

        KeyEntry {
            index,
            key: self.keys[index].clone(),
        }
    }

    pub fn mark_failed(&self, index: usize) {
        let Some(key) = self.keys.get(index) else {
            return;
        };
        self.rejected_at.lock()[index] = Some(Instant::now());
        tracing::warn!(
            key_index = index,
            key = %key.fingerprint(),
            cooldown_secs = self.cooldown.as_secs(),
            "embedding key rejected, cooling down"
        );
    }

    /// Keys not currently cooling down.
    pub fn healthy(&self) -> usize {
        let now = Instant::now();
        self.rejected_at
            .lock()
            .iter()
            .filter(|at| !matches!(at, Some(t) if now.duration_since(*t) < self.cooldown))
            .count()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for AuthRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRotator")
            .field("keys", &self.len())
            .field("healthy", &self.healthy())
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator(names: &[&str], cooldown: Duration) -> AuthRotator {
        AuthRotator::new(names.iter().map(|n| ApiKey::new(*n)).collect(), cooldown).unwrap()
    }

    fn picks(r: &AuthRotator, n: usize) -> Vec<String> {
        (0..n).map(|_| r.next_key().key.expose().to_string()).collect()
    }

    #[test]
    fn rotates_in_order() {
        let r = rotator(&["e1", "e2", "e3"], Duration::from_secs(60));
        assert_eq!(picks(&r, 4), vec!["e1", "e2", "e3", "e1"]);
    }

    #[test]
    fn rejected_key_is_skipped_during_cooldown() {
        let r = rotator(&["e1", "e2", "e3"], Duration::from_secs(60));
        r.mark_failed(1);
        assert_eq!(r.healthy(), 2);
        // Ticks 0..3 start at e1, e2, e3; the e2 start falls through to e3.
        assert_eq!(picks(&r, 3), vec!["e1", "e3", "e3"]);
    }

    #[test]
    fn all_rejected_falls_back_to_oldest_failure() {
        let r = rotator(&["e1", "e2"], Duration::from_secs(60));
        r.mark_failed(1);
        std::thread::sleep(Duration::from_millis(5));
        r.mark_failed(0);
        assert_eq!(r.next_key().key.expose(), "e2");
        assert_eq!(r.healthy(), 0);
    }

    #[test]
    fn key_returns_after_cooldown() {
        let r = rotator(&["e1", "e2"], Duration::from_millis(20));
        r.mark_failed(0);
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(r.healthy(), 2);
        assert_eq!(r.next_key().key.expose(), "e1");
    }

    #[test]
    fn blank_keys_are_dropped_and_none_is_an_error() {
        assert_eq!(rotator(&["", "e1"], Duration::ZERO).len(), 1);
        assert!(AuthRotator::new(vec![ApiKey::new("")], Duration::ZERO).is_err());
        assert!(AuthRotator::new(vec![], Duration::ZERO).is_err());
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let r = rotator(&["e1"], Duration::from_secs(60));
        r.mark_failed(7);
        assert_eq!(r.healthy(), 1);
    }

    #[test]
    fn debug_shows_counts_only() {
        let r = rotator(&["sk-embed-secret"], Duration::from_secs(60));
        let dbg = format!("{r:?}");
        assert!(!dbg.contains("sk-embed-secret"));
        assert!(dbg.contains("keys: 1"));
    }
}
