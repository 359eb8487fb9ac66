//! Replay detection for the security-policy pipeline's replay-and-freshness
//! rule: a simple "have I seen `(context, value)` before its expiry" cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Tracks recently-seen `(context, value)` pairs so the same message ID can't
/// be replayed within its validity window. `context` namespaces the cache
/// (e.g. separating inbound message IDs per issuer) so unrelated producers
/// never collide on identical IDs.
pub trait ReplayCache: Send + Sync {
    /// Returns `true` if `(context, value)` has not been seen before (and
    /// records it, good until `expiry` from now), `false` if it's a replay.
    fn check(&self, context: &str, value: &str, expiry: Duration) -> bool;
}

/// In-memory replay cache with lazy expiry: entries are swept out on the next
/// `check` call that happens to touch an expired bucket, rather than on a
/// background timer.
#[derive(Default)]
pub struct InMemoryReplayCache {
    seen: Mutex<HashMap<(String, String), Instant>>,
}

impl InMemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.seen.lock().unwrap().retain(|_, expires_at| *expires_at > now);
    }
}

impl ReplayCache for InMemoryReplayCache {
    fn check(&self, context: &str, value: &str, expiry: Duration) -> bool {
        let key = (context.to_string(), value.to_string());
        let now = Instant::now();
        let mut guard = self.seen.lock().unwrap();

        if let Some(expires_at) = guard.get(&key) {
            if *expires_at > now {
                return false;
            }
        }
        guard.insert(key, now + expiry);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_passes_repeat_is_rejected() {
        let cache = InMemoryReplayCache::new();
        assert!(cache.check("idp:https://idp.example", "_msg1", Duration::from_secs(60)));
        assert!(!cache.check("idp:https://idp.example", "_msg1", Duration::from_secs(60)));
    }

    #[test]
    fn same_value_different_context_is_not_a_replay() {
        let cache = InMemoryReplayCache::new();
        assert!(cache.check("idp:a", "_msg1", Duration::from_secs(60)));
        assert!(cache.check("idp:b", "_msg1", Duration::from_secs(60)));
    }

    #[test]
    fn entry_is_usable_again_once_its_expiry_has_passed() {
        let cache = InMemoryReplayCache::new();
        assert!(cache.check("idp:a", "_msg1", Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.check("idp:a", "_msg1", Duration::from_secs(60)));
    }
}
