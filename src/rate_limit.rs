use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::models::Id;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action budgets for the non-idempotent creates.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimitConfig {
    pub listing_limit: usize,
    pub listing_window: Duration,
    pub message_limit: usize,
    pub message_window: Duration,
    pub conversation_limit: usize,
    pub conversation_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            listing_limit: 5,
            listing_window: Duration::from_secs(3600),
            message_limit: 30,
            message_window: Duration::from_secs(60),
            conversation_limit: 10,
            conversation_window: Duration::from_secs(600),
        }
    }
}

/// High level guard used by handlers, keyed by principal id.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_listing(&self, user: Id) -> bool { self.limiter.check(&format!("listing:{user}"), self.cfg.listing_limit, self.cfg.listing_window) }
    pub fn allow_message(&self, user: Id) -> bool { self.limiter.check(&format!("message:{user}"), self.cfg.message_limit, self.cfg.message_window) }
    pub fn allow_conversation(&self, user: Id) -> bool { self.limiter.check(&format!("conversation:{user}"), self.cfg.conversation_limit, self.cfg.conversation_window) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn window_expiry_frees_slot() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(20);
        assert!(rl.check("k", 1, window));
        assert!(!rl.check("k", 1, window));
        std::thread::sleep(Duration::from_millis(30));
        assert!(rl.check("k", 1, window));
    }

    #[test]
    fn actions_and_users_are_independent() {
        let cfg = RateLimitConfig { listing_limit: 1, message_limit: 1, ..RateLimitConfig::default() };
        let rl = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        assert!(rl.allow_listing(7));
        assert!(!rl.allow_listing(7));
        assert!(rl.allow_listing(8));
        assert!(rl.allow_message(7));
    }

    #[test]
    fn disabled_limiter_allows_everything() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..10 { assert!(rl.check("k", 1, Duration::from_secs(60))); }
    }
}
