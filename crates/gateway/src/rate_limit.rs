//! Fixed-window counters keyed by source address or identity.
//!
//! Each key's window and count are updated under its `DashMap` shard lock, so
//! two concurrent checks for the same key can never both take the last slot.
//! Strikes recorded against a key halve its ceiling every
//! `strike_threshold` strikes (never below 1) until the entry is swept.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Ceiling and window applied to one class of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    pub limit: u32,
    pub window: Duration,
    pub strike_threshold: u32,
}

impl WindowPolicy {
    /// Ceiling after `strikes` violations.
    pub fn effective_limit(&self, strikes: u32) -> u32 {
        let halvings = strikes.checked_div(self.strike_threshold).unwrap_or(0);
        self.limit.checked_shr(halvings).unwrap_or(0).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    window_start: Instant,
    count: u32,
    strikes: u32,
}

#[derive(Debug, Default)]
pub struct WindowLimiter {
    entries: DashMap<String, WindowEntry>,
}

impl WindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event for `key` and decide whether it is within the ceiling.
    /// Rejected events still count.
    pub fn check_at(&self, key: &str, policy: WindowPolicy, now: Instant) -> RateDecision {
        let mut entry = self.entries.entry(key.to_string()).or_insert(WindowEntry {
            window_start: now,
            count: 0,
            strikes: 0,
        });
        if now.saturating_duration_since(entry.window_start) >= policy.window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);

        let limit = policy.effective_limit(entry.strikes);
        if entry.count <= limit {
            RateDecision::Allowed {
                remaining: limit - entry.count,
            }
        } else {
            let elapsed = now.saturating_duration_since(entry.window_start);
            RateDecision::Limited {
                retry_after: policy.window.saturating_sub(elapsed),
            }
        }
    }

    /// Record a violation against `key`. Returns the new strike count.
    pub fn strike_at(&self, key: &str, now: Instant) -> u32 {
        let mut entry = self.entries.entry(key.to_string()).or_insert(WindowEntry {
            window_start: now,
            count: 0,
            strikes: 0,
        });
        entry.strikes = entry.strikes.saturating_add(1);
        entry.strikes
    }

    pub fn strikes(&self, key: &str) -> u32 {
        self.entries.get(key).map(|e| e.strikes).unwrap_or(0)
    }

    /// Drop entries whose window has fully elapsed. Returns how many were
    /// removed.
    pub fn sweep_at(&self, window: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.window_start) < window);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
