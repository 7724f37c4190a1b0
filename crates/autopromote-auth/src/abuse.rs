//! Per-address failure counters, temporary blocks, and global failure tallies.
//!
//! Counters use a fixed window that only resets after the address has been
//! idle for longer than the window. A steady trickle of failures therefore
//! keeps accumulating, which is what the block thresholds rely on.
//!
//! [`AbuseStore`] is synchronous: each operation runs inside one critical
//! section, so check-and-mutate sequences cannot interleave with other
//! requests.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Number of addresses reported in a snapshot by default.
pub const DEFAULT_SNAPSHOT_TOP_N: usize = 20;

/// Category of authentication failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoToken,
    InvalidTokenFormat,
    VerifyError,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NoToken => "no_token",
            FailureKind::InvalidTokenFormat => "invalid_token_format",
            FailureKind::VerifyError => "verify_error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An address and its failure count in the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressCount {
    pub address: String,
    pub count: u64,
    /// Age of the address's current window.
    pub window_secs: u64,
}

/// An address under a temporary block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedAddress {
    pub address: String,
    pub remaining_secs: u64,
}

/// Point-in-time view of abuse state, for observability only.
#[derive(Debug, Clone, Serialize)]
pub struct AbuseSnapshot {
    /// Addresses with the most failures, highest first.
    pub top_addresses: Vec<AddressCount>,
    /// Process-lifetime tally per failure kind.
    pub failure_totals: BTreeMap<String, u64>,
    pub blocked: Vec<BlockedAddress>,
    pub taken_at: DateTime<Utc>,
}

/// Storage for abuse diagnostics.
///
/// The in-memory implementation serves a single instance. A shared-cache
/// implementation can be plugged in for multi-instance deployments.
pub trait AbuseStore: Send + Sync {
    /// Count a failure of `kind`, and against `address` when one is known.
    /// Returns the address's count after the update (0 without an address).
    fn record_failure(&self, kind: FailureKind, address: Option<&str>) -> u64;

    /// Failures recorded for `address` in its current window.
    fn count(&self, address: &str) -> u64;

    /// Block `address` for `duration`, replacing any existing block.
    fn block(&self, address: &str, duration: Duration);

    /// Time left on the block for `address`. Expired blocks are removed.
    fn blocked_for(&self, address: &str) -> Option<Duration>;

    fn is_blocked(&self, address: &str) -> bool {
        self.blocked_for(address).is_some()
    }

    fn snapshot(&self, top_n: usize) -> AbuseSnapshot;

    /// Clear all state.
    fn reset(&self);

    /// Drop idle counters and expired blocks. Returns the number of entries removed.
    fn prune(&self) -> usize;
}

#[derive(Debug, Clone)]
struct IpCounter {
    count: u64,
    window_start: Instant,
    last_seen: Instant,
}

#[derive(Debug, Default)]
struct AbuseState {
    counters: HashMap<String, IpCounter>,
    blocks: HashMap<String, Instant>,
    totals: HashMap<FailureKind, u64>,
}

/// Process-local [`AbuseStore`].
#[derive(Debug)]
pub struct InMemoryAbuseStore {
    window: Duration,
    state: Mutex<AbuseState>,
}

impl InMemoryAbuseStore {
    /// Create a store whose counters reset after `window` of inactivity.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(AbuseState::default()),
        }
    }

    fn count_at(&self, state: &AbuseState, address: &str, now: Instant) -> u64 {
        state
            .counters
            .get(address)
            .filter(|c| now.duration_since(c.last_seen) <= self.window)
            .map_or(0, |c| c.count)
    }
}

impl Default for InMemoryAbuseStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl AbuseStore for InMemoryAbuseStore {
    fn record_failure(&self, kind: FailureKind, address: Option<&str>) -> u64 {
        let now = Instant::now();
        let mut state = self.state.lock();

        *state.totals.entry(kind).or_insert(0) += 1;

        let Some(address) = address else {
            return 0;
        };

        let counter = state
            .counters
            .entry(address.to_string())
            .or_insert_with(|| IpCounter {
                count: 0,
                window_start: now,
                last_seen: now,
            });

        if now.duration_since(counter.last_seen) > self.window {
            counter.count = 1;
            counter.window_start = now;
        } else {
            counter.count += 1;
        }
        counter.last_seen = now;
        counter.count
    }

    fn count(&self, address: &str) -> u64 {
        let state = self.state.lock();
        self.count_at(&state, address, Instant::now())
    }

    fn block(&self, address: &str, duration: Duration) {
        let blocked_until = Instant::now() + duration;
        self.state
            .lock()
            .blocks
            .insert(address.to_string(), blocked_until);
    }

    fn blocked_for(&self, address: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let blocked_until = *state.blocks.get(address)?;
        if blocked_until > now {
            Some(blocked_until - now)
        } else {
            state.blocks.remove(address);
            None
        }
    }

    fn snapshot(&self, top_n: usize) -> AbuseSnapshot {
        let now = Instant::now();
        let state = self.state.lock();

        let mut top_addresses: Vec<AddressCount> = state
            .counters
            .iter()
            .map(|(address, counter)| AddressCount {
                address: address.clone(),
                count: self.count_at(&state, address, now),
                window_secs: now.duration_since(counter.window_start).as_secs(),
            })
            .filter(|entry| entry.count > 0)
            .collect();
        top_addresses.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));
        top_addresses.truncate(top_n);

        let failure_totals = state
            .totals
            .iter()
            .map(|(kind, total)| (kind.as_str().to_string(), *total))
            .collect();

        let mut blocked: Vec<BlockedAddress> = state
            .blocks
            .iter()
            .filter(|(_, until)| **until > now)
            .map(|(address, until)| BlockedAddress {
                address: address.clone(),
                remaining_secs: remaining_secs(*until - now),
            })
            .collect();
        blocked.sort_by(|a, b| a.address.cmp(&b.address));

        AbuseSnapshot {
            top_addresses,
            failure_totals,
            blocked,
            taken_at: Utc::now(),
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.counters.clear();
        state.blocks.clear();
        state.totals.clear();
    }

    fn prune(&self) -> usize {
        let now = Instant::now();
        let window = self.window;
        let mut state = self.state.lock();

        let before = state.counters.len() + state.blocks.len();
        state
            .counters
            .retain(|_, c| now.duration_since(c.last_seen) <= window);
        state.blocks.retain(|_, until| *until > now);
        before - (state.counters.len() + state.blocks.len())
    }
}

/// Whole seconds left, rounded up so a live block never reports zero.
pub(crate) fn remaining_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn store() -> InMemoryAbuseStore {
        InMemoryAbuseStore::new(Duration::from_secs(60))
    }

    #[test]
    fn test_record_failure_counts_per_address() {
        let store = store();
        assert_eq!(store.record_failure(FailureKind::NoToken, Some("1.1.1.1")), 1);
        assert_eq!(store.record_failure(FailureKind::VerifyError, Some("1.1.1.1")), 2);
        assert_eq!(store.record_failure(FailureKind::NoToken, Some("2.2.2.2")), 1);
        assert_eq!(store.count("1.1.1.1"), 2);
        assert_eq!(store.count("2.2.2.2"), 1);
        assert_eq!(store.count("3.3.3.3"), 0);
    }

    #[test]
    fn test_record_failure_without_address_only_tallies() {
        let store = store();
        assert_eq!(store.record_failure(FailureKind::NoToken, None), 0);
        let snapshot = store.snapshot(10);
        assert!(snapshot.top_addresses.is_empty());
        assert_eq!(snapshot.failure_totals.get("no_token"), Some(&1));
    }

    #[test]
    fn test_window_resets_after_idle() {
        let store = InMemoryAbuseStore::new(Duration::from_millis(50));
        store.record_failure(FailureKind::NoToken, Some("1.1.1.1"));
        store.record_failure(FailureKind::NoToken, Some("1.1.1.1"));
        assert_eq!(store.count("1.1.1.1"), 2);

        sleep(Duration::from_millis(80));
        assert_eq!(store.count("1.1.1.1"), 0);
        assert_eq!(store.record_failure(FailureKind::NoToken, Some("1.1.1.1")), 1);
    }

    #[test]
    fn test_steady_failures_keep_accumulating() {
        let store = InMemoryAbuseStore::new(Duration::from_millis(60));
        for _ in 0..4 {
            store.record_failure(FailureKind::NoToken, Some("1.1.1.1"));
            sleep(Duration::from_millis(30));
        }
        // Total elapsed exceeds the window, but the address was never idle
        // for a whole window.
        assert_eq!(store.count("1.1.1.1"), 4);
    }

    #[test]
    fn test_block_expires_and_is_removed() {
        let store = store();
        store.block("1.1.1.1", Duration::from_millis(50));
        assert!(store.is_blocked("1.1.1.1"));
        assert!(!store.is_blocked("2.2.2.2"));

        sleep(Duration::from_millis(80));
        assert!(!store.is_blocked("1.1.1.1"));
        assert!(store.state.lock().blocks.is_empty());
    }

    #[test]
    fn test_block_overwrites() {
        let store = store();
        store.block("1.1.1.1", Duration::from_millis(10));
        store.block("1.1.1.1", Duration::from_secs(600));
        sleep(Duration::from_millis(30));
        let remaining = store.blocked_for("1.1.1.1").unwrap();
        assert!(remaining > Duration::from_secs(590));
    }

    #[test]
    fn test_snapshot_orders_by_count() {
        let store = store();
        for _ in 0..3 {
            store.record_failure(FailureKind::VerifyError, Some("a"));
        }
        store.record_failure(FailureKind::NoToken, Some("b"));
        for _ in 0..2 {
            store.record_failure(FailureKind::InvalidTokenFormat, Some("c"));
        }
        store.block("a", Duration::from_secs(600));

        let snapshot = store.snapshot(2);
        let top: Vec<(&str, u64)> = snapshot
            .top_addresses
            .iter()
            .map(|entry| (entry.address.as_str(), entry.count))
            .collect();
        assert_eq!(top, vec![("a", 3), ("c", 2)]);
        assert_eq!(snapshot.failure_totals.get("verify_error"), Some(&3));
        assert_eq!(snapshot.failure_totals.get("no_token"), Some(&1));
        assert_eq!(snapshot.failure_totals.get("invalid_token_format"), Some(&2));
        assert_eq!(snapshot.blocked.len(), 1);
        assert_eq!(snapshot.blocked[0].address, "a");
        assert_eq!(snapshot.blocked[0].remaining_secs, 600);
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = store();
        store.record_failure(FailureKind::NoToken, Some("a"));
        let json = serde_json::to_value(store.snapshot(DEFAULT_SNAPSHOT_TOP_N)).unwrap();
        assert_eq!(json["top_addresses"][0]["address"], "a");
        assert_eq!(json["failure_totals"]["no_token"], 1);
        assert!(json["blocked"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_reset_clears_everything() {
        let store = store();
        store.record_failure(FailureKind::NoToken, Some("a"));
        store.block("a", Duration::from_secs(600));
        store.reset();
        assert_eq!(store.count("a"), 0);
        assert!(!store.is_blocked("a"));
        assert!(store.snapshot(10).failure_totals.is_empty());
    }

    #[test]
    fn test_prune_removes_idle_and_expired() {
        let store = InMemoryAbuseStore::new(Duration::from_millis(40));
        store.record_failure(FailureKind::NoToken, Some("idle"));
        store.block("short", Duration::from_millis(10));
        store.block("long", Duration::from_secs(600));

        sleep(Duration::from_millis(60));
        store.record_failure(FailureKind::NoToken, Some("fresh"));

        assert_eq!(store.prune(), 2);
        assert_eq!(store.count("fresh"), 1);
        assert!(store.is_blocked("long"));
    }

    #[test]
    fn test_remaining_secs_rounds_up() {
        assert_eq!(remaining_secs(Duration::from_millis(1)), 1);
        assert_eq!(remaining_secs(Duration::from_secs(5)), 5);
        assert_eq!(remaining_secs(Duration::from_millis(5001)), 6);
    }
}
