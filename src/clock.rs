//! Clock: monotonic uptime plus wall-clock, with explicit time-sync tracking.
//!
//! Grounded on the teacher's `session/connection.rs`, which tracks
//! `connected_at` / `last_activity` as `DateTime<Utc>` and computes elapsed
//! time via `signed_duration_since`. Here the same idea is split into two
//! time bases (`Instant` for uptime, `DateTime<Utc>` for wall-clock) because
//! the spec requires operating correctly before the wall clock is known at
//! all (§3 "beginTimestamp (absolute or uptime, whichever known)").

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in time as tracked by the engine: either a wall-clock instant
/// (once the clock is known) or an uptime offset from boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timestamp {
    /// Absolute wall-clock time, seconds since the Unix epoch.
    Unix(i64),
    /// Uptime in milliseconds since the clock was constructed, recorded
    /// before the wall clock was synced.
    Uptime(u64),
}

impl Timestamp {
    pub fn is_unix(&self) -> bool {
        matches!(self, Timestamp::Unix(_))
    }
}

/// Monotonic uptime plus wall-clock, with a one-shot sync event.
///
/// Before `set_unix_time` is called, `now_unix()` returns `None` and
/// `now()` returns `Timestamp::Uptime`. After sync, `now()` returns
/// `Timestamp::Unix`, and every previously recorded `Uptime` stamp can be
/// rewritten via `resolve`, which maps it through the uptime-at-sync /
/// unix-at-sync pair recorded at the moment of sync.
pub struct Clock {
    started_at: Instant,
    sync: Option<SyncPoint>,
}

#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    /// Uptime (ms since `started_at`) at the moment the clock was synced.
    uptime_at_sync_ms: u64,
    /// Unix time (seconds) at the moment the clock was synced.
    unix_at_sync: i64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            sync: None,
        }
    }

    /// Milliseconds elapsed since this clock was constructed.
    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// `true` once `set_unix_time` has been called.
    pub fn is_unix_time_known(&self) -> bool {
        self.sync.is_some()
    }

    /// Record that the wall clock is now known to be `unix_time` (seconds
    /// since epoch). Idempotent across reconnects: each call re-anchors the
    /// uptime/unix mapping to the current instant, which is what lets a
    /// charger that was offline for an hour compute correct historical
    /// timestamps once it reconnects (S1 in spec.md §8).
    pub fn set_unix_time(&mut self, unix_time: i64) {
        self.sync = Some(SyncPoint {
            uptime_at_sync_ms: self.uptime_ms(),
            unix_at_sync: unix_time,
        });
    }

    /// Current time: `Unix` if synced, `Uptime` otherwise.
    pub fn now(&self) -> Timestamp {
        match self.now_unix() {
            Some(t) => Timestamp::Unix(t),
            None => Timestamp::Uptime(self.uptime_ms()),
        }
    }

    /// Current wall-clock time in seconds since epoch, if known.
    pub fn now_unix(&self) -> Option<i64> {
        self.sync.map(|s| {
            let delta_ms = self.uptime_ms().saturating_sub(s.uptime_at_sync_ms);
            s.unix_at_sync + (delta_ms / 1000) as i64
        })
    }

    /// `DateTime<Utc>` form of `now_unix`, for building wire payloads.
    pub fn now_utc(&self) -> Option<DateTime<Utc>> {
        self.now_unix().and_then(|t| DateTime::from_timestamp(t, 0))
    }

    /// Resolve a previously captured `Timestamp` into an absolute Unix time,
    /// if possible. An `Uptime` stamp resolves once the clock has since been
    /// synced, by mapping it through the sync point's uptime/unix pair —
    /// this is what lets a pre-boot or pre-sync transaction acquire a
    /// correct `startTimestamp` after reconnecting.
    pub fn resolve(&self, ts: Timestamp) -> Option<i64> {
        match ts {
            Timestamp::Unix(t) => Some(t),
            Timestamp::Uptime(up_ms) => self.sync.map(|s| {
                let delta_ms = up_ms as i64 - s.uptime_at_sync_ms as i64;
                s.unix_at_sync + delta_ms / 1000
            }),
        }
    }

    /// Duration between two uptime readings, saturating at zero so that a
    /// wraparound in the underlying monotonic source never produces a
    /// negative elapsed time (spec.md §8 "Clock rollover in uptime: deltas
    /// remain non-negative and bounded").
    pub fn uptime_delta(&self, earlier_ms: u64) -> Duration {
        Duration::from_millis(self.uptime_ms().saturating_sub(earlier_ms))
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_until_synced() {
        let clock = Clock::new();
        assert!(!clock.is_unix_time_known());
        assert!(clock.now_unix().is_none());
        assert!(matches!(clock.now(), Timestamp::Uptime(_)));
    }

    #[test]
    fn sync_resolves_uptime_stamps() {
        let mut clock = Clock::new();
        let pre_sync = Timestamp::Uptime(clock.uptime_ms());
        clock.set_unix_time(1_700_000_000);
        assert!(clock.is_unix_time_known());
        let resolved = clock.resolve(pre_sync).unwrap();
        // Should be very close to the sync anchor since almost no time passed.
        assert!((resolved - 1_700_000_000).abs() < 2);
    }

    #[test]
    fn unix_timestamp_resolves_to_itself() {
        let clock = Clock::new();
        assert_eq!(clock.resolve(Timestamp::Unix(42)), Some(42));
    }

    #[test]
    fn uptime_delta_never_negative() {
        let clock = Clock::new();
        let delta = clock.uptime_delta(u64::MAX);
        assert_eq!(delta, Duration::from_millis(0));
    }
}
