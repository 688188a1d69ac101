//! Short-window duplicate suppression.
//!
//! Terminals re-send notifications when an acknowledgement is lost, and
//! bulk resynchronization replays records that already arrived live.
//! Two events for the same subject and terminal whose timestamps differ
//! by less than the window are one physical event; the second is
//! counted and suppressed.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::time::Duration;
use timeclock_core::{DeviceId, SubjectId};

/// Entry bound; the cache is pruned when it grows past this.
const MAX_ENTRIES: usize = 4096;

/// Last-accepted-event cache keyed by (subject, terminal)
pub struct DedupeCache {
    window: TimeDelta,
    last_accepted: HashMap<(SubjectId, DeviceId), DateTime<Utc>>,
}

impl DedupeCache {
    pub fn new(window: Duration) -> Self {
        DedupeCache {
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
            last_accepted: HashMap::new(),
        }
    }

    /// Check an event against the cache, recording it if accepted.
    ///
    /// Returns `true` when the event duplicates the last accepted event
    /// for its key. Duplicates do not refresh the stored timestamp, so a
    /// legitimate follow-up event (e.g. a check-out after the window)
    /// is measured against the last event that was actually admitted.
    pub fn check(
        &mut self,
        subject_id: &SubjectId,
        device_id: DeviceId,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let key = (subject_id.clone(), device_id);

        if let Some(previous) = self.last_accepted.get(&key)
            && (timestamp - *previous).abs() < self.window
        {
            return true;
        }

        if self.last_accepted.len() >= MAX_ENTRIES {
            self.prune(timestamp);
        }
        self.last_accepted.insert(key, timestamp);
        false
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_accepted.is_empty()
    }

    /// Drop entries that can no longer suppress anything.
    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.last_accepted
            .retain(|_, seen| (now - *seen).abs() < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeclock_core::WireTimestamp;

    fn at(s: &str) -> DateTime<Utc> {
        WireTimestamp::parse(s).unwrap().inner()
    }

    fn subject(s: &str) -> SubjectId {
        SubjectId::new(s).unwrap()
    }

    fn cache() -> DedupeCache {
        DedupeCache::new(Duration::from_secs(60))
    }

    #[test]
    fn test_resend_within_window_is_duplicate() {
        let mut cache = cache();
        let device = DeviceId::new(5).unwrap();

        assert!(!cache.check(&subject("EMP001"), device, at("2026-08-07 08:30:00")));
        assert!(cache.check(&subject("EMP001"), device, at("2026-08-07 08:30:10")));
    }

    #[test]
    fn test_event_outside_window_is_accepted() {
        let mut cache = cache();
        let device = DeviceId::new(5).unwrap();

        assert!(!cache.check(&subject("EMP001"), device, at("2026-08-07 08:30:00")));
        assert!(!cache.check(&subject("EMP001"), device, at("2026-08-07 09:45:00")));
    }

    #[test]
    fn test_duplicate_does_not_extend_window() {
        let mut cache = cache();
        let device = DeviceId::new(5).unwrap();

        assert!(!cache.check(&subject("EMP001"), device, at("2026-08-07 08:30:00")));
        // Resend at +50s suppressed, but measured against 08:30:00.
        assert!(cache.check(&subject("EMP001"), device, at("2026-08-07 08:30:50")));
        // +70s from the accepted event: admitted even though it is only
        // 20s after the suppressed resend.
        assert!(!cache.check(&subject("EMP001"), device, at("2026-08-07 08:31:10")));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut cache = cache();
        let ts = at("2026-08-07 08:30:00");

        assert!(!cache.check(&subject("EMP001"), DeviceId::new(5).unwrap(), ts));
        // Same subject on a different terminal is a different key.
        assert!(!cache.check(&subject("EMP001"), DeviceId::new(6).unwrap(), ts));
        // Different subject on the same terminal likewise.
        assert!(!cache.check(&subject("EMP002"), DeviceId::new(5).unwrap(), ts));
        assert_eq!(cache.len(), 3);
    }
}
