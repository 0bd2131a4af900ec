use std::time::Duration;
use tokio::time::Instant;

/// Stand-in for "never" when a duration cannot be added to an instant
pub(crate) const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + after`, saturating at `now + FAR_FUTURE` instead of overflowing.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(FAR_FUTURE))
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// A stored value together with the absolute instant it stops being live.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    expiry: Instant,
}

impl<V> Entry<V> {
    /// Stamps the entry with `now + ttl`. The expiry is never moved afterwards.
    ///
    /// TTLs too large to represent (e.g. `Duration::MAX`) mean "about thirty years".
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expiry: deadline_after(now, ttl),
        }
    }

    pub fn expiry(&self) -> Instant {
        self.expiry
    }

    /// Live iff `now` is strictly before the expiry.
    #[inline]
    pub fn is_live_at(&self, now: Instant) -> bool {
        now < self.expiry
    }

    pub fn remaining_ttl(&self, now: Instant) -> Duration {
        self.expiry.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_is_live_before_expiry() {
        let now = Instant::now();
        let entry = Entry::new("v", Duration::from_millis(100), now);

        assert!(entry.is_live_at(now));
        assert!(entry.is_live_at(now + Duration::from_millis(99)));
        assert_eq!(entry.remaining_ttl(now), Duration::from_millis(100));
    }

    #[test]
    fn test_entry_is_dead_at_expiry() {
        let now = Instant::now();
        let entry = Entry::new(1u32, Duration::from_millis(100), now);

        // Exactly at the expiry instant the entry is no longer live
        assert!(!entry.is_live_at(entry.expiry()));
        assert!(!entry.is_live_at(now + Duration::from_secs(1)));
        assert_eq!(entry.remaining_ttl(now + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_entry_with_unrepresentable_ttl_does_not_overflow() {
        let now = Instant::now();
        let entry = Entry::new("forever", Duration::MAX, now);

        assert_eq!(entry.expiry(), now + FAR_FUTURE);
        assert!(entry.is_live_at(now + Duration::from_secs(86400 * 365)));
    }
}
