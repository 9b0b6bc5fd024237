use std::time::Duration;

use super::detection_cache::{DetectionCache, DetectionCacheEntry};

/// Outcome of feeding one labelled sighting to the deduplicator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DedupDecision {
    /// First sighting of a new physical placement.
    Confirmed {
        /// Entry pushed out to make room, if the cache was full.
        evicted: Option<DetectionCacheEntry>,
    },
    /// Continuation of a placement already confirmed.
    Suppressed { occurrence_count: u32 },
}

impl DedupDecision {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DedupDecision::Confirmed { .. })
    }
}

/// Turns a stream of per-tick labels into one confirmed event per placement.
///
/// A label is *active* while `now - last_seen_at < expiry`. Sighting an
/// active label refreshes it; sighting an absent or expired one confirms a
/// new placement. Ticks without a label only age the cache, so a brief false
/// negative inside a continuous hold never splits it into two placements.
pub struct TemporalDeduplicator {
    cache: DetectionCache,
    expiry: Duration,
}

impl TemporalDeduplicator {
    pub fn new(cache_size: usize, expiry: Duration) -> Self {
        Self {
            cache: DetectionCache::new(cache_size),
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Drops entries whose age has reached the expiry window.
    ///
    /// Called on every tick, labelled or not.
    pub fn expire(&mut self, now: Duration) -> Vec<DetectionCacheEntry> {
        let evicted = self.cache.evict_expired(now, self.expiry);
        for entry in &evicted {
            log::debug!(
                "Expired '{}' after {} sightings",
                entry.label,
                entry.occurrence_count
            );
        }
        evicted
    }

    /// Records a sighting of `label` at `now` and decides whether it starts
    /// a new placement.
    pub fn observe(&mut self, label: &str, now: Duration) -> DedupDecision {
        self.expire(now);

        if let Some(entry) = self.cache.touch(label, now) {
            return DedupDecision::Suppressed {
                occurrence_count: entry.occurrence_count,
            };
        }

        let evicted = self.cache.insert(label, now);
        if let Some(ref entry) = evicted {
            log::debug!(
                "Cache full ({}), evicted '{}' for '{label}'",
                self.cache.capacity(),
                entry.label
            );
        }
        DedupDecision::Confirmed { evicted }
    }

    pub fn is_active(&self, label: &str, now: Duration) -> bool {
        self.cache
            .get(label)
            .is_some_and(|e| now.saturating_sub(e.last_seen_at) < self.expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn dedup() -> TemporalDeduplicator {
        TemporalDeduplicator::new(10, ms(3000))
    }

    fn confirmations(d: &mut TemporalDeduplicator, ticks: &[(u64, Option<&str>)]) -> usize {
        let mut count = 0;
        for &(t, label) in ticks {
            match label {
                Some(l) => {
                    if d.observe(l, ms(t)).is_confirmed() {
                        count += 1;
                    }
                }
                None => {
                    d.expire(ms(t));
                }
            }
        }
        count
    }

    #[test]
    fn test_first_sighting_confirms() {
        let mut d = dedup();
        assert!(d.observe("Botella", ms(0)).is_confirmed());
    }

    #[test]
    fn test_continuous_hold_confirms_once() {
        let mut d = dedup();
        let ticks: Vec<_> = (0..20).map(|i| (i * 1500, Some("Botella"))).collect();
        assert_eq!(confirmations(&mut d, &ticks), 1);
    }

    #[test]
    fn test_suppressed_sightings_count_occurrences() {
        let mut d = dedup();
        d.observe("Botella", ms(0));
        d.observe("Botella", ms(1500));
        let decision = d.observe("Botella", ms(3000));
        assert_eq!(
            decision,
            DedupDecision::Suppressed {
                occurrence_count: 3
            }
        );
    }

    #[test]
    fn test_replacement_after_gap_confirms_again() {
        let mut d = dedup();
        let ticks = [
            (0, Some("Botella")),
            (1500, Some("Botella")),
            (3000, Some("Botella")),
            (4500, None),
            (6000, Some("Botella")),
        ];
        assert_eq!(confirmations(&mut d, &ticks), 2);
    }

    #[test]
    fn test_brief_false_negative_does_not_split_hold() {
        let mut d = dedup();
        let ticks = [
            (0, Some("Botella")),
            (1000, None),
            (2000, Some("Botella")),
            (3000, None),
            (4000, Some("Botella")),
        ];
        assert_eq!(confirmations(&mut d, &ticks), 1);
    }

    #[test]
    fn test_null_ticks_do_not_clear_active_entry() {
        let mut d = dedup();
        d.observe("Botella", ms(0));
        d.expire(ms(1500));
        d.expire(ms(2999));
        assert!(d.is_active("Botella", ms(2999)));
    }

    #[test]
    fn test_entry_expires_at_window_boundary() {
        let mut d = dedup();
        d.observe("Botella", ms(0));
        assert!(!d.is_active("Botella", ms(3000)));
        assert!(d.observe("Botella", ms(3000)).is_confirmed());
    }

    #[test]
    fn test_distinct_labels_confirm_independently() {
        let mut d = dedup();
        let ticks = [
            (0, Some("Botella")),
            (1000, Some("Lata")),
            (2000, Some("Botella")),
            (3000, Some("Lata")),
        ];
        assert_eq!(confirmations(&mut d, &ticks), 2);
    }

    #[test]
    fn test_alternating_labels_reconfirm_at_window_boundary() {
        let mut d = dedup();
        assert!(d.observe("Botella", ms(0)).is_confirmed());
        assert!(d.observe("Lata", ms(1500)).is_confirmed());
        // Each re-sighting is exactly one expiry window old.
        assert!(d.observe("Botella", ms(3000)).is_confirmed());
        assert!(d.observe("Lata", ms(4500)).is_confirmed());
        assert!(!d.observe("Botella", ms(5999)).is_confirmed());
    }

    #[test]
    fn test_capacity_eviction_retriggers_before_expiry() {
        let mut d = TemporalDeduplicator::new(2, ms(60_000));
        assert!(d.observe("A", ms(0)).is_confirmed());
        assert!(d.observe("B", ms(100)).is_confirmed());

        // Cache is full; C pushes out A (least recently updated).
        let decision = d.observe("C", ms(200));
        match decision {
            DedupDecision::Confirmed { evicted: Some(e) } => assert_eq!(e.label, "A"),
            other => panic!("expected eviction of A, got {other:?}"),
        }

        // A re-triggers well inside the 60s window because it was evicted.
        assert!(d.observe("A", ms(300)).is_confirmed());
    }

    #[test]
    fn test_expire_reports_evicted_entries() {
        let mut d = dedup();
        d.observe("Botella", ms(0));
        d.observe("Botella", ms(1000));

        let evicted = d.expire(ms(5000));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].occurrence_count, 2);
        assert!(d.cache().is_empty());
    }
}
