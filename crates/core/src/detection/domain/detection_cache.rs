use std::time::Duration;

/// A recently seen label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionCacheEntry {
    pub label: String,
    pub last_seen_at: Duration,
    /// Sightings folded into this entry. Diagnostics only.
    pub occurrence_count: u32,
}

#[derive(Debug)]
struct Slot {
    entry: DetectionCacheEntry,
    /// Monotonic update counter; lowest value is the least recently updated.
    stamp: u64,
}

/// Fixed-capacity arena of label entries with least-recently-updated eviction.
///
/// Slots are allocated once at construction and reused; lookups are linear,
/// which is fine for the handful of labels a checkout sees at once.
#[derive(Debug)]
pub struct DetectionCache {
    slots: Vec<Option<Slot>>,
    next_stamp: u64,
}

impl DetectionCache {
    /// Creates an empty cache. A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_stamp: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, label: &str) -> Option<&DetectionCacheEntry> {
        self.position(label)
            .and_then(|i| self.slots[i].as_ref())
            .map(|slot| &slot.entry)
    }

    /// Entries in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &DetectionCacheEntry> {
        self.slots.iter().flatten().map(|slot| &slot.entry)
    }

    /// Refreshes an existing entry: bumps `occurrence_count` and
    /// `last_seen_at`. Returns `None` if the label is not cached.
    pub fn touch(&mut self, label: &str, now: Duration) -> Option<&DetectionCacheEntry> {
        let index = self.position(label)?;
        let stamp = self.bump();
        let slot = self.slots[index].as_mut()?;
        slot.entry.last_seen_at = now;
        slot.entry.occurrence_count = slot.entry.occurrence_count.saturating_add(1);
        slot.stamp = stamp;
        Some(&slot.entry)
    }

    /// Starts a fresh entry for `label` with `occurrence_count = 1`.
    ///
    /// Overwrites an existing entry for the same label. When every slot is
    /// taken, the least recently updated entry is evicted and returned.
    pub fn insert(&mut self, label: &str, now: Duration) -> Option<DetectionCacheEntry> {
        let stamp = self.bump();
        let fresh = Slot {
            entry: DetectionCacheEntry {
                label: label.to_string(),
                last_seen_at: now,
                occurrence_count: 1,
            },
            stamp,
        };

        if let Some(index) = self.position(label) {
            self.slots[index] = Some(fresh);
            return None;
        }

        if let Some(free) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[free] = Some(fresh);
            return None;
        }

        let victim = self.least_recently_updated()?;
        self.slots[victim]
            .replace(fresh)
            .map(|evicted| evicted.entry)
    }

    /// Removes every entry whose age has reached `expiry`.
    pub fn evict_expired(&mut self, now: Duration, expiry: Duration) -> Vec<DetectionCacheEntry> {
        let mut evicted = Vec::new();
        for slot in &mut self.slots {
            let expired = slot
                .as_ref()
                .is_some_and(|s| now.saturating_sub(s.entry.last_seen_at) >= expiry);
            if expired {
                if let Some(s) = slot.take() {
                    evicted.push(s.entry);
                }
            }
        }
        evicted
    }

    fn position(&self, label: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.entry.label == label))
    }

    fn least_recently_updated(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s.stamp)))
            .min_by_key(|&(_, stamp)| stamp)
            .map(|(i, _)| i)
    }

    fn bump(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }
}
