use std::collections::BTreeMap;

use timeboost_types::{SeqNo, Timestamp};

/// Holds items ahead of the next expected sequence number.
///
/// Every entry carries its own deadline; the buffer never holds more than
/// `capacity` entries.
#[derive(Debug)]
pub struct ReorderBuffer<T> {
    entries: BTreeMap<SeqNo, (Timestamp, T)>,
    capacity: usize,
}

impl<T> ReorderBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn contains(&self, s: SeqNo) -> bool {
        self.entries.contains_key(&s)
    }

    /// Insert an item, handing it back if the buffer is full or the
    /// sequence number is taken.
    pub fn insert(&mut self, s: SeqNo, deadline: Timestamp, item: T) -> Result<(), T> {
        if self.is_full() || self.entries.contains_key(&s) {
            return Err(item);
        }
        self.entries.insert(s, (deadline, item));
        Ok(())
    }

    /// Remove the entry for `s` if present.
    pub fn take(&mut self, s: SeqNo) -> Option<T> {
        self.entries.remove(&s).map(|(_, t)| t)
    }

    /// Remove all entries whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Timestamp) -> Vec<(SeqNo, T)> {
        let expired: Vec<SeqNo> = self
            .entries
            .iter()
            .filter(|(_, (d, _))| *d <= now)
            .map(|(s, _)| *s)
            .collect();
        expired
            .into_iter()
            .filter_map(|s| self.entries.remove(&s).map(|(_, t)| (s, t)))
            .collect()
    }

    /// Remove all entries in sequence order.
    pub fn drain(&mut self) -> impl Iterator<Item = (SeqNo, T)> + use<T> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(s, (_, t))| (s, t))
    }

    /// The earliest deadline of all entries.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.entries.values().map(|(d, _)| *d).min()
    }
}
