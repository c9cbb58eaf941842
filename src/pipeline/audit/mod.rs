use super::NormalizedRecord;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// Bounded in-memory history of processed inbound events.
///
/// Insertion stamps the record and evicts the oldest entry at capacity in a
/// single write-locked step, so readers never observe more than `capacity`
/// entries. Timestamps are strictly increasing in insertion order.
pub struct AuditLog {
    capacity: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    records: VecDeque<NormalizedRecord>,
    last_stamp: Option<DateTime<Utc>>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Inner {
                records: VecDeque::with_capacity(capacity),
                last_stamp: None,
            }),
        }
    }

    /// Stamp `record` and append it, evicting the oldest entry when full.
    /// Returns the stamped record.
    pub fn append(&self, mut record: NormalizedRecord) -> NormalizedRecord {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let stamp = match inner.last_stamp {
            Some(last) if now <= last => last + TimeDelta::microseconds(1),
            _ => now,
        };
        inner.last_stamp = Some(stamp);
        record.timestamp = Some(stamp);

        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record.clone());
        record
    }

    /// All retained records, oldest first.
    pub fn list(&self) -> Vec<NormalizedRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
