use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{unix_now, Name, RecordType};

/// Cached records keyed by name in trailing-dot form.
pub type CacheIndex = HashMap<String, Vec<CachedRecord>>;

/// One cached resource record, with its data in textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    #[serde(rename = "type")]
    pub type_: RecordType,
    pub data: String,
    pub ttl: u32,
    /// Seconds since the Unix epoch at which the record was stored
    #[serde(rename = "timestamp")]
    pub inserted_at: f64,
}

impl CachedRecord {
    pub fn new(type_: RecordType, data: impl Into<String>, ttl: u32) -> Self {
        Self::at(type_, data, ttl, unix_now())
    }

    pub fn at(type_: RecordType, data: impl Into<String>, ttl: u32, inserted_at: f64) -> Self {
        Self {
            type_,
            data: data.into(),
            ttl,
            inserted_at,
        }
    }

    pub fn expires_at(&self) -> f64 {
        self.inserted_at + self.ttl as f64
    }

    pub fn is_valid_at(&self, now: f64) -> bool {
        self.expires_at() > now
    }

    /// Seconds left before expiry, rounded up so a valid record never
    /// reports zero.
    pub fn remaining_ttl(&self, now: f64) -> u32 {
        (self.expires_at() - now).ceil().clamp(0.0, self.ttl as f64) as u32
    }

    fn same_key(&self, other: &CachedRecord) -> bool {
        self.type_ == other.type_ && self.data == other.data
    }
}

/// Process-wide record cache. Lookups share a read lock; inserts and sweeps
/// take the write lock.
#[derive(Debug, Default)]
pub struct RecordStore {
    index: RwLock<CacheIndex>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_index(index: CacheIndex) -> Self {
        Self {
            index: RwLock::new(index),
        }
    }

    // None of the critical sections below can leave the map half-updated, so
    // a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Valid records for exactly `name`. Empty on a miss.
    pub fn lookup(&self, name: &str) -> Vec<CachedRecord> {
        self.lookup_at(name, unix_now())
    }

    pub fn lookup_at(&self, name: &str, now: f64) -> Vec<CachedRecord> {
        let key = Name::new(name).into_string();
        let index = self.read();

        index
            .get(&key)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.is_valid_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stores `record` under `name`. A record with the same type and data is
    /// refreshed in place instead of duplicated.
    pub fn insert(&self, name: &str, record: CachedRecord) {
        let key = Name::new(name).into_string();
        let mut index = self.write();
        let records = index.entry(key).or_default();

        match records.iter_mut().find(|r| r.same_key(&record)) {
            Some(existing) => {
                existing.ttl = record.ttl;
                existing.inserted_at = record.inserted_at;
            }
            None => records.push(record),
        }
    }

    /// Drops every expired record, and every name left without records.
    /// Returns how many records were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(unix_now())
    }

    pub fn sweep_at(&self, now: f64) -> usize {
        let mut index = self.write();
        let mut removed = 0;

        index.retain(|name, records| {
            let before = records.len();
            records.retain(|r| r.is_valid_at(now));
            removed += before - records.len();

            if records.is_empty() {
                trace!(%name, "dropping empty cache entry");
                return false;
            }
            true
        });

        removed
    }

    /// Swaps in `index` wholesale, discarding the current contents.
    pub fn replace(&self, index: CacheIndex) {
        *self.write() = index;
    }

    pub fn snapshot(&self) -> CacheIndex {
        self.read().clone()
    }

    /// Number of cached names.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
