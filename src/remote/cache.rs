use crate::remote::rejection::RemoteError;
use crate::remote::types::{CacheTag, QueryKey, QueryRequest, QueryTicket};
use serde_json::Value;
use std::collections::BTreeMap;

pub const DEFAULT_MAX_ENTRIES: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Served from cache; nothing to fetch.
    Fresh(Value),
    /// Another caller is already fetching this key; the ticket will be handed
    /// back from `complete`.
    Pending,
    /// The caller must fetch and then call `complete`.
    Miss,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: QueryKey,
    tags: Vec<CacheTag>,
    data: Option<Value>,
    stale: bool,
    epoch: u64,
    in_flight_epoch: Option<u64>,
    waiters: Vec<QueryTicket>,
    last_used: u64,
}

impl CacheEntry {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            tags: Vec::new(),
            data: None,
            stale: false,
            epoch: 0,
            in_flight_epoch: None,
            waiters: Vec::new(),
            last_used: 0,
        }
    }

    fn in_flight(&self) -> bool {
        self.in_flight_epoch.is_some()
    }

    fn mark_stale(&mut self) {
        self.stale = true;
        self.epoch += 1;
    }
}

/// Shared read cache: de-duplicates in-flight fetches and goes stale by tag.
#[derive(Debug, Clone)]
pub struct QueryCache {
    entries: BTreeMap<String, CacheEntry>,
    max_entries: usize,
    clock: u64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_entries: max_entries.max(1),
            clock: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self, key: &QueryKey) -> Option<&Value> {
        self.entries
            .get(&key.cache_key())
            .and_then(|entry| entry.data.as_ref())
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries
            .get(&key.cache_key())
            .is_some_and(|entry| entry.stale)
    }

    pub fn lookup_or_begin(&mut self, request: &QueryRequest) -> CacheLookup {
        self.clock += 1;
        let cache_key = request.key().cache_key();
        if !self.entries.contains_key(&cache_key) {
            self.evict_for_insert();
        }
        let clock = self.clock;
        let entry = self
            .entries
            .entry(cache_key)
            .or_insert_with(|| CacheEntry::new(request.key().clone()));
        entry.last_used = clock;

        if entry.in_flight() {
            entry.waiters.push(request.ticket.clone());
            return CacheLookup::Pending;
        }
        if let (Some(data), false) = (entry.data.as_ref(), entry.stale) {
            return CacheLookup::Fresh(data.clone());
        }

        entry.tags = request.tags.clone();
        entry.in_flight_epoch = Some(entry.epoch);
        entry.waiters = vec![request.ticket.clone()];
        CacheLookup::Miss
    }

    /// Records a fetch result and returns every ticket waiting on it.
    pub fn complete(
        &mut self,
        key: &QueryKey,
        result: &Result<Value, RemoteError>,
    ) -> Vec<QueryTicket> {
        let Some(entry) = self.entries.get_mut(&key.cache_key()) else {
            return Vec::new();
        };
        let Some(started) = entry.in_flight_epoch.take() else {
            return Vec::new();
        };
        if let Ok(data) = result {
            entry.data = Some(data.clone());
            entry.stale = entry.epoch != started;
        }
        std::mem::take(&mut entry.waiters)
    }

    /// Marks every entry carrying one of `tags` stale and returns their keys.
    pub fn invalidate(&mut self, tags: &[CacheTag]) -> Vec<QueryKey> {
        let mut keys = Vec::new();
        for entry in self.entries.values_mut() {
            if entry.tags.iter().any(|tag| tags.contains(tag)) {
                entry.mark_stale();
                keys.push(entry.key.clone());
            }
        }
        keys
    }

    /// Marks everything stale, as when the host window regains focus.
    pub fn on_focus(&mut self) -> Vec<QueryKey> {
        self.entries
            .values_mut()
            .map(|entry| {
                entry.mark_stale();
                entry.key.clone()
            })
            .collect()
    }

    pub fn forget(&mut self, key: &QueryKey) {
        let cache_key = key.cache_key();
        match self.entries.get_mut(&cache_key) {
            Some(entry) if entry.in_flight() => entry.mark_stale(),
            Some(_) => {
                self.entries.remove(&cache_key);
            }
            None => {}
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_for_insert(&mut self) {
        while self.entries.len() >= self.max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|(_, entry)| !entry.in_flight())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(cache_key, _)| cache_key.clone());
            match victim {
                Some(cache_key) => {
                    self.entries.remove(&cache_key);
                }
                None => break,
            }
        }
    }
}
