use super::types::{Operand, PageRequest};
use crate::catalog::StoreInfo;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Local storage engine for the fragments hosted by this node.
///
/// Each fragment is an ordered map so that scans return keys in order and can be
/// paged by resuming after the last key seen.
pub struct ShardStore {
    fragments: DashMap<StoreInfo, BTreeMap<String, String>>,
}

impl ShardStore {
    pub fn new() -> Self {
        Self {
            fragments: DashMap::new(),
        }
    }

    pub fn put(&self, store: &StoreInfo, operand: Operand) {
        self.fragments
            .entry(store.clone())
            .or_default()
            .insert(operand.key, operand.value);
    }

    /// Inserts only if the key is vacant. Returns the existing value otherwise.
    pub fn put_if_absent(&self, store: &StoreInfo, operand: Operand) -> Option<String> {
        let mut fragment = self.fragments.entry(store.clone()).or_default();
        match fragment.get(&operand.key) {
            Some(existing) => Some(existing.clone()),
            None => {
                fragment.insert(operand.key, operand.value);
                None
            }
        }
    }

    pub fn put_all(&self, store: &StoreInfo, operands: Vec<Operand>) -> usize {
        let count = operands.len();
        let mut fragment = self.fragments.entry(store.clone()).or_default();
        for operand in operands {
            fragment.insert(operand.key, operand.value);
        }
        count
    }

    pub fn get(&self, store: &StoreInfo, key: &str) -> Option<String> {
        self.fragments
            .get(store)
            .and_then(|fragment| fragment.get(key).cloned())
    }

    pub fn delete(&self, store: &StoreInfo, key: &str) -> Option<String> {
        self.fragments
            .get_mut(store)
            .and_then(|mut fragment| fragment.remove(key))
    }

    /// Returns up to `page.limit` records in key order.
    pub fn page(&self, store: &StoreInfo, page: &PageRequest) -> Vec<Operand> {
        let Some(fragment) = self.fragments.get(store) else {
            return Vec::new();
        };

        let lower = match (&page.after, &page.range.start) {
            (Some(after), _) => Bound::Excluded(after.clone()),
            (None, Some(start)) => Bound::Included(start.clone()),
            (None, None) => Bound::Unbounded,
        };
        let upper = match &page.range.end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        // BTreeMap::range panics on an inverted interval.
        if let (Bound::Included(lo) | Bound::Excluded(lo), Bound::Excluded(hi)) = (&lower, &upper) {
            if lo >= hi {
                return Vec::new();
            }
        }

        fragment
            .range((lower, upper))
            .take(page.limit)
            .map(|(key, value)| Operand::new(key.clone(), value.clone()))
            .collect()
    }

    pub fn count(&self, store: &StoreInfo) -> u64 {
        self.fragments
            .get(store)
            .map(|fragment| fragment.len() as u64)
            .unwrap_or(0)
    }

    pub fn destroy(&self, store: &StoreInfo) -> bool {
        let removed = self.fragments.remove(store).is_some();
        if removed {
            tracing::info!("Destroyed local fragment {}", store);
        }
        removed
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }
}

impl Default for ShardStore {
    fn default() -> Self {
        Self::new()
    }
}
