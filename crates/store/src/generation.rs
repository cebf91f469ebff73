//! Borrowed view of one fingerprint generation

use crate::fingerprint::Fingerprint;
use crate::{Result, StoreError};
use parking_lot::MappedRwLockReadGuard;
use sled::IVec;

/// Read/write access to one generation map
///
/// Holds a shared lock on the store: drop the view before rotating,
/// compacting or closing the store from the same thread.
pub struct Generation<'a> {
    tree: MappedRwLockReadGuard<'a, sled::Tree>,
}

impl<'a> Generation<'a> {
    pub(crate) fn new(tree: MappedRwLockReadGuard<'a, sled::Tree>) -> Self {
        Self { tree }
    }

    /// Look up a path
    pub fn get(&self, key: &str) -> Result<Option<Fingerprint>> {
        match self.tree.get(key)? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Insert or replace a path, returning the previous fingerprint
    pub fn insert(&self, key: &str, fingerprint: Fingerprint) -> Result<Option<Fingerprint>> {
        match self.tree.insert(key, &fingerprint.to_bytes()[..])? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Remove a path, returning its fingerprint
    pub fn remove(&self, key: &str) -> Result<Option<Fingerprint>> {
        match self.tree.remove(key)? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    /// Snapshot of every key
    pub fn keys(&self) -> Result<Vec<String>> {
        self.tree
            .iter()
            .keys()
            .map(|key| Ok(String::from_utf8_lossy(&key?).into_owned()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<()> {
        Ok(self.tree.clear()?)
    }
}

fn decode(key: &str, raw: &IVec) -> Result<Fingerprint> {
    Fingerprint::from_bytes(raw).ok_or_else(|| StoreError::Malformed {
        key: key.to_string(),
    })
}
