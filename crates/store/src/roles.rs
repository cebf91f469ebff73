//! Generation role sentinel
//!
//! The store keeps its two generations in separate sled trees. Which tree
//! is "old" and which is "current" is recorded in a single entry of the
//! default tree, so the assignment survives a restart. Nothing outside the
//! store ever sees this entry.

use crate::Result;
use serde::{Deserialize, Serialize};
use sled::Db;
use tracing::warn;

pub(crate) const ROLES_KEY: &[u8] = b"generation-roles";
const TREE_PREFIX: &str = "fingerprints.";

/// Tree names currently playing each role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Roles {
    pub old: String,
    pub current: String,
}

/// Outcome of reading the sentinel at open
pub(crate) enum RoleState {
    Valid(Roles),
    Missing,
    Inconsistent,
}

impl Roles {
    /// Assignment used for a fresh or unrecoverable store
    pub fn initial() -> Self {
        Self {
            old: tree_name(0),
            current: tree_name(1),
        }
    }

    /// Read and validate the sentinel
    pub fn load(db: &Db) -> Result<RoleState> {
        let raw = match db.get(ROLES_KEY)? {
            Some(raw) => raw,
            None => return Ok(RoleState::Missing),
        };

        let roles: Roles = match bincode::deserialize(&raw) {
            Ok(roles) => roles,
            Err(e) => {
                warn!("Undecodable generation roles: {}", e);
                return Ok(RoleState::Inconsistent);
            }
        };

        if roles.old == roles.current
            || epoch_of(&roles.old).is_none()
            || epoch_of(&roles.current).is_none()
        {
            return Ok(RoleState::Inconsistent);
        }

        let names = db.tree_names();
        let exists = |name: &str| names.iter().any(|n| n.as_ref() == name.as_bytes());
        if !exists(&roles.old) || !exists(&roles.current) {
            return Ok(RoleState::Inconsistent);
        }

        Ok(RoleState::Valid(roles))
    }

    /// Persist the assignment (not flushed)
    pub fn save(&self, db: &Db) -> Result<()> {
        let encoded = bincode::serialize(self)?;
        db.insert(ROLES_KEY, encoded)?;
        Ok(())
    }

    /// Same trees with roles exchanged
    pub fn swapped(&self) -> Self {
        Self {
            old: self.current.clone(),
            current: self.old.clone(),
        }
    }

    /// Fresh tree names for a compaction rewrite
    pub fn next(&self) -> Self {
        let epoch = epoch_of(&self.old)
            .into_iter()
            .chain(epoch_of(&self.current))
            .max()
            .unwrap_or(0);
        Self {
            old: tree_name(epoch + 1),
            current: tree_name(epoch + 2),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.old == name || self.current == name
    }
}

/// Whether a sled tree name belongs to a fingerprint generation
pub(crate) fn is_generation_tree(name: &[u8]) -> bool {
    std::str::from_utf8(name).ok().and_then(epoch_of).is_some()
}

fn tree_name(epoch: u64) -> String {
    format!("{}{}", TREE_PREFIX, epoch)
}

fn epoch_of(name: &str) -> Option<u64> {
    name.strip_prefix(TREE_PREFIX)?.parse().ok()
}
