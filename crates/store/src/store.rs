//! Two-generation fingerprint store on sled
//!
//! Two maps from absolute path to [`Fingerprint`]:
//! - `old` holds the baseline from the previous pass
//! - `current` collects what the running pass observes
//!
//! Opening a store swaps the roles from the last session so the previous
//! `current` becomes the new baseline and the previous `old` is emptied and
//! reused. The role assignment is committed before `open` returns, so a
//! crash never leaves both maps claiming the same role.
//!
//! One live handle exists per store location in the process. [`open`] on a
//! location that is already open returns the same handle.
//!
//! [`open`]: FingerprintStore::open

use crate::fingerprint::Fingerprint;
use crate::generation::Generation;
use crate::roles::{is_generation_tree, RoleState, Roles};
use crate::{Result, StoreError};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use sled::{Batch, Db, Tree};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

type Registry = Mutex<HashMap<PathBuf, Arc<FingerprintStore>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Progress of the scan pass bracketed by `begin_pass`/`finish_pass`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    /// No pass since open: `current` was emptied by the open swap
    Fresh,
    Running,
    Completed,
}

struct Inner {
    db: Db,
    roles: Roles,
    old: Tree,
    current: Tree,
}

impl Inner {
    /// old := current, current := empty
    fn rotate(&mut self) -> Result<()> {
        self.roles = self.roles.swapped();
        std::mem::swap(&mut self.old, &mut self.current);
        self.current.clear()?;
        self.roles.save(&self.db)
    }

    /// Merge current into old (current wins), then empty current
    fn fold(&mut self) -> Result<()> {
        let mut batch = Batch::default();
        for item in self.current.iter() {
            let (key, value) = item?;
            batch.insert(key, value);
        }
        self.old.apply_batch(batch)?;
        self.current.clear()?;
        Ok(())
    }
}

/// Persistent two-generation map from path to fingerprint
pub struct FingerprintStore {
    path: PathBuf,
    inner: RwLock<Option<Inner>>,
    pass: Mutex<PassState>,
}

impl FingerprintStore {
    /// Open the store at `path`, or return the live handle for it
    ///
    /// A location that sled cannot read as a database is destroyed and
    /// recreated empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let location = absolute(path.as_ref())?;

        let mut stores = registry().lock();
        if let Some(store) = stores.get(&location) {
            debug!("Reusing open fingerprint store: {}", location.display());
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(Self::create(&location)?);
        stores.insert(location, Arc::clone(&store));
        Ok(store)
    }

    fn create(location: &Path) -> Result<Self> {
        info!("Opening fingerprint store: {}", location.display());
        let db = open_db(location)?;

        let (roles, keep_baseline) = match Roles::load(&db)? {
            RoleState::Valid(previous) => (previous.swapped(), true),
            RoleState::Missing => (Roles::initial(), false),
            RoleState::Inconsistent => {
                warn!(
                    "Generation roles in {} are inconsistent, starting without a baseline",
                    location.display()
                );
                (Roles::initial(), false)
            }
        };

        let old = db.open_tree(&roles.old)?;
        let current = db.open_tree(&roles.current)?;
        if !keep_baseline {
            old.clear()?;
        }
        current.clear()?;
        drop_stray_trees(&db, &roles)?;

        roles.save(&db)?;
        db.flush()?;

        info!(
            baseline = old.len(),
            old = %roles.old,
            current = %roles.current,
            "Fingerprint store ready"
        );

        Ok(Self {
            path: location.to_path_buf(),
            inner: RwLock::new(Some(Inner {
                db,
                roles,
                old,
                current,
            })),
            pass: Mutex::new(PassState::Fresh),
        })
    }

    /// Location of the store
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().is_none()
    }

    /// Map being filled by the running pass
    pub fn current(&self) -> Result<Generation<'_>> {
        self.view(|inner| &inner.current)
    }

    /// Baseline from the previous pass
    pub fn old(&self) -> Result<Generation<'_>> {
        self.view(|inner| &inner.old)
    }

    fn view(&self, pick: fn(&Inner) -> &Tree) -> Result<Generation<'_>> {
        RwLockReadGuard::try_map(self.inner.read_recursive(), |inner| inner.as_ref().map(pick))
            .map(Generation::new)
            .map_err(|_| self.closed())
    }

    /// Prepare `current` for a new reconciliation pass
    ///
    /// After a completed pass its observations become the baseline. After
    /// an interrupted pass, the partial observations are merged into the
    /// baseline instead so nothing seen before the interruption is lost.
    /// Right after open the swap has already happened and this is a no-op.
    pub fn begin_pass(&self) -> Result<()> {
        let mut pass = self.pass.lock();
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or_else(|| self.closed())?;

        match *pass {
            PassState::Fresh => {}
            PassState::Completed => {
                debug!("Rotating generations");
                inner.rotate()?;
            }
            PassState::Running => {
                debug!("Previous pass incomplete, folding current into old");
                inner.fold()?;
            }
        }
        *pass = PassState::Running;
        Ok(())
    }

    /// Mark the running pass complete and commit
    pub fn finish_pass(&self) -> Result<()> {
        *self.pass.lock() = PassState::Completed;
        self.commit()
    }

    /// Remove a path from both generations
    pub fn forget(&self, key: &str) -> Result<()> {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or_else(|| self.closed())?;
        inner.old.remove(key)?;
        inner.current.remove(key)?;
        Ok(())
    }

    /// Make pending writes durable
    pub fn commit(&self) -> Result<()> {
        let guard = self.inner.read();
        let inner = guard.as_ref().ok_or_else(|| self.closed())?;
        inner.db.flush()?;
        Ok(())
    }

    /// Reclaim space held by removed entries
    ///
    /// Both generations are rewritten into fresh trees and the previous
    /// trees are dropped. Entries and roles are unchanged.
    pub fn compact(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let inner = guard.as_mut().ok_or_else(|| self.closed())?;

        inner.db.flush()?;
        let before = inner.db.size_on_disk().unwrap_or(0);

        let next = inner.roles.next();
        let old = inner.db.open_tree(&next.old)?;
        copy_tree(&inner.old, &old)?;
        let current = inner.db.open_tree(&next.current)?;
        copy_tree(&inner.current, &current)?;
        next.save(&inner.db)?;
        inner.db.flush()?;

        let retired = std::mem::replace(&mut inner.roles, next);
        inner.old = old;
        inner.current = current;
        inner.db.drop_tree(retired.old.as_bytes())?;
        inner.db.drop_tree(retired.current.as_bytes())?;
        inner.db.flush()?;

        let after = inner.db.size_on_disk().unwrap_or(0);
        info!(before, after, "Compacted fingerprint store {}", self.path.display());
        Ok(())
    }

    /// Commit and release the store
    ///
    /// Later operations on this handle fail with [`StoreError::Closed`].
    /// Opening the same location again yields a fresh handle.
    pub fn close(&self) -> Result<()> {
        let taken = self.inner.write().take();

        {
            let mut stores = registry().lock();
            let registered = stores
                .get(&self.path)
                .is_some_and(|store| std::ptr::eq(Arc::as_ptr(store), self));
            if registered {
                stores.remove(&self.path);
            }
        }

        if let Some(inner) = taken {
            inner.db.flush()?;
            info!("Closed fingerprint store: {}", self.path.display());
        }
        Ok(())
    }

    /// Close every store opened in this process
    pub fn close_all() {
        let stores: Vec<_> = registry().lock().drain().map(|(_, store)| store).collect();
        for store in stores {
            if let Err(e) = store.close() {
                warn!("Failed to close fingerprint store {}: {}", store.path.display(), e);
            }
        }
    }

    fn closed(&self) -> StoreError {
        StoreError::Closed(self.path.clone())
    }
}

impl std::fmt::Debug for FingerprintStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintStore")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}

fn open_db(path: &Path) -> Result<Db> {
    match sled::open(path) {
        Ok(db) => Ok(db),
        Err(e) if is_unreadable(&e, path) => {
            warn!(
                "Fingerprint store {} is unreadable ({}), recreating it empty",
                path.display(),
                e
            );
            destroy(path)?;
            Ok(sled::open(path)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether an open failure means the location does not hold a usable database
fn is_unreadable(err: &sled::Error, path: &Path) -> bool {
    match err {
        sled::Error::Corruption { .. }
        | sled::Error::Unsupported(_)
        | sled::Error::ReportableBug(_) => true,
        sled::Error::Io(_) => path.is_file(),
        _ => false,
    }
}

fn destroy(path: &Path) -> Result<()> {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn drop_stray_trees(db: &Db, roles: &Roles) -> Result<()> {
    for name in db.tree_names() {
        let in_use = std::str::from_utf8(&name).is_ok_and(|name| roles.contains(name));
        if is_generation_tree(&name) && !in_use {
            debug!("Dropping stray tree {}", String::from_utf8_lossy(&name));
            db.drop_tree(&name)?;
        }
    }
    Ok(())
}

fn copy_tree(from: &Tree, to: &Tree) -> Result<()> {
    let mut batch = Batch::default();
    for item in from.iter() {
        let (key, value) = item?;
        batch.insert(key, value);
    }
    to.apply_batch(batch)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::ROLES_KEY;
    use tempfile::TempDir;

    fn fp(millis: i64) -> Fingerprint {
        Fingerprint::from_millis(millis)
    }

    #[test]
    fn test_fresh_store_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp_dir.path().join("db")).unwrap();

        assert!(store.old().unwrap().is_empty());
        assert!(store.current().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn test_open_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let first = FingerprintStore::open(&path).unwrap();
        let second = FingerprintStore::open(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        first.close().unwrap();
        assert!(second.is_closed());

        let reopened = FingerprintStore::open(&path).unwrap();
        assert!(!Arc::ptr_eq(&first, &reopened));
        reopened.close().unwrap();
    }

    #[test]
    fn test_restart_promotes_current_to_baseline() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let store = FingerprintStore::open(&path).unwrap();
        store.old().unwrap().insert("/stale", fp(1)).unwrap();
        store.current().unwrap().insert("/a", fp(10)).unwrap();
        store.finish_pass().unwrap();
        store.close().unwrap();

        let store = FingerprintStore::open(&path).unwrap();
        let old = store.old().unwrap();
        assert_eq!(old.get("/a").unwrap(), Some(fp(10)));
        assert!(!old.contains("/stale").unwrap());
        assert!(store.current().unwrap().is_empty());
        drop(old);
        store.close().unwrap();

        // A session that records nothing leaves an empty baseline behind
        let store = FingerprintStore::open(&path).unwrap();
        store.close().unwrap();
        let store = FingerprintStore::open(&path).unwrap();
        assert!(store.old().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn test_inconsistent_roles_drop_baseline() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let store = FingerprintStore::open(&path).unwrap();
        store.current().unwrap().insert("/a", fp(10)).unwrap();
        store.close().unwrap();

        {
            let db = sled::open(&path).unwrap();
            db.insert(ROLES_KEY, &b"garbage"[..]).unwrap();
            db.flush().unwrap();
        }

        let store = FingerprintStore::open(&path).unwrap();
        assert!(store.old().unwrap().is_empty());
        assert!(store.current().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn test_unreadable_location_is_recreated() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");
        std::fs::write(&path, b"not a database").unwrap();

        let store = FingerprintStore::open(&path).unwrap();
        assert!(store.old().unwrap().is_empty());
        store.current().unwrap().insert("/a", fp(1)).unwrap();
        store.close().unwrap();
        assert!(path.is_dir());
    }

    #[test]
    fn test_begin_pass_rotates_after_completed_pass() {
        let temp_dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp_dir.path().join("db")).unwrap();

        // Right after open nothing moves
        store.old().unwrap().insert("/base", fp(1)).unwrap();
        store.begin_pass().unwrap();
        assert!(store.old().unwrap().contains("/base").unwrap());

        store.current().unwrap().insert("/a", fp(2)).unwrap();
        store.finish_pass().unwrap();

        store.begin_pass().unwrap();
        let old = store.old().unwrap();
        assert_eq!(old.keys().unwrap(), vec!["/a".to_string()]);
        drop(old);
        assert!(store.current().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn test_begin_pass_folds_after_interrupted_pass() {
        let temp_dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp_dir.path().join("db")).unwrap();

        store.begin_pass().unwrap();
        {
            let old = store.old().unwrap();
            old.insert("/a", fp(1)).unwrap();
            old.insert("/b", fp(1)).unwrap();
            let current = store.current().unwrap();
            current.insert("/a", fp(5)).unwrap();
            current.insert("/c", fp(5)).unwrap();
        }

        // No finish_pass: the pass was interrupted
        store.begin_pass().unwrap();
        let old = store.old().unwrap();
        assert_eq!(old.get("/a").unwrap(), Some(fp(5)));
        assert_eq!(old.get("/b").unwrap(), Some(fp(1)));
        assert_eq!(old.get("/c").unwrap(), Some(fp(5)));
        drop(old);
        assert!(store.current().unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn test_forget_removes_from_both_generations() {
        let temp_dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp_dir.path().join("db")).unwrap();

        store.old().unwrap().insert("/a", fp(1)).unwrap();
        store.current().unwrap().insert("/a", fp(2)).unwrap();
        store.forget("/a").unwrap();

        assert!(!store.old().unwrap().contains("/a").unwrap());
        assert!(!store.current().unwrap().contains("/a").unwrap());
        store.close().unwrap();
    }

    #[test]
    fn test_compact_preserves_entries_and_roles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let store = FingerprintStore::open(&path).unwrap();
        for i in 0..100 {
            store.current().unwrap().insert(&format!("/f{}", i), fp(i)).unwrap();
        }
        for i in 0..90 {
            store.forget(&format!("/f{}", i)).unwrap();
        }
        store.old().unwrap().insert("/base", fp(7)).unwrap();

        store.compact().unwrap();
        assert_eq!(store.current().unwrap().len(), 10);
        assert_eq!(store.old().unwrap().get("/base").unwrap(), Some(fp(7)));

        store.finish_pass().unwrap();
        store.close().unwrap();

        // The compacted current still becomes the next baseline
        let store = FingerprintStore::open(&path).unwrap();
        let old = store.old().unwrap();
        assert_eq!(old.len(), 10);
        assert_eq!(old.get("/f95").unwrap(), Some(fp(95)));
        drop(old);
        store.close().unwrap();
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = FingerprintStore::open(temp_dir.path().join("db")).unwrap();
        store.close().unwrap();

        assert!(matches!(store.current(), Err(StoreError::Closed(_))));
        assert!(matches!(store.commit(), Err(StoreError::Closed(_))));
        assert!(matches!(store.begin_pass(), Err(StoreError::Closed(_))));

        // Closing twice is harmless
        store.close().unwrap();
    }
}
