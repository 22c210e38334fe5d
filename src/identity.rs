use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;

use crate::locks::FileLock;
use crate::store::{lock_path, Store, StoreError, StoreOptions};

const STORE_FILE: &str = "content.sqlite";

/// Names one (server, account) pairing. Used verbatim as a directory name, so
/// only ASCII letters, digits and `.`, `_`, `-`, `@` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdentityId {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let valid = !value.is_empty()
            && !value.starts_with('.')
            && value
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-' | '@'));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(IdentityError::InvalidId(value.to_string()))
        }
    }
}

#[derive(Debug)]
pub enum IdentityError {
    InvalidId(String),
    InUse(IdentityId),
    Io(std::io::Error),
    Store(StoreError),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::InvalidId(raw) => write!(f, "invalid identity id '{}'", raw),
            IdentityError::InUse(id) => write!(f, "identity '{}' has an open store", id),
            IdentityError::Io(err) => write!(f, "identity I/O error: {}", err),
            IdentityError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl Error for IdentityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            IdentityError::Io(err) => Some(err),
            IdentityError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IdentityError {
    fn from(value: std::io::Error) -> Self {
        IdentityError::Io(value)
    }
}

impl From<StoreError> for IdentityError {
    fn from(value: StoreError) -> Self {
        IdentityError::Store(value)
    }
}

/// One subdirectory per identity under `root`, each holding that identity's
/// store file and nothing shared.
#[derive(Debug, Clone)]
pub struct StoreDirectory {
    root: PathBuf,
    options: StoreOptions,
}

impl StoreDirectory {
    pub fn new(root: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self, id: &IdentityId) -> PathBuf {
        self.root.join(id.as_str()).join(STORE_FILE)
    }

    pub fn list(&self) -> Result<Vec<IdentityId>, IdentityError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.path().join(STORE_FILE).is_file() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<IdentityId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn open(&self, id: &IdentityId, storage_key: &str) -> Result<Arc<Store>, IdentityError> {
        let store = Store::open(&self.store_path(id), storage_key, &self.options)?;
        Ok(Arc::new(store))
    }

    /// Removes the identity's whole directory, holding the store lock until
    /// everything else is gone. Returns false when there was nothing to remove.
    pub fn delete(&self, id: &IdentityId) -> Result<bool, IdentityError> {
        let dir = self.root.join(id.as_str());
        if !dir.exists() {
            return Ok(false);
        }
        let lock_file = lock_path(&self.store_path(id));
        let Some(lock) = FileLock::try_acquire(&lock_file).map_err(StoreError::from)? else {
            return Err(IdentityError::InUse(id.clone()));
        };
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path == lock_file {
                continue;
            }
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        drop(lock);
        std::fs::remove_dir(&dir)?;
        tracing::info!(identity = %id, "deleted identity store");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::{IdentityError, IdentityId, StoreDirectory};
    use crate::store::{lock_path, StoreError, StoreOptions};

    fn unique_root() -> PathBuf {
        std::env::temp_dir().join(format!("fedicache-identity-{}", Uuid::now_v7()))
    }

    fn id(raw: &str) -> IdentityId {
        raw.parse().expect("identity id should parse")
    }

    #[test]
    fn identity_ids_reject_path_like_values() {
        assert!("alice@example.social".parse::<IdentityId>().is_ok());
        for raw in ["", "..", ".hidden", "a/b", "a b"] {
            assert!(matches!(
                raw.parse::<IdentityId>(),
                Err(IdentityError::InvalidId(_))
            ));
        }
    }

    #[test]
    fn stores_are_isolated_per_identity() {
        let root = unique_root();
        let directory = StoreDirectory::new(&root, StoreOptions::default());
        let alice = directory.open(&id("alice"), "k1").expect("alice should open");
        let bob = directory.open(&id("bob"), "k2").expect("bob should open");
        assert_ne!(alice.path(), bob.path());
        assert_eq!(
            directory.list().expect("list should succeed"),
            vec![id("alice"), id("bob")]
        );
        drop(alice);
        drop(bob);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn wrong_storage_key_is_rejected() {
        let root = unique_root();
        let directory = StoreDirectory::new(&root, StoreOptions::default());
        drop(directory.open(&id("alice"), "right").expect("first open should succeed"));
        let err = directory
            .open(&id("alice"), "wrong")
            .expect_err("wrong key should fail");
        assert!(matches!(
            err,
            IdentityError::Store(StoreError::KeyMismatch(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn delete_is_refused_while_open_and_removes_everything_after() {
        let root = unique_root();
        let directory = StoreDirectory::new(&root, StoreOptions::default());
        let store = directory.open(&id("alice"), "k").expect("store should open");
        assert!(matches!(
            directory.delete(&id("alice")),
            Err(IdentityError::InUse(_))
        ));
        drop(store);
        assert!(directory.delete(&id("alice")).expect("delete should succeed"));
        assert!(!root.join("alice").exists());
        assert!(directory.list().expect("list should succeed").is_empty());
        assert!(!directory.delete(&id("alice")).expect("second delete is a no-op"));
        let _ = std::fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn a_lock_left_by_a_crashed_process_does_not_block_open_or_delete() {
        let root = unique_root();
        let directory = StoreDirectory::new(&root, StoreOptions::default());
        drop(directory.open(&id("alice"), "k").expect("store should open"));
        let stale = lock_path(&directory.store_path(&id("alice")));
        std::fs::write(&stale, "999999999\n").expect("stale lock should be written");

        let store = directory.open(&id("alice"), "k").expect("stale lock should be reclaimed");
        drop(store);
        std::fs::write(&stale, "999999999\n").expect("stale lock should be written again");
        assert!(directory.delete(&id("alice")).expect("delete should reclaim the lock"));
        assert!(!root.join("alice").exists());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn listing_a_missing_root_is_empty() {
        let directory = StoreDirectory::new(unique_root(), StoreOptions::default());
        assert!(directory.list().expect("list should succeed").is_empty());
    }
}
