use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use sha2::{Digest, Sha256};

use crate::db;
use crate::locks::{FileLock, LockError};

#[derive(Debug)]
pub enum StoreError {
    Db(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Lock(LockError),
    ConstraintViolation(String),
    NotFound {
        kind: &'static str,
        id: String,
    },
    KeyMismatch(PathBuf),
    Migration {
        version: i64,
        name: &'static str,
        source: rusqlite::Error,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Db(err) => write!(f, "store database error: {}", err),
            StoreError::Io(err) => write!(f, "store I/O error: {}", err),
            StoreError::Json(err) => write!(f, "store JSON error: {}", err),
            StoreError::Lock(err) => write!(f, "{}", err),
            StoreError::ConstraintViolation(message) => {
                write!(f, "write rejected by store constraint: {}", message)
            }
            StoreError::NotFound { kind, id } => write!(f, "{} '{}' not found", kind, id),
            StoreError::KeyMismatch(path) => {
                write!(f, "storage key does not match store at {}", path.display())
            }
            StoreError::Migration {
                version, name, source,
            } => write!(f, "migration {} ({}) failed: {}", version, name, source),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Db(err) => Some(err),
            StoreError::Io(err) => Some(err),
            StoreError::Json(err) => Some(err),
            StoreError::Lock(err) => Some(err),
            StoreError::Migration { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(err, message)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(message.unwrap_or_else(|| err.to_string()))
            }
            other => StoreError::Db(other),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        StoreError::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Json(value)
    }
}

impl From<LockError> for StoreError {
    fn from(value: LockError) -> Self {
        StoreError::Lock(value)
    }
}

/// Tables a write can touch; queries declare the ones they read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Account,
    Status,
    Notification,
    Conversation,
    Timeline,
    Filter,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub sequence: u64,
    pub tables: BTreeSet<Table>,
}

impl ChangeSet {
    pub fn touches(&self, tables: &[Table]) -> bool {
        tables.iter().any(|table| self.tables.contains(table))
    }
}

/// Fans committed change sets out to subscribers. Emission happens after the
/// commit, so a subscriber that reacts by reading sees the new state.
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: RwLock<Vec<(u64, Sender<ChangeSet>)>>,
    next_subscriber: AtomicU64,
    sequence: AtomicU64,
}

impl ChangeFeed {
    pub fn subscribe(&self) -> (u64, Receiver<ChangeSet>) {
        let (tx, rx) = mpsc::channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, tx));
        (id, rx)
    }

    /// Dropping the sender disconnects the matching receiver.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|(candidate, _)| *candidate != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn emit(&self, tables: BTreeSet<Table>) {
        let change = ChangeSet {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            tables,
        };
        tracing::debug!(sequence = change.sequence, tables = ?change.tables, "store change committed");
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|(_, tx)| tx.send(change.clone()).is_ok());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub busy_timeout: Duration,
    pub reader_pool_size: usize,
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
            reader_pool_size: 4,
            lock_timeout: Duration::from_millis(500),
        }
    }
}

/// An open write transaction. Callers mark the tables they modify so the
/// change feed can notify only the queries that depend on them.
pub struct WriteTx<'a> {
    tx: Transaction<'a>,
    touched: BTreeSet<Table>,
}

impl WriteTx<'_> {
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn touch(&mut self, table: Table) {
        self.touched.insert(table);
    }
}

/// One identity's content cache: a single serialized writer and a pool of
/// readers, each read running in its own snapshot transaction.
pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    feed: ChangeFeed,
    _lock: FileLock,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .field("subscribers", &self.feed.subscriber_count())
            .finish()
    }
}

impl Store {
    pub fn open(path: &Path, storage_key: &str, options: &StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock = FileLock::acquire(&lock_path(path), options.lock_timeout)?;
        let writer = db::open_connection(path, options.busy_timeout, &key_digest(storage_key))?;

        let mut readers = Vec::new();
        for _ in 0..options.reader_pool_size.max(1) {
            readers.push(Mutex::new(db::open_reader(path, options.busy_timeout)?));
        }
        tracing::info!(path = %path.display(), readers = readers.len(), "opened content store");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            feed: ChangeFeed::default(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Runs `apply` inside one write transaction. Any error rolls the whole
    /// transaction back; on commit the touched tables are announced.
    pub fn write<T, F>(&self, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut WriteTx<'_>) -> Result<T, StoreError>,
    {
        let (value, touched) = {
            let mut conn = self.writer.lock();
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut write = WriteTx {
                tx,
                touched: BTreeSet::new(),
            };
            let value = apply(&mut write)?;
            let WriteTx { tx, touched } = write;
            tx.commit()?;
            (value, touched)
        };

        if !touched.is_empty() {
            self.feed.emit(touched);
        }
        Ok(value)
    }

    pub fn read<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.reader();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = query(&tx)?;
        tx.finish()?;
        Ok(value)
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed);
        let count = self.readers.len();
        for offset in 0..count {
            if let Some(guard) = self.readers[(start + offset) % count].try_lock() {
                return guard;
            }
        }
        self.readers[start % count].lock()
    }
}

pub fn lock_path(store_path: &Path) -> PathBuf {
    store_path.with_extension("lock")
}

fn key_digest(storage_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(storage_key.as_bytes());
    format!("{:x}", hasher.finalize())
}
