//! # Production Fund Storage
//!
//! Key/value persistence for the global fund record and participant records.
//!
//! ## Storage Layout
//!
//! - `fund` - global fund state and pause flag
//! - `participant/<id>` - one participant aggregate per key
//! - `ledger/<id>` - spendable balances of the bundled value ledger
//! - `custody` - value held by the engine
//!
//! Values are bincode-encoded; see [`codec`]. Every record touched by one
//! operation is written through a single [`WriteBatch`], which a store applies
//! all-or-nothing.

use prodfund_core::{FundError, Result};

/// One staged change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// Changes applied atomically by [`StateStore::write`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an insert or overwrite
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key.into(), value));
    }

    /// Stage a removal
    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Staged changes in order; later changes to a key win
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    fn validate(&self) -> Result<()> {
        for op in &self.ops {
            match op {
                BatchOp::Put(key, _) | BatchOp::Delete(key) => check_key(key)?,
            }
        }
        Ok(())
    }
}

/// Byte-level key/value store
pub trait StateStore: Send + Sync {
    /// Apply every change in `batch`, or none of them
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Fetch a record
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Insert or overwrite a single record
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Remove a single record
    fn delete(&self, key: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }
}

fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(FundError::Storage(format!("invalid key: {key:?}")))
    }
}

pub mod codec {
    //! bincode encoding of stored records

    use prodfund_core::{FundError, Result};
    use serde::{de::DeserializeOwned, Serialize};

    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| FundError::Serialization(e.to_string()))
    }

    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| FundError::Serialization(e.to_string()))
    }
}

pub mod memory {
    //! In-process store, lost on restart

    use super::{BatchOp, StateStore, WriteBatch};
    use parking_lot::RwLock;
    use prodfund_core::Result;
    use std::collections::BTreeMap;

    #[derive(Default)]
    pub struct MemoryStore {
        data: RwLock<BTreeMap<String, Vec<u8>>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.data.read().len()
        }

        pub fn is_empty(&self) -> bool {
            self.data.read().is_empty()
        }
    }

    impl StateStore for MemoryStore {
        fn write(&self, batch: WriteBatch) -> Result<()> {
            batch.validate()?;
            let mut data = self.data.write();
            for op in batch.ops {
                match op {
                    BatchOp::Put(key, value) => {
                        data.insert(key, value);
                    }
                    BatchOp::Delete(key) => {
                        data.remove(&key);
                    }
                }
            }
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.data.read().get(key).cloned())
        }

        fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .data
                .read()
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect())
        }
    }
}

pub mod sled_store {
    //! sled-backed durable store
    //!
    //! All records live in one tree so a [`WriteBatch`] maps onto a single
    //! `sled::Batch`, which sled applies atomically.

    use super::{BatchOp, StateStore, WriteBatch};
    use prodfund_core::{FundError, Result};
    use std::path::Path;
    use tracing::debug;

    /// Tree holding every fund record. Renaming it orphans existing data.
    const TREE_STATE: &str = "fund_state";

    pub struct SledStore {
        db: sled::Db,
        state: sled::Tree,
    }

    fn db_err(e: sled::Error) -> FundError {
        FundError::Storage(e.to_string())
    }

    impl std::fmt::Debug for SledStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("SledStore")
                .field("records", &self.state.len())
                .finish_non_exhaustive()
        }
    }

    impl SledStore {
        /// Open or create a store at `path`
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let db = sled::open(path).map_err(db_err)?;
            debug!("Opened state store at {:?}", path);
            Self::with_db(db)
        }

        /// Store that is deleted when dropped
        pub fn temporary() -> Result<Self> {
            let db = sled::Config::new()
                .temporary(true)
                .open()
                .map_err(db_err)?;
            Self::with_db(db)
        }

        fn with_db(db: sled::Db) -> Result<Self> {
            let state = db.open_tree(TREE_STATE).map_err(db_err)?;
            Ok(Self { db, state })
        }

        /// Flush pending writes to disk
        pub fn flush(&self) -> Result<()> {
            self.db.flush().map_err(db_err)?;
            Ok(())
        }
    }

    impl StateStore for SledStore {
        fn write(&self, batch: WriteBatch) -> Result<()> {
            batch.validate()?;
            let staged = batch.len();
            let mut sled_batch = sled::Batch::default();
            for op in batch.ops {
                match op {
                    BatchOp::Put(key, value) => sled_batch.insert(key.as_bytes(), value),
                    BatchOp::Delete(key) => sled_batch.remove(key.as_bytes()),
                }
            }
            self.state.apply_batch(sled_batch).map_err(db_err)?;
            self.flush()?;
            debug!("Committed {} record changes", staged);
            Ok(())
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .state
                .get(key.as_bytes())
                .map_err(db_err)?
                .map(|v| v.to_vec()))
        }

        fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            let mut keys = Vec::new();
            for key in self.state.scan_prefix(prefix.as_bytes()).keys() {
                let key = key.map_err(db_err)?;
                let key = String::from_utf8(key.to_vec())
                    .map_err(|e| FundError::Storage(format!("non-utf8 key: {e}")))?;
                keys.push(key);
            }
            Ok(keys)
        }
    }
}

// Re-export for convenience
pub use memory::MemoryStore;
pub use sled_store::SledStore;
