//! Durable Commitment Storage
//!
//! One sled tree, `commitments`: key = commitment id bytes, value = bincode
//! record. Each write is a single-key insert followed by a flush, so a
//! state change is either fully on disk or not at all.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::ledger::commitment::Commitment;

const COMMITMENTS_TREE: &str = "commitments";

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Sled(#[from] sled::Error),
    /// Record could not be encoded or decoded.
    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Key is not a commitment id.
    #[error("corrupt key of {0} bytes")]
    CorruptKey(usize),
    /// The blocking write task panicked or was cancelled.
    #[error("write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Commitment record store.
///
/// Cloning shares the same database handle.
#[derive(Clone)]
pub struct LedgerStore {
    db: sled::Db,
    commitments: sled::Tree,
}

impl LedgerStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref())?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let commitments = db.open_tree(COMMITMENTS_TREE)?;
        Ok(Self { db, commitments })
    }

    /// Durably write one record.
    pub fn put(&self, commitment: &Commitment) -> Result<(), StoreError> {
        let value = bincode::serialize(commitment)?;
        self.commitments.insert(commitment.id.as_bytes(), value)?;
        self.commitments.flush()?;
        debug!(commitment_id = %commitment.id, version = commitment.version, "commitment persisted");
        Ok(())
    }

    /// [`put`](Self::put) on the blocking pool, handing the record back.
    ///
    /// The flush is an fsync; running it here keeps runtime workers free
    /// while the caller holds its row lock.
    pub async fn persist(&self, commitment: Commitment) -> Result<Commitment, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.put(&commitment).map(|()| commitment)).await?
    }

    /// Every stored record, in key order.
    pub fn load_all(&self) -> Result<Vec<Commitment>, StoreError> {
        self.commitments
            .iter()
            .map(|entry| {
                let (key, value) = entry?;
                if key.len() != 16 {
                    return Err(StoreError::CorruptKey(key.len()));
                }
                Ok(bincode::deserialize(&value)?)
            })
            .collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.commitments.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.commitments.is_empty()
    }

    /// Bytes on disk.
    pub fn size_on_disk(&self) -> Result<u64, StoreError> {
        Ok(self.db.size_on_disk()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::commitment::{CommitmentId, NewCommitment};
    use secp256k1::{PublicKey, SecretKey, SECP256K1};

    fn record(amount: u64) -> Commitment {
        let secret = SecretKey::from_slice(&[9u8; 32]).unwrap();
        let new = NewCommitment {
            owner: PublicKey::from_secret_key(SECP256K1, &secret),
            btc_address: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into(),
            amount_satoshis: amount,
            proof: vec![0u8; 80],
            signed_at: 1,
            nonce: 2,
        };
        Commitment::provisional(CommitmentId::new_random(), 0, new, 3)
    }

    #[test]
    fn test_put_overwrites_by_id() {
        let store = LedgerStore::temporary().unwrap();
        let mut commitment = record(10);
        store.put(&commitment).unwrap();

        commitment.version = 1;
        store.put(&commitment).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all, vec![commitment]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_persist_writes_off_runtime_and_returns_record() {
        let store = LedgerStore::temporary().unwrap();
        let commitment = record(21);

        let returned = store.persist(commitment.clone()).await.unwrap();

        assert_eq!(returned, commitment);
        assert_eq!(store.load_all().unwrap(), vec![commitment]);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("commit-store-{}", CommitmentId::new_random()));
        let commitment = record(42);
        {
            let store = LedgerStore::open(&dir).unwrap();
            store.put(&commitment).unwrap();
        }

        let store = LedgerStore::open(&dir).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![commitment]);
        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
