#![forbid(unsafe_code)]

//! Crash-consistent persistence for the aggregator: blocks, messages, logs
//! and the request-to-log index, over a single ordered byte-keyed store.
//!
//! Every mutation is one atomic [`WriteBatch`]; the count slots are written
//! in the same batch as the data rows, so after crash recovery the store is
//! always "all batches up to some prefix applied" and counts can never
//! disagree with data. Mutations are serialised by an internal writer lock;
//! reads go straight to RocksDB.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use borsh::{BorshDeserialize, BorshSerialize};
use ramp_interface::Hash;
use rocksdb::{WriteBatch, WriteOptions, DB};
use tracing::debug;

mod keys;

use keys::{
    block_key, decode_count, encode_count, log_key, message_key, request_key, BLOCK_COUNT_KEY,
    LOG_COUNT_KEY, MESSAGE_COUNT_KEY,
};

/// Errors surfaced by the aggregator store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// `save_block` was called with a height that does not extend the chain.
    #[error("out-of-order block: expected height {expected}, got {got}")]
    OutOfOrder {
        /// The only height `save_block` would accept.
        expected: u64,
        /// The height that was passed.
        got: u64,
    },
    /// `restore_block` was called with a height the store has never seen.
    #[error("unknown block height {0}")]
    UnknownBlock(u64),
    /// Counts and data disagree. Fatal to the process.
    #[error("storage corruption: {0}")]
    Corruption(String),
    /// Underlying store failure.
    #[error(transparent)]
    Db(#[from] rocksdb::Error),
    /// Record (de)serialisation failure.
    #[error(transparent)]
    Codec(#[from] std::io::Error),
}

/// Metadata of one saved settlement-chain block.
///
/// `log_count`/`message_count` are the number of logs/messages attributed to
/// this block: everything saved between this block's `save_block` call and
/// the next one's.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockInfo {
    /// Block hash as saved.
    pub hash: Hash,
    /// Index of the first log attributed to this block.
    pub start_log: u64,
    /// Number of logs attributed to this block.
    pub log_count: u64,
    /// Index of the first message attributed to this block.
    pub start_message: u64,
    /// Number of messages attributed to this block.
    pub message_count: u64,
}

/// On-disk block record. Per-block counts are derived at read time from the
/// next block's start (or the live count), so they never go stale.
#[derive(BorshSerialize, BorshDeserialize)]
struct StoredBlock {
    hash: Hash,
    start_log: u64,
    start_message: u64,
}

/// Count cache, authoritative between the open snapshot and the last applied
/// batch. `next_block` is absent until the first `save_block`.
#[derive(Debug, Clone, Copy)]
struct Counts {
    logs: u64,
    messages: u64,
    next_block: Option<u64>,
}

/// The aggregator store.
#[derive(Clone)]
pub struct AggregatorDb {
    db: Arc<DB>,
    counts: Arc<Mutex<Counts>>,
}

impl std::fmt::Debug for AggregatorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorDb")
            .field("counts", &*self.lock_counts())
            .finish()
    }
}

impl AggregatorDb {
    /// Open (or create) the store at `path` and recover counts from their
    /// slots, verifying that the recovered counts are backed by data.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref())?;

        let counts = Counts {
            logs: read_count_slot(&db, LOG_COUNT_KEY)?.unwrap_or(0),
            messages: read_count_slot(&db, MESSAGE_COUNT_KEY)?.unwrap_or(0),
            next_block: read_count_slot(&db, BLOCK_COUNT_KEY)?,
        };

        if counts.logs > 0 && db.get(log_key(counts.logs - 1))?.is_none() {
            return Err(StoreError::Corruption(format!(
                "log count is {} but log {} is missing",
                counts.logs,
                counts.logs - 1
            )));
        }
        if counts.messages > 0 && db.get(message_key(counts.messages - 1))?.is_none() {
            return Err(StoreError::Corruption(format!(
                "message count is {} but message {} is missing",
                counts.messages,
                counts.messages - 1
            )));
        }

        debug!(
            logs = counts.logs,
            messages = counts.messages,
            next_block = ?counts.next_block,
            "opened aggregator store"
        );

        Ok(Self {
            db: Arc::new(db),
            counts: Arc::new(Mutex::new(counts)),
        })
    }

    fn lock_counts(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().expect("count lock must not be poisoned")
    }

    /// Apply one batch durably. The WAL is synced before this returns, so a
    /// success is a promise the data survives a crash.
    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        self.db.write_opt(batch, &opts)?;
        Ok(())
    }

    /// Number of saved logs.
    pub fn log_count(&self) -> u64 {
        self.lock_counts().logs
    }

    /// Number of saved messages.
    pub fn message_count(&self) -> u64 {
        self.lock_counts().messages
    }

    /// One past the highest saved block height (0 before any block).
    pub fn block_count(&self) -> u64 {
        self.lock_counts().next_block.unwrap_or(0)
    }

    /// Append a log blob; returns its index.
    pub fn save_log(&self, value: &[u8]) -> Result<u64, StoreError> {
        let mut counts = self.lock_counts();
        let index = counts.logs;
        let mut batch = WriteBatch::default();
        batch.put(log_key(index), value);
        batch.put(LOG_COUNT_KEY, encode_count(index + 1));
        self.write(batch)?;
        counts.logs = index + 1;
        Ok(index)
    }

    /// Append a message blob; returns its index.
    pub fn save_message(&self, value: &[u8]) -> Result<u64, StoreError> {
        let mut counts = self.lock_counts();
        let index = counts.messages;
        let mut batch = WriteBatch::default();
        batch.put(message_key(index), value);
        batch.put(MESSAGE_COUNT_KEY, encode_count(index + 1));
        self.write(batch)?;
        counts.messages = index + 1;
        Ok(index)
    }

    /// Fetch a log by index. `None` when the index is at or past the count.
    pub fn get_log(&self, index: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let count = self.log_count();
        if index >= count {
            return Ok(None);
        }
        match self.db.get(log_key(index))? {
            Some(value) => Ok(Some(value)),
            None => Err(StoreError::Corruption(format!(
                "log {index} missing below count {count}"
            ))),
        }
    }

    /// Fetch a message by index. `None` when the index is at or past the count.
    pub fn get_message(&self, index: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let count = self.message_count();
        if index >= count {
            return Ok(None);
        }
        match self.db.get(message_key(index))? {
            Some(value) => Ok(Some(value)),
            None => Err(StoreError::Corruption(format!(
                "message {index} missing below count {count}"
            ))),
        }
    }

    /// Record a block boundary. The first call accepts any height; every
    /// later call must extend the chain by exactly one.
    pub fn save_block(&self, height: u64, hash: Hash) -> Result<(), StoreError> {
        let mut counts = self.lock_counts();
        if let Some(expected) = counts.next_block {
            if height != expected {
                return Err(StoreError::OutOfOrder {
                    expected,
                    got: height,
                });
            }
        }
        let record = StoredBlock {
            hash,
            start_log: counts.logs,
            start_message: counts.messages,
        };
        let mut batch = WriteBatch::default();
        batch.put(block_key(height), record.try_to_vec()?);
        batch.put(BLOCK_COUNT_KEY, encode_count(height + 1));
        self.write(batch)?;
        counts.next_block = Some(height + 1);
        Ok(())
    }

    /// Fetch block metadata by height.
    pub fn get_block(&self, height: u64) -> Result<Option<BlockInfo>, StoreError> {
        let counts = *self.lock_counts();
        let Some(next_block) = counts.next_block else {
            return Ok(None);
        };
        if height >= next_block {
            return Ok(None);
        }
        let Some(raw) = self.db.get(block_key(height))? else {
            // Below the first saved height.
            return Ok(None);
        };
        let stored = StoredBlock::try_from_slice(&raw)?;

        let (end_log, end_message) = if height + 1 == next_block {
            (counts.logs, counts.messages)
        } else {
            let raw_next = self.db.get(block_key(height + 1))?.ok_or_else(|| {
                StoreError::Corruption(format!(
                    "block {height} exists but block {} is missing below count {next_block}",
                    height + 1
                ))
            })?;
            let next = StoredBlock::try_from_slice(&raw_next)?;
            (next.start_log, next.start_message)
        };

        Ok(Some(BlockInfo {
            hash: stored.hash,
            start_log: stored.start_log,
            log_count: end_log - stored.start_log,
            start_message: stored.start_message,
            message_count: end_message - stored.start_message,
        }))
    }

    /// Truncate the store back to the state just after block `height - 1`:
    /// block records at or above `height` are removed, together with every
    /// log and message attributed to them.
    pub fn restore_block(&self, height: u64) -> Result<(), StoreError> {
        let mut counts = self.lock_counts();
        let Some(next_block) = counts.next_block else {
            return Err(StoreError::UnknownBlock(height));
        };
        if height > next_block {
            return Err(StoreError::UnknownBlock(height));
        }
        if height == next_block {
            // Already in the requested state.
            return Ok(());
        }
        let raw = self
            .db
            .get(block_key(height))?
            .ok_or(StoreError::UnknownBlock(height))?;
        let stored = StoredBlock::try_from_slice(&raw)?;

        debug!(
            height,
            new_log_count = stored.start_log,
            new_message_count = stored.start_message,
            "restoring aggregator store"
        );

        let mut batch = WriteBatch::default();
        batch.delete_range(log_key(stored.start_log), log_key(counts.logs));
        batch.delete_range(message_key(stored.start_message), message_key(counts.messages));
        batch.delete_range(block_key(height), block_key(next_block));
        batch.put(LOG_COUNT_KEY, encode_count(stored.start_log));
        batch.put(MESSAGE_COUNT_KEY, encode_count(stored.start_message));
        batch.put(BLOCK_COUNT_KEY, encode_count(height));
        self.write(batch)?;

        counts.logs = stored.start_log;
        counts.messages = stored.start_message;
        counts.next_block = Some(height);
        Ok(())
    }

    /// Map a request fingerprint to the log index carrying its result.
    /// Last writer wins.
    pub fn save_request(&self, request_id: Hash, log_index: u64) -> Result<(), StoreError> {
        let _guard = self.lock_counts();
        let mut batch = WriteBatch::default();
        batch.put(request_key(&request_id), encode_count(log_index));
        self.write(batch)?;
        Ok(())
    }

    /// Look up the log index recorded for a request fingerprint.
    pub fn get_request(&self, request_id: Hash) -> Result<Option<u64>, StoreError> {
        match self.db.get(request_key(&request_id))? {
            Some(raw) => decode_count(&raw).map(Some).ok_or_else(|| {
                StoreError::Corruption(format!("malformed request record for {request_id}"))
            }),
            None => Ok(None),
        }
    }
}

fn read_count_slot(db: &DB, key: &[u8]) -> Result<Option<u64>, StoreError> {
    match db.get(key)? {
        Some(raw) => decode_count(&raw).map(Some).ok_or_else(|| {
            StoreError::Corruption(format!("malformed count slot {:?}", String::from_utf8_lossy(key)))
        }),
        None => Ok(None),
    }
}
