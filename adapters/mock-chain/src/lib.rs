#![forbid(unsafe_code)]

//! An in-memory settlement chain for tests and local runs.
//!
//! The mock "mines" a block per pushed log batch and per submitted
//! transaction, delivers logs to subscribers in block order, and lets tests
//! script submission failures and reorg notifications. It implements the
//! production [`ChainAdapter`] trait, so everything above the seam runs
//! unmodified against it.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use ramp_interface::cancel::Cancel;
use ramp_interface::chain::{
    BlockHeader, ChainAdapter, ChainError, ChainLog, ContractCall, EventFilter, EventSubscription,
    TxReceipt,
};
use ramp_interface::hash::{keccak_concat, Address, Hash};
use tokio::sync::mpsc;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const ERROR_CHANNEL_CAPACITY: usize = 10;

struct MockBlock {
    header: BlockHeader,
    logs: Vec<ChainLog>,
}

struct Subscriber {
    filter: EventFilter,
    events: mpsc::Sender<ChainLog>,
    errors: mpsc::Sender<ChainError>,
}

#[derive(Default)]
struct State {
    blocks: Vec<MockBlock>,
    subscribers: Vec<Subscriber>,
    submitted: Vec<ContractCall>,
    submit_failures: VecDeque<ChainError>,
}

impl State {
    fn tip_number(&self) -> u64 {
        self.blocks.last().map(|b| b.header.number).unwrap_or(0)
    }

    fn tip_hash(&self) -> Hash {
        self.blocks.last().map(|b| b.header.hash).unwrap_or(Hash::zero())
    }
}

/// A shared, cloneable handle to the mock chain.
#[derive(Clone, Default)]
pub struct MockChain {
    state: std::sync::Arc<Mutex<State>>,
}

impl MockChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mine a block carrying `raw_logs` (address, topics, data) and fan the
    /// logs out to matching subscribers. Returns the new header.
    pub fn push_block(&self, raw_logs: Vec<(Address, Vec<Hash>, Vec<u8>)>) -> BlockHeader {
        let mut state = self.state.lock();
        let number = state.tip_number() + 1;
        let parent_hash = state.tip_hash();
        let header = BlockHeader {
            hash: block_hash(number, parent_hash),
            parent_hash,
            number,
        };
        let logs: Vec<ChainLog> = raw_logs
            .into_iter()
            .enumerate()
            .map(|(i, (address, topics, data))| ChainLog {
                address,
                topics,
                data,
                block_hash: header.hash,
                block_number: number,
                tx_hash: keccak_concat(&[header.hash.as_ref(), &(i as u64).to_be_bytes()]),
            })
            .collect();

        state.subscribers.retain(|sub| !sub.events.is_closed());
        for log in &logs {
            for sub in &state.subscribers {
                if sub.filter.matches(log) {
                    match sub.events.try_send(log.clone()) {
                        // A subscriber that left between retain and send.
                        Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // Capacity mirrors a real adapter's buffered feed;
                            // a test overflowing it has lost block ordering.
                            panic!("mock event channel overflow")
                        }
                    }
                }
            }
        }

        state.blocks.push(MockBlock { header, logs });
        header
    }

    /// Mine a block with a single log.
    pub fn push_log(&self, address: Address, topics: Vec<Hash>, data: Vec<u8>) -> BlockHeader {
        self.push_block(vec![(address, topics, data)])
    }

    /// Notify every subscriber that its stream is broken (the no-silent-
    /// retraction rule: reorgs surface as errors, never as disappearing
    /// logs). Subscribers are dropped and must resubscribe.
    pub fn break_subscriptions(&self, reason: &str) {
        let mut state = self.state.lock();
        for sub in state.subscribers.drain(..) {
            let _ = sub
                .errors
                .try_send(ChainError::Transient(reason.to_string()));
        }
    }

    /// Script the next `submit_transaction` call to fail with `error`.
    pub fn fail_next_submission(&self, error: ChainError) {
        self.state.lock().submit_failures.push_back(error);
    }

    /// Every call submitted so far, in order.
    pub fn submitted_calls(&self) -> Vec<ContractCall> {
        self.state.lock().submitted.clone()
    }
}

fn block_hash(number: u64, parent: Hash) -> Hash {
    keccak_concat(&[&number.to_be_bytes(), parent.as_ref()])
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn subscribe_events(
        &self,
        filter: EventFilter,
        start_block: u64,
        cancel: &Cancel,
    ) -> Result<EventSubscription, ChainError> {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);

        let mut state = self.state.lock();
        // Replay history from start_block so reconnecting consumers can
        // re-derive their state.
        for block in &state.blocks {
            if block.header.number < start_block {
                continue;
            }
            for log in &block.logs {
                if filter.matches(log) {
                    event_tx
                        .try_send(log.clone())
                        .expect("mock event channel overflow");
                }
            }
        }
        state.subscribers.push(Subscriber {
            filter,
            events: event_tx,
            errors: error_tx,
        });

        Ok(EventSubscription {
            events: event_rx,
            errors: error_rx,
        })
    }

    async fn header_by_hash(&self, hash: Hash, cancel: &Cancel) -> Result<BlockHeader, ChainError> {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        self.state
            .lock()
            .blocks
            .iter()
            .find(|b| b.header.hash == hash)
            .map(|b| b.header)
            .ok_or(ChainError::NotFound)
    }

    async fn submit_transaction(
        &self,
        call: ContractCall,
        cancel: &Cancel,
    ) -> Result<TxReceipt, ChainError> {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let mut state = self.state.lock();
        state.submitted.push(call);
        if let Some(error) = state.submit_failures.pop_front() {
            return Err(error);
        }
        let number = state.tip_number() + 1;
        let parent_hash = state.tip_hash();
        let header = BlockHeader {
            hash: block_hash(number, parent_hash),
            parent_hash,
            number,
        };
        state.blocks.push(MockBlock {
            header,
            logs: Vec::new(),
        });
        Ok(TxReceipt {
            tx_hash: keccak_concat(&[header.hash.as_ref(), b"tx"]),
            block_hash: header.hash,
            block_number: number,
            succeeded: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> Address {
        Address([3u8; 20])
    }

    fn topic(byte: u8) -> Hash {
        Hash([byte; 32])
    }

    #[tokio::test]
    async fn subscription_replays_history_and_follows_tip() {
        let chain = MockChain::new();
        chain.push_log(contract(), vec![topic(1)], vec![0xA]);
        chain.push_log(contract(), vec![topic(1)], vec![0xB]);

        let cancel = Cancel::never();
        let filter = EventFilter {
            address: contract(),
            topics: vec![topic(1)],
        };
        let mut sub = chain
            .subscribe_events(filter, 2, &cancel)
            .await
            .unwrap();

        // Block 1 predates start_block = 2 and is not replayed.
        let replayed = sub.events.recv().await.unwrap();
        assert_eq!(replayed.data, vec![0xB]);

        chain.push_log(contract(), vec![topic(1)], vec![0xC]);
        let live = sub.events.recv().await.unwrap();
        assert_eq!(live.data, vec![0xC]);
        assert_eq!(live.block_number, 3);
    }

    #[tokio::test]
    async fn filters_drop_foreign_logs() {
        let chain = MockChain::new();
        let cancel = Cancel::never();
        let mut sub = chain
            .subscribe_events(
                EventFilter {
                    address: contract(),
                    topics: vec![topic(1)],
                },
                0,
                &cancel,
            )
            .await
            .unwrap();

        chain.push_log(Address([9u8; 20]), vec![topic(1)], vec![1]);
        chain.push_log(contract(), vec![topic(2)], vec![2]);
        chain.push_log(contract(), vec![topic(1)], vec![3]);

        let delivered = sub.events.recv().await.unwrap();
        assert_eq!(delivered.data, vec![3]);
    }

    #[tokio::test]
    async fn broken_subscriptions_surface_errors() {
        let chain = MockChain::new();
        let cancel = Cancel::never();
        let mut sub = chain
            .subscribe_events(
                EventFilter {
                    address: contract(),
                    topics: vec![],
                },
                0,
                &cancel,
            )
            .await
            .unwrap();

        chain.break_subscriptions("reorg past delivered log");
        let err = sub.errors.recv().await.unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn submissions_mine_and_record() {
        let chain = MockChain::new();
        let cancel = Cancel::never();

        chain.fail_next_submission(ChainError::Transient("nonce drift".into()));
        let err = chain
            .submit_transaction(ContractCall::AsserterTimeout, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let receipt = chain
            .submit_transaction(ContractCall::AsserterTimeout, &cancel)
            .await
            .unwrap();
        assert!(receipt.succeeded);
        assert_eq!(chain.submitted_calls().len(), 2);

        let header = chain
            .header_by_hash(receipt.block_hash, &cancel)
            .await
            .unwrap();
        assert_eq!(header.number, receipt.block_number);
    }
}
