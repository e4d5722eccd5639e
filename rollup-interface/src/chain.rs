//! The seam to the settlement chain.
//!
//! A [`ChainAdapter`] is the local side of an RPC connection to a settlement
//! chain node. The transport (and credential handling) live behind this
//! trait; everything in front of it is deterministic protocol logic.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cancel::Cancel;
use crate::claims::{ExecutionAssertionStub, TimeBounds};
use crate::hash::{Address, Hash};

/// A settlement-chain block header, reduced to what the validator needs.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    /// Canonical hash of the block.
    pub hash: Hash,
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Block number.
    pub number: u64,
}

/// A single contract log, with its provenance.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChainLog {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics; `topics[0]` identifies the event.
    pub topics: Vec<Hash>,
    /// ABI-encoded payload.
    pub data: Vec<u8>,
    /// Hash of the block that carries the log.
    pub block_hash: Hash,
    /// Number of the block that carries the log.
    pub block_number: u64,
    /// Hash of the emitting transaction.
    pub tx_hash: Hash,
}

/// Which logs a subscription should deliver.
#[derive(Clone, Debug)]
pub struct EventFilter {
    /// Contract address to watch.
    pub address: Address,
    /// Accepted event topics (`topics[0]` candidates). Empty matches all.
    pub topics: Vec<Hash>,
}

impl EventFilter {
    /// Whether `log` passes this filter.
    pub fn matches(&self, log: &ChainLog) -> bool {
        if log.address != self.address {
            return false;
        }
        match log.topics.first() {
            Some(topic) => self.topics.is_empty() || self.topics.contains(topic),
            None => false,
        }
    }
}

/// A live event subscription: logs in block order plus an error side-channel.
///
/// The adapter never retracts a delivered log silently. When the chain
/// reorganises past a delivered log, the adapter pushes a
/// [`ChainError::Transient`] onto `errors` and the consumer restarts the
/// subscription, replaying from its last safe block.
#[derive(Debug)]
pub struct EventSubscription {
    /// Logs in block order, starting at the requested block (inclusive).
    pub events: mpsc::Receiver<ChainLog>,
    /// Subscription-fatal errors (transport loss, retraction).
    pub errors: mpsc::Receiver<ChainError>,
}

/// Outcome of a mined transaction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TxReceipt {
    /// Hash of the mined transaction.
    pub tx_hash: Hash,
    /// Block that included it.
    pub block_hash: Hash,
    /// Number of that block.
    pub block_number: u64,
    /// Whether execution succeeded.
    pub succeeded: bool,
}

/// A typed challenge-contract call. The wire (ABI) encoding is owned by the
/// adapter; the call-data it produces is bit-exact per the contract ABI.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ContractCall {
    /// Execution bisection: split the current claim into `N` segments.
    BisectAssertion {
        /// Inbox accumulator of the outer precondition.
        before_inbox: Hash,
        /// Validity window of the outer precondition.
        time_bounds: TimeBounds,
        /// `N + 1` machine state hashes.
        machine_hashes: Vec<Hash>,
        /// Per-segment inbox-consumption flags, length `N`.
        did_inbox_insns: Vec<bool>,
        /// `N + 1` message accumulators.
        message_accs: Vec<Hash>,
        /// `N + 1` log accumulators.
        log_accs: Vec<Hash>,
        /// Per-segment gas, length `N`.
        gases: Vec<u64>,
        /// Step total of the claim being split.
        total_steps: u32,
    },
    /// Pending-top bisection: split a hash chain.
    Bisect {
        /// `N + 1` chain hashes.
        chain_hashes: Vec<Hash>,
        /// Length of the chain being split.
        chain_length: u64,
    },
    /// Challenger picks the disputed segment.
    ChooseSegment {
        /// Index of the contested segment.
        index: u16,
        /// The full segment-hash array, recomputed locally.
        segment_hashes: Vec<Hash>,
    },
    /// Execution one-step proof, settling a single-step claim.
    OneStepProof {
        /// Machine state hash before the step.
        before_hash: Hash,
        /// Inbox accumulator before the step.
        before_inbox: Hash,
        /// Validity window.
        time_bounds: TimeBounds,
        /// The single-step claim being proven.
        assertion: ExecutionAssertionStub,
        /// Opaque proof bytes produced by the VM subsystem.
        proof: Vec<u8>,
    },
    /// Pending-top one-step proof (lower/top/value form).
    OneStepProofPendingTop {
        /// Chain hash below the disputed extension.
        lower_hash: Hash,
        /// Claimed chain hash after the extension.
        top_hash: Hash,
        /// The single value whose insertion is being proven.
        value: Hash,
    },
    /// Claim victory: the asserter's deadline passed without a move.
    AsserterTimeout,
    /// Claim victory: the challenger's deadline passed without a move.
    ChallengerTimeout,
}

impl ContractCall {
    /// Contract method name, for logs and revert classification.
    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::BisectAssertion { .. } => "bisectAssertion",
            ContractCall::Bisect { .. } => "bisect",
            ContractCall::ChooseSegment { .. } => "chooseSegment",
            ContractCall::OneStepProof { .. } => "oneStepProof",
            ContractCall::OneStepProofPendingTop { .. } => "oneStepProof",
            ContractCall::AsserterTimeout => "asserterTimedOut",
            ContractCall::ChallengerTimeout => "challengerTimedOut",
        }
    }
}

/// Errors surfaced by a [`ChainAdapter`].
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Network trouble, reorg mid-request, or any other condition worth
    /// retrying with the same arguments.
    #[error("transient chain error: {0}")]
    Transient(String),
    /// The transaction was mined but reverted.
    #[error("{method} reverted: {reason}")]
    Reverted {
        /// Contract method that reverted.
        method: &'static str,
        /// Revert reason as reported by the node.
        reason: String,
    },
    /// No receipt was observed within the adapter's wall-clock budget.
    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(&'static str),
    /// The requested entity does not exist.
    #[error("not found")]
    NotFound,
    /// The operation was cancelled via its token.
    #[error("cancelled")]
    Cancelled,
    /// The event subscription ended.
    #[error("event subscription closed")]
    SubscriptionClosed,
}

impl ChainError {
    /// Whether resubmitting with identical arguments may succeed.
    ///
    /// Reverts caused by nonce drift or gas underestimation are reported by
    /// nodes with recognisable reasons; everything else fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            ChainError::Transient(_) | ChainError::ReceiptTimeout(_) => true,
            ChainError::Reverted { reason, .. } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("nonce") || reason.contains("underpriced") || reason.contains("gas")
            }
            _ => false,
        }
    }
}

/// The local side of a settlement-chain connection.
///
/// All operations accept a cancellation token and fail promptly with
/// [`ChainError::Cancelled`] once it fires, performing no further side
/// effects.
#[async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
    /// Open a lazy, block-ordered log subscription starting at `start_block`
    /// (inclusive). A log may be emitted again only if it was previously
    /// retracted through the error channel.
    async fn subscribe_events(
        &self,
        filter: EventFilter,
        start_block: u64,
        cancel: &Cancel,
    ) -> Result<EventSubscription, ChainError>;

    /// Look up a header by block hash.
    async fn header_by_hash(&self, hash: Hash, cancel: &Cancel) -> Result<BlockHeader, ChainError>;

    /// Submit a transaction and wait for it to be mined. Returns only after
    /// the receipt status is observed; mining timeout and revert are errors.
    async fn submit_transaction(
        &self,
        call: ContractCall,
        cancel: &Cancel,
    ) -> Result<TxReceipt, ChainError>;
}
