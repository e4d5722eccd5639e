//! Claim encodings for the two dispute families and their normative digests.
//!
//! The byte layouts below are the only representation the on-chain verifier
//! ever sees. They are frozen: integers are big-endian, booleans are a single
//! byte, and the pending-top step count is widened to the 32-byte ABI word.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::hash::{keccak_concat, Hash};

/// A settlement-chain-denominated deadline.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Debug,
    Default,
    Serialize,
    Deserialize,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct TimeTicks(pub u64);

/// Inclusive window of chain time in which an assertion is valid.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct TimeBounds {
    /// Earliest valid tick.
    pub lower: u64,
    /// Latest valid tick.
    pub upper: u64,
}

/// The state an execution claim starts from.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
pub struct Precondition {
    /// Machine state hash before the claimed steps.
    pub before_hash: Hash,
    /// Inbox accumulator before the claimed steps.
    pub before_inbox: Hash,
    /// Validity window of the claim.
    pub time_bounds: TimeBounds,
}

impl Precondition {
    /// Structural hash: `keccak(before_hash ‖ before_inbox ‖ be64(lo) ‖ be64(hi))`.
    pub fn hash(&self) -> Hash {
        keccak_concat(&[
            self.before_hash.as_ref(),
            self.before_inbox.as_ref(),
            &self.time_bounds.lower.to_be_bytes(),
            &self.time_bounds.upper.to_be_bytes(),
        ])
    }

    /// The precondition of a segment that begins at `machine_hash`, inside
    /// the same inbox and time window.
    pub fn with_before_hash(&self, machine_hash: Hash) -> Precondition {
        Precondition {
            before_hash: machine_hash,
            ..*self
        }
    }
}

/// The claim that executing some number of steps from a precondition yields
/// the recorded machine state and accumulator tips.
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct ExecutionAssertionStub {
    /// Machine state hash after the steps.
    pub after_hash: Hash,
    /// Whether any step consumed the inbox.
    pub did_inbox_insn: bool,
    /// Gas consumed by the steps.
    pub num_gas: u64,
    /// Outgoing-message accumulator before the steps.
    pub first_message_hash: Hash,
    /// Outgoing-message accumulator after the steps.
    pub last_message_hash: Hash,
    /// Emitted-log accumulator before the steps.
    pub first_log_hash: Hash,
    /// Emitted-log accumulator after the steps.
    pub last_log_hash: Hash,
}

impl ExecutionAssertionStub {
    /// Structural hash over all fields, in declaration order.
    pub fn hash(&self) -> Hash {
        keccak_concat(&[
            self.after_hash.as_ref(),
            &[u8::from(self.did_inbox_insn)],
            &self.num_gas.to_be_bytes(),
            self.first_message_hash.as_ref(),
            self.last_message_hash.as_ref(),
            self.first_log_hash.as_ref(),
            self.last_log_hash.as_ref(),
        ])
    }
}

/// The segment claim committed on-chain for execution bisection.
pub fn execution_data_hash(step_count: u32, pre_hash: Hash, claim_hash: Hash) -> Hash {
    keccak_concat(&[
        &step_count.to_be_bytes(),
        pre_hash.as_ref(),
        claim_hash.as_ref(),
    ])
}

/// The segment claim committed on-chain for pending-top bisection. The step
/// count occupies a full ABI word.
pub fn pendingtop_data_hash(lower: Hash, upper: Hash, step_count: u64) -> Hash {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&step_count.to_be_bytes());
    keccak_concat(&[lower.as_ref(), upper.as_ref(), &word])
}
