//! Canonical event-payload layouts.
//!
//! Chain adapters normalise the contracts' ABI tuples into these borsh
//! layouts before handing logs over; the variants only ever decode this
//! form. Field order matches the on-chain argument tuples.

use borsh::{BorshDeserialize, BorshSerialize};
use ramp_interface::claims::TimeTicks;
use ramp_interface::hash::Hash;

use super::ChallengeError;

/// `BisectedAssertion` payload: boundary arrays of an execution bisection.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct ExecutionBisectionPayload {
    /// `N + 1` machine state hashes.
    pub machine_hashes: Vec<Hash>,
    /// Per-segment inbox flags, length `N`.
    pub did_inbox_insns: Vec<bool>,
    /// `N + 1` message accumulators.
    pub message_accs: Vec<Hash>,
    /// `N + 1` log accumulators.
    pub log_accs: Vec<Hash>,
    /// Per-segment gas, length `N`.
    pub gases: Vec<u64>,
    /// Step total of the claim that was split.
    pub total_steps: u32,
    /// New deadline for the challenger.
    pub deadline: TimeTicks,
}

/// `Bisected` payload: a pending-top bisection.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct PendingTopBisectionPayload {
    /// `N + 1` chain hashes.
    pub chain_hashes: Vec<Hash>,
    /// Length of the chain that was split.
    pub total_length: u64,
    /// New deadline for the challenger.
    pub deadline: TimeTicks,
}

/// `ContinuedChallenge` payload: the challenger's pick.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct ContinuedChallengePayload {
    /// Index of the contested segment.
    pub segment_index: u16,
    /// New deadline for the asserter.
    pub deadline: TimeTicks,
}

pub(crate) fn decode_payload<T: BorshDeserialize>(
    event: &'static str,
    data: &[u8],
) -> Result<T, ChallengeError> {
    T::try_from_slice(data)
        .map_err(|err| ChallengeError::MalformedEvent(format!("{event}: {err}")))
}
