//! Event-topic constants.
//!
//! Topic identifiers are the keccak-256 of the canonical Solidity event
//! signatures, computed once at first use and frozen. This is the only
//! process-wide state in the crate.

use std::sync::OnceLock;

use ramp_interface::hash::{keccak, Hash};

/// The challenge contracts' event vocabulary.
#[derive(Debug)]
pub struct ChallengeTopics {
    /// `BisectedAssertion(...)` — execution bisection posted.
    pub bisected_assertion: Hash,
    /// `Bisected(...)` — pending-top bisection posted.
    pub pending_top_bisected: Hash,
    /// `ContinuedChallenge(...)` — challenger picked a segment.
    pub continued_challenge: Hash,
    /// `OneStepProofCompleted()` — dispute settled by proof.
    pub one_step_proof_completed: Hash,
    /// `AsserterTimedOut()`.
    pub asserter_timed_out: Hash,
    /// `ChallengerTimedOut()`.
    pub challenger_timed_out: Hash,
}

/// The process-wide topic table.
pub fn challenge_topics() -> &'static ChallengeTopics {
    static TOPICS: OnceLock<ChallengeTopics> = OnceLock::new();
    TOPICS.get_or_init(|| ChallengeTopics {
        bisected_assertion: keccak(
            b"BisectedAssertion(bytes32[],bool[],bytes32[],bytes32[],uint64[],uint32,uint256)",
        ),
        pending_top_bisected: keccak(b"Bisected(bytes32[],uint256,uint256)"),
        continued_challenge: keccak(b"ContinuedChallenge(uint256,uint256)"),
        one_step_proof_completed: keccak(b"OneStepProofCompleted()"),
        asserter_timed_out: keccak(b"AsserterTimedOut()"),
        challenger_timed_out: keccak(b"ChallengerTimedOut()"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_distinct_and_stable() {
        let topics = challenge_topics();
        let all = [
            topics.bisected_assertion,
            topics.pending_top_bisected,
            topics.continued_challenge,
            topics.one_step_proof_completed,
            topics.asserter_timed_out,
            topics.challenger_timed_out,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        // Same table on every call.
        assert_eq!(
            challenge_topics().bisected_assertion,
            challenge_topics().bisected_assertion
        );
    }
}
