//! The pending-top specialisation: a dispute over extending a linear hash
//! chain from a lower hash to a claimed top.

use std::sync::OnceLock;

use ramp_interface::chain::{ChainLog, ContractCall};
use ramp_interface::claims::{pendingtop_data_hash, TimeTicks};
use ramp_interface::hash::Hash;

use super::topics::challenge_topics;
use super::wire::{decode_payload, ContinuedChallengePayload, PendingTopBisectionPayload};
use super::{
    bisection_step_count, BisectionChallenge, ChallengeError, ChallengeEvent, ChallengeVariant,
};

/// A decoded pending-top bisection.
#[derive(Clone, Debug)]
pub struct PendingTopBisection {
    /// `N + 1` chain hashes; segment `i` claims that extending
    /// `chain_hashes[i]` yields `chain_hashes[i + 1]`.
    pub chain_hashes: Vec<Hash>,
    /// Length of the chain that was split.
    pub total_length: u64,
}

impl PendingTopBisection {
    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.chain_hashes.len().saturating_sub(1)
    }
}

/// Pending-top claim context: the disputed (lower, upper) chain window.
#[derive(Clone, Debug)]
pub struct PendingTopVariant {
    lower: Hash,
    upper: Hash,
}

impl PendingTopVariant {
    /// Context for a dispute over extending `lower` to `upper`.
    pub fn new(lower: Hash, upper: Hash) -> Self {
        Self { lower, upper }
    }

    /// The disputed window.
    pub fn window(&self) -> (Hash, Hash) {
        (self.lower, self.upper)
    }
}

/// A freshly instantiated pending-top challenge over a chain of
/// `chain_length` entries.
pub fn new_pending_top_challenge(
    lower: Hash,
    upper: Hash,
    chain_length: u64,
    deadline: TimeTicks,
) -> BisectionChallenge<PendingTopVariant> {
    let claim_hash = pendingtop_data_hash(lower, upper, chain_length);
    BisectionChallenge::new(
        PendingTopVariant::new(lower, upper),
        claim_hash,
        chain_length,
        deadline,
    )
}

impl ChallengeVariant for PendingTopVariant {
    type Bisection = PendingTopBisection;
    /// The single value whose insertion settles a one-step dispute.
    type OneStepData = Hash;

    fn expected_topics() -> &'static [Hash] {
        static TOPICS: OnceLock<[Hash; 5]> = OnceLock::new();
        TOPICS
            .get_or_init(|| {
                let topics = challenge_topics();
                [
                    topics.pending_top_bisected,
                    topics.continued_challenge,
                    topics.one_step_proof_completed,
                    topics.asserter_timed_out,
                    topics.challenger_timed_out,
                ]
            })
            .as_slice()
    }

    fn decode_event(log: &ChainLog) -> Result<ChallengeEvent<PendingTopBisection>, ChallengeError> {
        let topics = challenge_topics();
        let Some(topic) = log.topics.first() else {
            return Err(ChallengeError::MalformedEvent("log with no topics".into()));
        };
        if *topic == topics.pending_top_bisected {
            let payload: PendingTopBisectionPayload = decode_payload("Bisected", &log.data)?;
            Ok(ChallengeEvent::Bisected {
                bisection: PendingTopBisection {
                    chain_hashes: payload.chain_hashes,
                    total_length: payload.total_length,
                },
                deadline: payload.deadline,
            })
        } else if *topic == topics.continued_challenge {
            let payload: ContinuedChallengePayload =
                decode_payload("ContinuedChallenge", &log.data)?;
            Ok(ChallengeEvent::SegmentChosen {
                index: payload.segment_index,
                deadline: payload.deadline,
            })
        } else if *topic == topics.one_step_proof_completed {
            Ok(ChallengeEvent::OneStepProofCompleted)
        } else if *topic == topics.asserter_timed_out {
            Ok(ChallengeEvent::AsserterTimedOut)
        } else if *topic == topics.challenger_timed_out {
            Ok(ChallengeEvent::ChallengerTimedOut)
        } else {
            Err(ChallengeError::UnknownEvent(*topic))
        }
    }

    fn validate_bisection(&self, bisection: &PendingTopBisection) -> Result<(), ChallengeError> {
        let segments = bisection.segment_count();
        if segments == 0 {
            return Err(ChallengeError::MalformedBisection(
                "a bisection needs at least one segment".into(),
            ));
        }
        if bisection.chain_hashes[0] != self.lower
            || bisection.chain_hashes[segments] != self.upper
        {
            return Err(ChallengeError::BoundaryMismatch);
        }
        Ok(())
    }

    fn segment_count(bisection: &PendingTopBisection) -> usize {
        bisection.segment_count()
    }

    fn segment_step_count(bisection: &PendingTopBisection, index: usize) -> u64 {
        bisection_step_count(
            index as u64,
            bisection.segment_count() as u64,
            bisection.total_length,
        )
    }

    fn segment_hashes(&self, bisection: &PendingTopBisection) -> Vec<Hash> {
        let segments = bisection.segment_count();
        (0..segments)
            .map(|i| {
                pendingtop_data_hash(
                    bisection.chain_hashes[i],
                    bisection.chain_hashes[i + 1],
                    Self::segment_step_count(bisection, i),
                )
            })
            .collect()
    }

    fn apply_segment_choice(&mut self, bisection: &PendingTopBisection, index: usize) {
        self.lower = bisection.chain_hashes[index];
        self.upper = bisection.chain_hashes[index + 1];
    }

    fn bisect_call(&self, bisection: &PendingTopBisection) -> ContractCall {
        ContractCall::Bisect {
            chain_hashes: bisection.chain_hashes.clone(),
            chain_length: bisection.total_length,
        }
    }

    fn one_step_call(&self, value: Hash) -> ContractCall {
        ContractCall::OneStepProofPendingTop {
            lower_hash: self.lower,
            top_hash: self.upper,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use borsh::BorshSerialize;
    use ramp_interface::hash::extend_accumulator;

    use super::*;
    use crate::challenge::ChallengeState;

    fn h(byte: u8) -> Hash {
        Hash([byte; 32])
    }

    /// A real hash chain: each link extends the accumulator by one value.
    fn chain(start: Hash, links: usize) -> Vec<Hash> {
        let mut hashes = vec![start];
        for i in 0..links {
            let prev = *hashes.last().unwrap();
            hashes.push(extend_accumulator(prev, h(0x50 + i as u8)));
        }
        hashes
    }

    #[test]
    fn segment_hashes_recurse_to_the_chosen_window() {
        let hashes = chain(h(0x01), 4);
        let (lower, upper) = (hashes[0], hashes[4]);
        let mut challenge = new_pending_top_challenge(lower, upper, 100, TimeTicks(10));

        let bisection = PendingTopBisection {
            chain_hashes: hashes.clone(),
            total_length: 100,
        };
        let segment_hashes = challenge.variant().segment_hashes(&bisection);
        assert_eq!(segment_hashes.len(), 4);
        assert_eq!(
            segment_hashes[0],
            pendingtop_data_hash(hashes[0], hashes[1], 25)
        );

        challenge
            .apply_event(ChallengeEvent::Bisected {
                bisection,
                deadline: TimeTicks(20),
            })
            .unwrap();
        challenge
            .apply_event(ChallengeEvent::SegmentChosen {
                index: 3,
                deadline: TimeTicks(30),
            })
            .unwrap();

        assert_eq!(challenge.state(), ChallengeState::PendingAsserter);
        assert_eq!(challenge.current_claim_hash(), segment_hashes[3]);
        assert_eq!(challenge.current_step_count(), 25);
        assert_eq!(challenge.variant().window(), (hashes[3], hashes[4]));
    }

    #[test]
    fn uneven_chain_lengths_favour_leading_segments() {
        let hashes = chain(h(0x01), 3);
        let bisection = PendingTopBisection {
            chain_hashes: hashes,
            total_length: 10,
        };
        let counts: Vec<u64> = (0..3)
            .map(|i| PendingTopVariant::segment_step_count(&bisection, i))
            .collect();
        assert_eq!(counts, vec![4, 3, 3]);
    }

    #[test]
    fn windows_outside_the_dispute_are_rejected() {
        let hashes = chain(h(0x01), 4);
        let variant = PendingTopVariant::new(hashes[0], hashes[4]);

        let foreign = PendingTopBisection {
            chain_hashes: chain(h(0x02), 4),
            total_length: 100,
        };
        assert!(matches!(
            variant.validate_bisection(&foreign),
            Err(ChallengeError::BoundaryMismatch)
        ));

        let empty = PendingTopBisection {
            chain_hashes: vec![hashes[0]],
            total_length: 100,
        };
        assert!(matches!(
            variant.validate_bisection(&empty),
            Err(ChallengeError::MalformedBisection(_))
        ));
    }

    #[test]
    fn wire_round_trip_decodes() {
        let payload = PendingTopBisectionPayload {
            chain_hashes: chain(h(0x01), 2),
            total_length: 64,
            deadline: TimeTicks(9),
        };
        let log = ChainLog {
            address: ramp_interface::hash::Address([1u8; 20]),
            topics: vec![challenge_topics().pending_top_bisected],
            data: payload.try_to_vec().unwrap(),
            block_hash: h(0xAA),
            block_number: 3,
            tx_hash: h(0xBB),
        };
        match PendingTopVariant::decode_event(&log).unwrap() {
            ChallengeEvent::Bisected { bisection, deadline } => {
                assert_eq!(bisection.chain_hashes, payload.chain_hashes);
                assert_eq!(bisection.total_length, 64);
                assert_eq!(deadline, TimeTicks(9));
            }
            other => panic!("expected Bisected, got {other:?}"),
        }
    }
}
