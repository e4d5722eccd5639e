//! The execution-claim specialisation: a dispute over running `total_steps`
//! machine steps from a precondition, with message/log accumulators and gas.

use std::sync::OnceLock;

use ramp_interface::chain::{ChainLog, ContractCall};
use ramp_interface::claims::{
    execution_data_hash, ExecutionAssertionStub, Precondition, TimeTicks,
};
use ramp_interface::hash::Hash;

use super::topics::challenge_topics;
use super::wire::{decode_payload, ContinuedChallengePayload, ExecutionBisectionPayload};
use super::{
    bisection_step_count, BisectionChallenge, ChallengeError, ChallengeEvent, ChallengeVariant,
};

/// A decoded execution bisection. The event carries boundary arrays; the
/// `N` per-segment claims are reconstructed windows over them.
#[derive(Clone, Debug)]
pub struct ExecutionBisection {
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
}

impl ExecutionBisection {
    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.machine_hashes.len().saturating_sub(1)
    }

    /// The claim asserted by segment `index`.
    pub fn assertion(&self, index: usize) -> ExecutionAssertionStub {
        ExecutionAssertionStub {
            after_hash: self.machine_hashes[index + 1],
            did_inbox_insn: self.did_inbox_insns[index],
            num_gas: self.gases[index],
            first_message_hash: self.message_accs[index],
            last_message_hash: self.message_accs[index + 1],
            first_log_hash: self.log_accs[index],
            last_log_hash: self.log_accs[index + 1],
        }
    }
}

/// Assemble the boundary arrays the contract expects from per-segment
/// claims, the way the asserter posts a bisection.
pub fn bisection_from_assertions(
    precondition: &Precondition,
    assertions: &[ExecutionAssertionStub],
    total_steps: u32,
) -> ExecutionBisection {
    let mut machine_hashes = Vec::with_capacity(assertions.len() + 1);
    let mut message_accs = Vec::with_capacity(assertions.len() + 1);
    let mut log_accs = Vec::with_capacity(assertions.len() + 1);
    let mut did_inbox_insns = Vec::with_capacity(assertions.len());
    let mut gases = Vec::with_capacity(assertions.len());

    machine_hashes.push(precondition.before_hash);
    if let Some(first) = assertions.first() {
        message_accs.push(first.first_message_hash);
        log_accs.push(first.first_log_hash);
    }
    for assertion in assertions {
        machine_hashes.push(assertion.after_hash);
        message_accs.push(assertion.last_message_hash);
        log_accs.push(assertion.last_log_hash);
        did_inbox_insns.push(assertion.did_inbox_insn);
        gases.push(assertion.num_gas);
    }

    ExecutionBisection {
        machine_hashes,
        did_inbox_insns,
        message_accs,
        log_accs,
        gases,
        total_steps,
    }
}

/// Execution-claim context: the precondition/claim pair currently under
/// dispute. Advances as segments are chosen.
#[derive(Clone, Debug)]
pub struct ExecutionVariant {
    precondition: Precondition,
    claim: ExecutionAssertionStub,
}

impl ExecutionVariant {
    /// Context for a dispute over `claim` starting from `precondition`.
    pub fn new(precondition: Precondition, claim: ExecutionAssertionStub) -> Self {
        Self {
            precondition,
            claim,
        }
    }

    /// The disputed precondition.
    pub fn precondition(&self) -> &Precondition {
        &self.precondition
    }

    /// The disputed claim.
    pub fn claim(&self) -> &ExecutionAssertionStub {
        &self.claim
    }

    /// The segment-claim digest committed on-chain for the current dispute.
    pub fn claim_data_hash(&self, step_count: u32) -> Hash {
        execution_data_hash(step_count, self.precondition.hash(), self.claim.hash())
    }
}

/// A freshly instantiated execution challenge over `claim`.
pub fn new_execution_challenge(
    precondition: Precondition,
    claim: ExecutionAssertionStub,
    total_steps: u32,
    deadline: TimeTicks,
) -> BisectionChallenge<ExecutionVariant> {
    let variant = ExecutionVariant::new(precondition, claim);
    let claim_hash = variant.claim_data_hash(total_steps);
    BisectionChallenge::new(variant, claim_hash, u64::from(total_steps), deadline)
}

impl ChallengeVariant for ExecutionVariant {
    type Bisection = ExecutionBisection;
    type OneStepData = Vec<u8>;

    fn expected_topics() -> &'static [Hash] {
        static TOPICS: OnceLock<[Hash; 5]> = OnceLock::new();
        TOPICS
            .get_or_init(|| {
                let topics = challenge_topics();
                [
                    topics.bisected_assertion,
                    topics.continued_challenge,
                    topics.one_step_proof_completed,
                    topics.asserter_timed_out,
                    topics.challenger_timed_out,
                ]
            })
            .as_slice()
    }

    fn decode_event(log: &ChainLog) -> Result<ChallengeEvent<ExecutionBisection>, ChallengeError> {
        let topics = challenge_topics();
        let Some(topic) = log.topics.first() else {
            return Err(ChallengeError::MalformedEvent("log with no topics".into()));
        };
        if *topic == topics.bisected_assertion {
            let payload: ExecutionBisectionPayload =
                decode_payload("BisectedAssertion", &log.data)?;
            Ok(ChallengeEvent::Bisected {
                bisection: ExecutionBisection {
                    machine_hashes: payload.machine_hashes,
                    did_inbox_insns: payload.did_inbox_insns,
                    message_accs: payload.message_accs,
                    log_accs: payload.log_accs,
                    gases: payload.gases,
                    total_steps: payload.total_steps,
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

    fn validate_bisection(&self, bisection: &ExecutionBisection) -> Result<(), ChallengeError> {
        let segments = bisection.segment_count();
        if segments == 0 {
            return Err(ChallengeError::MalformedBisection(
                "a bisection needs at least one segment".into(),
            ));
        }
        if bisection.message_accs.len() != segments + 1
            || bisection.log_accs.len() != segments + 1
            || bisection.did_inbox_insns.len() != segments
            || bisection.gases.len() != segments
        {
            return Err(ChallengeError::MalformedBisection(format!(
                "array lengths disagree: {} machine hashes, {} message accs, {} log accs, {} inbox flags, {} gas entries",
                bisection.machine_hashes.len(),
                bisection.message_accs.len(),
                bisection.log_accs.len(),
                bisection.did_inbox_insns.len(),
                bisection.gases.len(),
            )));
        }

        let boundary_ok = bisection.machine_hashes[0] == self.precondition.before_hash
            && bisection.machine_hashes[segments] == self.claim.after_hash
            && bisection.message_accs[0] == self.claim.first_message_hash
            && bisection.message_accs[segments] == self.claim.last_message_hash
            && bisection.log_accs[0] == self.claim.first_log_hash
            && bisection.log_accs[segments] == self.claim.last_log_hash;
        if !boundary_ok {
            return Err(ChallengeError::BoundaryMismatch);
        }
        Ok(())
    }

    fn segment_count(bisection: &ExecutionBisection) -> usize {
        bisection.segment_count()
    }

    fn segment_step_count(bisection: &ExecutionBisection, index: usize) -> u64 {
        bisection_step_count(
            index as u64,
            bisection.segment_count() as u64,
            u64::from(bisection.total_steps),
        )
    }

    fn segment_hashes(&self, bisection: &ExecutionBisection) -> Vec<Hash> {
        let segments = bisection.segment_count();
        (0..segments)
            .map(|i| {
                let step_count = Self::segment_step_count(bisection, i) as u32;
                let precondition = self
                    .precondition
                    .with_before_hash(bisection.machine_hashes[i]);
                execution_data_hash(
                    step_count,
                    precondition.hash(),
                    bisection.assertion(i).hash(),
                )
            })
            .collect()
    }

    fn apply_segment_choice(&mut self, bisection: &ExecutionBisection, index: usize) {
        self.precondition = self
            .precondition
            .with_before_hash(bisection.machine_hashes[index]);
        self.claim = bisection.assertion(index);
    }

    fn bisect_call(&self, bisection: &ExecutionBisection) -> ContractCall {
        ContractCall::BisectAssertion {
            before_inbox: self.precondition.before_inbox,
            time_bounds: self.precondition.time_bounds,
            machine_hashes: bisection.machine_hashes.clone(),
            did_inbox_insns: bisection.did_inbox_insns.clone(),
            message_accs: bisection.message_accs.clone(),
            log_accs: bisection.log_accs.clone(),
            gases: bisection.gases.clone(),
            total_steps: bisection.total_steps,
        }
    }

    fn one_step_call(&self, proof: Vec<u8>) -> ContractCall {
        ContractCall::OneStepProof {
            before_hash: self.precondition.before_hash,
            before_inbox: self.precondition.before_inbox,
            time_bounds: self.precondition.time_bounds,
            assertion: self.claim,
            proof,
        }
    }
}

#[cfg(test)]
mod tests {
    use borsh::BorshSerialize;
    use ramp_interface::claims::TimeBounds;
    use ramp_interface::hash::keccak;

    use super::*;
    use crate::challenge::ChallengeState;

    fn h(byte: u8) -> Hash {
        Hash([byte; 32])
    }

    fn precondition() -> Precondition {
        Precondition {
            before_hash: h(0x01),
            before_inbox: h(0x10),
            time_bounds: TimeBounds {
                lower: 100,
                upper: 200,
            },
        }
    }

    /// Per-segment claims for a synthetic run: machine hash and accumulators
    /// advance by hashing the segment index in.
    fn segments(count: usize, first_machine: Hash, last_machine: Hash) -> Vec<ExecutionAssertionStub> {
        let mut machine = first_machine;
        let mut msg_acc = Hash::zero();
        let mut log_acc = Hash::zero();
        (0..count)
            .map(|i| {
                let after = if i + 1 == count {
                    last_machine
                } else {
                    keccak(&[machine.0[0], i as u8])
                };
                let next_msg = keccak(&[0x30 + i as u8]);
                let stub = ExecutionAssertionStub {
                    after_hash: after,
                    did_inbox_insn: i % 2 == 0,
                    num_gas: 1000 + i as u64,
                    first_message_hash: msg_acc,
                    last_message_hash: next_msg,
                    first_log_hash: log_acc,
                    last_log_hash: keccak(&[0x40 + i as u8]),
                };
                machine = after;
                msg_acc = stub.last_message_hash;
                log_acc = stub.last_log_hash;
                stub
            })
            .collect()
    }

    fn outer_claim(parts: &[ExecutionAssertionStub]) -> ExecutionAssertionStub {
        let first = parts.first().unwrap();
        let last = parts.last().unwrap();
        ExecutionAssertionStub {
            after_hash: last.after_hash,
            did_inbox_insn: parts.iter().any(|a| a.did_inbox_insn),
            num_gas: parts.iter().map(|a| a.num_gas).sum(),
            first_message_hash: first.first_message_hash,
            last_message_hash: last.last_message_hash,
            first_log_hash: first.first_log_hash,
            last_log_hash: last.last_log_hash,
        }
    }

    #[test]
    fn bisection_500_into_4_even_segments() {
        let parts = segments(4, h(0x01), h(0x02));
        let claim = outer_claim(&parts);
        let mut challenge = new_execution_challenge(precondition(), claim, 500, TimeTicks(10));

        let bisection = bisection_from_assertions(&precondition(), &parts, 500);
        let hashes = challenge.variant().segment_hashes(&bisection);
        assert_eq!(hashes.len(), 4);

        // What the on-chain verifier recomputes from the posted arrays.
        let expected: Vec<Hash> = (0..4)
            .map(|i| {
                let pre = precondition().with_before_hash(bisection.machine_hashes[i]);
                execution_data_hash(125, pre.hash(), parts[i].hash())
            })
            .collect();
        assert_eq!(hashes, expected);

        challenge
            .apply_event(ChallengeEvent::Bisected {
                bisection,
                deadline: TimeTicks(20),
            })
            .unwrap();
        assert_eq!(challenge.state(), ChallengeState::PendingChallenger);
    }

    #[test]
    fn bisection_503_distributes_remainder_to_leading_segments() {
        let parts = segments(4, h(0x01), h(0x02));
        let bisection = bisection_from_assertions(&precondition(), &parts, 503);
        let counts: Vec<u64> = (0..4)
            .map(|i| ExecutionVariant::segment_step_count(&bisection, i))
            .collect();
        assert_eq!(counts, vec![126, 126, 126, 125]);
        assert_eq!(counts.iter().sum::<u64>(), 503);
    }

    #[test]
    fn chosen_segment_becomes_the_new_claim() {
        let parts = segments(4, h(0x01), h(0x02));
        let claim = outer_claim(&parts);
        let mut challenge = new_execution_challenge(precondition(), claim, 500, TimeTicks(10));
        let bisection = bisection_from_assertions(&precondition(), &parts, 500);
        let hashes = challenge.variant().segment_hashes(&bisection);

        challenge
            .apply_event(ChallengeEvent::Bisected {
                bisection,
                deadline: TimeTicks(20),
            })
            .unwrap();
        challenge
            .apply_event(ChallengeEvent::SegmentChosen {
                index: 2,
                deadline: TimeTicks(30),
            })
            .unwrap();

        assert_eq!(challenge.state(), ChallengeState::PendingAsserter);
        assert_eq!(challenge.current_claim_hash(), hashes[2]);
        assert_eq!(challenge.current_step_count(), 125);
        // The advanced context reproduces the committed claim digest, so the
        // next bisection round recurses consistently.
        assert_eq!(challenge.variant().claim_data_hash(125), hashes[2]);
        assert_eq!(challenge.variant().claim(), &parts[2]);
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let parts = segments(4, h(0x01), h(0x02));
        let claim = outer_claim(&parts);
        let variant = ExecutionVariant::new(precondition(), claim);

        let mut short_gases = bisection_from_assertions(&precondition(), &parts, 500);
        short_gases.gases.pop();
        assert!(matches!(
            variant.validate_bisection(&short_gases),
            Err(ChallengeError::MalformedBisection(_))
        ));

        let mut short_accs = bisection_from_assertions(&precondition(), &parts, 500);
        short_accs.log_accs.pop();
        assert!(matches!(
            variant.validate_bisection(&short_accs),
            Err(ChallengeError::MalformedBisection(_))
        ));
    }

    #[test]
    fn foreign_boundaries_are_rejected() {
        let parts = segments(4, h(0x01), h(0x02));
        let claim = outer_claim(&parts);
        let variant = ExecutionVariant::new(precondition(), claim);

        let mut wrong_tail = bisection_from_assertions(&precondition(), &parts, 500);
        *wrong_tail.machine_hashes.last_mut().unwrap() = h(0xEE);
        assert!(matches!(
            variant.validate_bisection(&wrong_tail),
            Err(ChallengeError::BoundaryMismatch)
        ));

        let mut wrong_acc = bisection_from_assertions(&precondition(), &parts, 500);
        wrong_acc.message_accs[0] = h(0xEF);
        assert!(matches!(
            variant.validate_bisection(&wrong_acc),
            Err(ChallengeError::BoundaryMismatch)
        ));
    }

    #[test]
    fn wire_round_trip_decodes() {
        let parts = segments(2, h(0x01), h(0x02));
        let bisection = bisection_from_assertions(&precondition(), &parts, 10);
        let payload = ExecutionBisectionPayload {
            machine_hashes: bisection.machine_hashes.clone(),
            did_inbox_insns: bisection.did_inbox_insns.clone(),
            message_accs: bisection.message_accs.clone(),
            log_accs: bisection.log_accs.clone(),
            gases: bisection.gases.clone(),
            total_steps: 10,
            deadline: TimeTicks(77),
        };
        let log = ChainLog {
            address: ramp_interface::hash::Address([1u8; 20]),
            topics: vec![challenge_topics().bisected_assertion],
            data: payload.try_to_vec().unwrap(),
            block_hash: h(0xAA),
            block_number: 5,
            tx_hash: h(0xBB),
        };
        match ExecutionVariant::decode_event(&log).unwrap() {
            ChallengeEvent::Bisected { bisection, deadline } => {
                assert_eq!(bisection.machine_hashes, payload.machine_hashes);
                assert_eq!(deadline, TimeTicks(77));
            }
            other => panic!("expected Bisected, got {other:?}"),
        }

        let unknown = ChainLog {
            topics: vec![h(0xFE)],
            ..log
        };
        assert!(matches!(
            ExecutionVariant::decode_event(&unknown),
            Err(ChallengeError::UnknownEvent(_))
        ));
    }
}
