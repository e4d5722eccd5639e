//! The two-party bisection challenge.
//!
//! One generic, turn-based state machine ([`BisectionChallenge`]) is
//! instantiated per dispute family through a [`ChallengeVariant`]: execution
//! claims (machine steps with accumulators and gas) and pending-top claims
//! (a linear hash chain). The machine itself never talks to the chain; the
//! [`driver`] owns the subscription and submits moves.

use std::fmt;

use ramp_interface::chain::{ChainLog, ContractCall};
use ramp_interface::claims::TimeTicks;
use ramp_interface::hash::Hash;
use tracing::debug;

pub mod driver;
pub mod execution;
pub mod pending_top;
pub mod topics;
pub mod wire;

/// The two sides of a dispute.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    /// Defends the claim under dispute.
    Asserter,
    /// Attacks it.
    Challenger,
}

impl Role {
    /// The other side.
    pub fn opponent(self) -> Role {
        match self {
            Role::Asserter => Role::Challenger,
            Role::Challenger => Role::Asserter,
        }
    }
}

/// Where a challenge stands. Completed states are terminal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChallengeState {
    /// The asserter must bisect or one-step-prove before the deadline.
    PendingAsserter,
    /// The challenger must pick a segment or concede before the deadline.
    PendingChallenger,
    /// Terminal: the asserter won.
    CompletedAsserterWins,
    /// Terminal: the challenger won.
    CompletedChallengerWins,
}

impl ChallengeState {
    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChallengeState::CompletedAsserterWins | ChallengeState::CompletedChallengerWins
        )
    }

    /// Which role must move, if any.
    pub fn on_turn(self) -> Option<Role> {
        match self {
            ChallengeState::PendingAsserter => Some(Role::Asserter),
            ChallengeState::PendingChallenger => Some(Role::Challenger),
            _ => None,
        }
    }
}

/// A decoded challenge-contract event, generic over the variant's bisection
/// payload.
#[derive(Clone, Debug)]
pub enum ChallengeEvent<B> {
    /// The asserter split the current claim into segments.
    Bisected {
        /// The variant-specific bisection payload.
        bisection: B,
        /// New deadline for the challenger.
        deadline: TimeTicks,
    },
    /// The challenger picked the disputed segment.
    SegmentChosen {
        /// Index of the contested segment.
        index: u16,
        /// New deadline for the asserter.
        deadline: TimeTicks,
    },
    /// A one-step proof settled the dispute.
    OneStepProofCompleted,
    /// The asserter missed a deadline.
    AsserterTimedOut,
    /// The challenger missed a deadline.
    ChallengerTimedOut,
}

impl<B> ChallengeEvent<B> {
    fn kind(&self) -> &'static str {
        match self {
            ChallengeEvent::Bisected { .. } => "Bisected",
            ChallengeEvent::SegmentChosen { .. } => "SegmentChosen",
            ChallengeEvent::OneStepProofCompleted => "OneStepProofCompleted",
            ChallengeEvent::AsserterTimedOut => "AsserterTimedOut",
            ChallengeEvent::ChallengerTimedOut => "ChallengerTimedOut",
        }
    }
}

/// Protocol violations and rejected moves. All of these are fatal to the
/// challenge task; only the chain layer has retryable failures.
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    /// An event with a topic outside the variant's vocabulary.
    #[error("unknown event topic {0}")]
    UnknownEvent(Hash),
    /// An event with a recognised topic but an undecodable payload.
    #[error("malformed event payload: {0}")]
    MalformedEvent(String),
    /// A bisection whose arrays disagree with each other or with the claim.
    #[error("malformed bisection: {0}")]
    MalformedBisection(String),
    /// A bisection whose outer boundary differs from the disputed claim.
    #[error("bisection boundary does not extend the current claim")]
    BoundaryMismatch,
    /// A move (or observed event) out of turn.
    #[error("{attempted} is not legal in state {state:?}")]
    OffTurn {
        /// What was attempted.
        attempted: &'static str,
        /// The state it was attempted in.
        state: ChallengeState,
    },
    /// A segment index at or past the segment count.
    #[error("segment index {index} out of range for {segments} segments")]
    SegmentOutOfRange {
        /// The offending index.
        index: u16,
        /// Number of segments in the current bisection.
        segments: usize,
    },
    /// A one-step proof attempted while the claim spans several steps.
    #[error("one-step proof requires a single-step claim, current claim has {0} steps")]
    NotOneStep(u64),
    /// A timeout claim before the opponent's deadline.
    #[error("deadline {deadline:?} has not passed at {now:?}")]
    DeadlineNotPassed {
        /// The opponent's deadline.
        deadline: TimeTicks,
        /// The caller's view of chain time.
        now: TimeTicks,
    },
    /// Any move or event after completion.
    #[error("challenge is already complete")]
    Completed,
}

/// How many steps segment `index` of `segment_count` carries when `total`
/// steps are split. The remainder goes to the leading segments, so the step
/// counts sum to `total`. The on-chain verifier reconstructs segment hashes
/// with this same rule; the two sides must never disagree.
pub fn bisection_step_count(index: u64, segment_count: u64, total: u64) -> u64 {
    total / segment_count + u64::from(index < total % segment_count)
}

/// A dispute family: payload decoding, segment-hash reconstruction and the
/// contract calls that express moves on the wire.
pub trait ChallengeVariant: Clone + Send + Sync + 'static {
    /// The parsed bisection payload.
    type Bisection: Clone + fmt::Debug + Send + Sync + 'static;
    /// Variant-specific input to a one-step proof (the VM seam).
    type OneStepData: Send;

    /// Event topics this variant's contract can emit. Anything else is a
    /// fatal [`ChallengeError::UnknownEvent`].
    fn expected_topics() -> &'static [Hash];

    /// Decode a raw log. A recognised topic with an undecodable payload is a
    /// fatal [`ChallengeError::MalformedEvent`]; nothing is dispatched for it.
    fn decode_event(log: &ChainLog) -> Result<ChallengeEvent<Self::Bisection>, ChallengeError>;

    /// Check internal shape and the outer boundary against the disputed
    /// claim. Called both before submitting a bisection and when observing
    /// one.
    fn validate_bisection(&self, bisection: &Self::Bisection) -> Result<(), ChallengeError>;

    /// Number of segments in a bisection.
    fn segment_count(bisection: &Self::Bisection) -> usize;

    /// Steps asserted by segment `index`.
    fn segment_step_count(bisection: &Self::Bisection, index: usize) -> u64;

    /// The per-segment claim hashes the on-chain verifier will reconstruct.
    fn segment_hashes(&self, bisection: &Self::Bisection) -> Vec<Hash>;

    /// Advance the variant's claim context after segment `index` is chosen.
    fn apply_segment_choice(&mut self, bisection: &Self::Bisection, index: usize);

    /// The contract call submitting `bisection`.
    fn bisect_call(&self, bisection: &Self::Bisection) -> ContractCall;

    /// The contract call settling a single-step claim.
    fn one_step_call(&self, data: Self::OneStepData) -> ContractCall;
}

/// The generic two-party challenge state machine.
///
/// All methods are pure state manipulation; events come in through
/// [`apply_event`](Self::apply_event) in chain order, moves are validated
/// through the `prepare_*` methods before anything touches the adapter.
#[derive(Clone, Debug)]
pub struct BisectionChallenge<V: ChallengeVariant> {
    variant: V,
    state: ChallengeState,
    deadline: TimeTicks,
    current_claim_hash: Hash,
    current_step_count: u64,
    current_bisection: Option<V::Bisection>,
}

impl<V: ChallengeVariant> BisectionChallenge<V> {
    /// A freshly created challenge: the asserter is on turn to defend
    /// `claim_hash` covering `step_count` steps.
    pub fn new(variant: V, claim_hash: Hash, step_count: u64, deadline: TimeTicks) -> Self {
        Self {
            variant,
            state: ChallengeState::PendingAsserter,
            deadline,
            current_claim_hash: claim_hash,
            current_step_count: step_count,
            current_bisection: None,
        }
    }

    /// Current machine state.
    pub fn state(&self) -> ChallengeState {
        self.state
    }

    /// The deadline the on-turn party must beat.
    pub fn deadline(&self) -> TimeTicks {
        self.deadline
    }

    /// Hash of the claim currently under dispute.
    pub fn current_claim_hash(&self) -> Hash {
        self.current_claim_hash
    }

    /// Steps covered by the claim currently under dispute.
    pub fn current_step_count(&self) -> u64 {
        self.current_step_count
    }

    /// The last observed bisection, if the challenger is picking.
    pub fn current_bisection(&self) -> Option<&V::Bisection> {
        self.current_bisection.as_ref()
    }

    /// Variant-specific claim context.
    pub fn variant(&self) -> &V {
        &self.variant
    }

    /// Decode a raw log and apply it.
    pub fn apply_log(&mut self, log: &ChainLog) -> Result<(), ChallengeError> {
        let event = V::decode_event(log)?;
        self.apply_event(event)
    }

    /// Apply one event, observed from the chain in block order.
    pub fn apply_event(&mut self, event: ChallengeEvent<V::Bisection>) -> Result<(), ChallengeError> {
        if self.state.is_terminal() {
            return Err(ChallengeError::Completed);
        }
        debug!(event = event.kind(), state = ?self.state, "applying challenge event");
        match event {
            ChallengeEvent::Bisected { bisection, deadline } => {
                if self.state != ChallengeState::PendingAsserter {
                    return Err(ChallengeError::OffTurn {
                        attempted: "Bisected",
                        state: self.state,
                    });
                }
                self.variant.validate_bisection(&bisection)?;
                self.current_bisection = Some(bisection);
                self.deadline = deadline;
                self.state = ChallengeState::PendingChallenger;
            }
            ChallengeEvent::SegmentChosen { index, deadline } => {
                if self.state != ChallengeState::PendingChallenger {
                    return Err(ChallengeError::OffTurn {
                        attempted: "SegmentChosen",
                        state: self.state,
                    });
                }
                let Some(bisection) = self.current_bisection.as_ref() else {
                    return Err(ChallengeError::MalformedEvent(
                        "segment chosen with no bisection on record".into(),
                    ));
                };
                let segments = V::segment_count(bisection);
                if usize::from(index) >= segments {
                    return Err(ChallengeError::SegmentOutOfRange { index, segments });
                }
                let bisection = self
                    .current_bisection
                    .take()
                    .expect("bisection checked above");
                let hashes = self.variant.segment_hashes(&bisection);
                self.current_claim_hash = hashes[usize::from(index)];
                self.current_step_count = V::segment_step_count(&bisection, usize::from(index));
                self.variant
                    .apply_segment_choice(&bisection, usize::from(index));
                self.deadline = deadline;
                self.state = ChallengeState::PendingAsserter;
            }
            ChallengeEvent::OneStepProofCompleted => {
                self.state = ChallengeState::CompletedAsserterWins;
            }
            ChallengeEvent::AsserterTimedOut => {
                self.state = ChallengeState::CompletedChallengerWins;
            }
            ChallengeEvent::ChallengerTimedOut => {
                self.state = ChallengeState::CompletedAsserterWins;
            }
        }
        Ok(())
    }

    /// Validate a bisection against the current claim and return the call
    /// that submits it. Asserter's turn only.
    pub fn prepare_bisection(
        &self,
        bisection: &V::Bisection,
    ) -> Result<ContractCall, ChallengeError> {
        self.require_turn(Role::Asserter, "bisect")?;
        self.variant.validate_bisection(bisection)?;
        Ok(self.variant.bisect_call(bisection))
    }

    /// Validate a segment choice and return the call that submits it, with
    /// the locally recomputed segment-hash array. Challenger's turn only.
    pub fn prepare_choose_segment(&self, index: u16) -> Result<ContractCall, ChallengeError> {
        self.require_turn(Role::Challenger, "choose_segment")?;
        let Some(bisection) = self.current_bisection.as_ref() else {
            return Err(ChallengeError::MalformedBisection(
                "no bisection to choose from".into(),
            ));
        };
        let segments = V::segment_count(bisection);
        if usize::from(index) >= segments {
            return Err(ChallengeError::SegmentOutOfRange { index, segments });
        }
        Ok(ContractCall::ChooseSegment {
            index,
            segment_hashes: self.variant.segment_hashes(bisection),
        })
    }

    /// Validate a one-step proof attempt and return the settling call.
    /// Asserter's turn, single-step claims only.
    pub fn prepare_one_step(&self, data: V::OneStepData) -> Result<ContractCall, ChallengeError> {
        self.require_turn(Role::Asserter, "one_step_proof")?;
        if self.current_step_count != 1 {
            return Err(ChallengeError::NotOneStep(self.current_step_count));
        }
        Ok(self.variant.one_step_call(data))
    }

    /// Validate a timeout claim by `claimant` at chain time `now` and return
    /// the call. Legal only while the opponent is on turn past the deadline.
    pub fn prepare_timeout(
        &self,
        claimant: Role,
        now: TimeTicks,
    ) -> Result<ContractCall, ChallengeError> {
        if self.state.is_terminal() {
            return Err(ChallengeError::Completed);
        }
        if self.state.on_turn() != Some(claimant.opponent()) {
            return Err(ChallengeError::OffTurn {
                attempted: "timeout",
                state: self.state,
            });
        }
        if now <= self.deadline {
            return Err(ChallengeError::DeadlineNotPassed {
                deadline: self.deadline,
                now,
            });
        }
        Ok(match claimant {
            Role::Asserter => ContractCall::ChallengerTimeout,
            Role::Challenger => ContractCall::AsserterTimeout,
        })
    }

    fn require_turn(&self, role: Role, attempted: &'static str) -> Result<(), ChallengeError> {
        if self.state.is_terminal() {
            return Err(ChallengeError::Completed);
        }
        if self.state.on_turn() != Some(role) {
            return Err(ChallengeError::OffTurn {
                attempted,
                state: self.state,
            });
        }
        Ok(())
    }
}
