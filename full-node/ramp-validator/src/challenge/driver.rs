//! The per-challenge task.
//!
//! One driver owns one challenge: it holds the event subscription, feeds
//! observed events to the state machine in block order, and submits the
//! local party's moves through the adapter. State is never trusted across a
//! subscription loss; the driver resets to the challenge's initial state and
//! replays chain history from the creation block.

use std::sync::Arc;
use std::time::Duration;

use ramp_interface::cancel::Cancel;
use ramp_interface::chain::{
    ChainAdapter, ChainError, ChainLog, ContractCall, EventFilter, TxReceipt,
};
use ramp_interface::claims::TimeTicks;
use ramp_interface::hash::Address;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{BisectionChallenge, ChallengeError, ChallengeState, ChallengeVariant, Role};

/// The asserter's next move, produced by the [`MoveOracle`].
pub enum AsserterMove<V: ChallengeVariant> {
    /// Split the disputed claim.
    Bisect(V::Bisection),
    /// Settle a single-step claim on-chain.
    OneStep(V::OneStepData),
}

/// The seam to the off-chain virtual machine: asked for a move whenever the
/// local party is on turn.
#[async_trait::async_trait]
pub trait MoveOracle<V: ChallengeVariant>: Send {
    /// The asserter's move for the claim currently under dispute.
    async fn next_assertion(
        &mut self,
        challenge: &BisectionChallenge<V>,
    ) -> anyhow::Result<AsserterMove<V>>;

    /// The segment the challenger disputes in `bisection`.
    async fn pick_segment(
        &mut self,
        challenge: &BisectionChallenge<V>,
        bisection: &V::Bisection,
    ) -> anyhow::Result<u16>;
}

/// Submission tuning.
#[derive(Clone, Copy, Debug)]
pub struct DriverConfig {
    /// Attempts per transaction; only transient failures are retried.
    pub max_submission_attempts: u32,
    /// Pause between attempts.
    pub retry_backoff: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_submission_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Why a driver stopped.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A protocol violation; fatal to this challenge.
    #[error(transparent)]
    Protocol(#[from] ChallengeError),
    /// A non-transient chain failure.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// The move oracle could not produce a move.
    #[error("move oracle failed: {0}")]
    Oracle(#[source] anyhow::Error),
    /// The cancellation token fired.
    #[error("cancelled")]
    Cancelled,
}

/// Drives one challenge to completion.
pub struct ChallengeDriver<V: ChallengeVariant, A: ChainAdapter> {
    adapter: Arc<A>,
    contract: Address,
    local_role: Role,
    config: DriverConfig,
    initial: BisectionChallenge<V>,
    challenge: BisectionChallenge<V>,
    /// Block the challenge contract was created in; replays start here.
    creation_block: u64,
    /// Highest block an applied event came from.
    last_block_seen: u64,
    /// Replay barrier: moves are suppressed until history reaches this block
    /// again, so a reconnect cannot double-submit.
    resume_target: u64,
    caught_up: bool,
    move_pending: bool,
    timeout_pending: bool,
    cancel: Cancel,
}

impl<V: ChallengeVariant, A: ChainAdapter> ChallengeDriver<V, A> {
    /// A driver for `challenge`, playing `local_role` against the contract
    /// at `contract`.
    pub fn new(
        adapter: Arc<A>,
        contract: Address,
        local_role: Role,
        challenge: BisectionChallenge<V>,
        creation_block: u64,
        config: DriverConfig,
        cancel: Cancel,
    ) -> Self {
        Self {
            adapter,
            contract,
            local_role,
            config,
            initial: challenge.clone(),
            challenge,
            creation_block,
            last_block_seen: creation_block,
            resume_target: creation_block,
            caught_up: true,
            move_pending: false,
            timeout_pending: false,
            cancel,
        }
    }

    /// The challenge being driven.
    pub fn challenge(&self) -> &BisectionChallenge<V> {
        &self.challenge
    }

    /// Current state.
    pub fn state(&self) -> ChallengeState {
        self.challenge.state()
    }

    /// Validate and submit a bisection. Asserter's turn only.
    pub async fn bisect(&mut self, bisection: V::Bisection) -> Result<(), DriverError> {
        let call = self.challenge.prepare_bisection(&bisection)?;
        self.submit(call).await?;
        self.move_pending = true;
        Ok(())
    }

    /// Validate and submit a segment choice. Challenger's turn only.
    pub async fn choose_segment(&mut self, index: u16) -> Result<(), DriverError> {
        let call = self.challenge.prepare_choose_segment(index)?;
        self.submit(call).await?;
        self.move_pending = true;
        Ok(())
    }

    /// Validate and submit a one-step proof. Asserter's turn, single-step
    /// claims only.
    pub async fn one_step_proof(&mut self, data: V::OneStepData) -> Result<(), DriverError> {
        let call = self.challenge.prepare_one_step(data)?;
        self.submit(call).await?;
        self.move_pending = true;
        Ok(())
    }

    /// Claim the opponent timed out, if their deadline has passed at `now`.
    pub async fn try_timeout(&mut self, now: TimeTicks) -> Result<(), DriverError> {
        let call = self.challenge.prepare_timeout(self.local_role, now)?;
        self.submit(call).await?;
        self.timeout_pending = true;
        Ok(())
    }

    /// Apply an observed event. Used directly by embeddings that own their
    /// own subscription; [`run`](Self::run) calls it internally.
    pub fn apply_log(&mut self, log: &ChainLog) -> Result<(), ChallengeError> {
        debug!(
            block = log.block_number,
            state = ?self.challenge.state(),
            "applying challenge log"
        );
        self.challenge.apply_log(log)?;
        self.move_pending = false;
        self.timeout_pending = false;
        if log.block_number >= self.resume_target {
            self.caught_up = true;
        }
        self.last_block_seen = self.last_block_seen.max(log.block_number);
        Ok(())
    }

    /// Drive the challenge until it completes or the token fires. `clock`
    /// carries the settlement chain's current tick (from the embedding's
    /// head subscription) and is what arms timeout claims.
    pub async fn run<O: MoveOracle<V>>(
        &mut self,
        oracle: &mut O,
        mut clock: watch::Receiver<TimeTicks>,
    ) -> Result<ChallengeState, DriverError> {
        let cancel = self.cancel.clone();
        'resubscribe: loop {
            let filter = EventFilter {
                address: self.contract,
                topics: V::expected_topics().to_vec(),
            };
            let mut subscription = self
                .adapter
                .subscribe_events(filter, self.creation_block, &self.cancel)
                .await?;

            if self.challenge.state().is_terminal() {
                return Ok(self.challenge.state());
            }
            self.act_if_on_turn(oracle).await?;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(DriverError::Cancelled);
                    }
                    maybe_log = subscription.events.recv() => {
                        let Some(log) = maybe_log else {
                            warn!("event stream ended, resubscribing");
                            self.reset_for_replay();
                            continue 'resubscribe;
                        };
                        // The emitting block must still be part of the chain;
                        // a vanished header means the log was reorged away
                        // between emission and delivery.
                        match self.adapter.header_by_hash(log.block_hash, &cancel).await {
                            Ok(_) => {}
                            Err(ChainError::NotFound) => {
                                warn!(
                                    block = log.block_number,
                                    "event block no longer known, replaying"
                                );
                                self.reset_for_replay();
                                continue 'resubscribe;
                            }
                            Err(ChainError::Cancelled) => return Err(DriverError::Cancelled),
                            Err(err) if err.is_transient() => {
                                warn!(error = %err, "header lookup failed, replaying");
                                self.reset_for_replay();
                                continue 'resubscribe;
                            }
                            Err(err) => return Err(DriverError::Chain(err)),
                        }
                        self.apply_log(&log)?;
                        if self.challenge.state().is_terminal() {
                            info!(state = ?self.challenge.state(), "challenge complete");
                            return Ok(self.challenge.state());
                        }
                        self.act_if_on_turn(oracle).await?;
                    }
                    maybe_err = subscription.errors.recv() => {
                        match maybe_err {
                            Some(err) => {
                                warn!(%err, "subscription failed, replaying from creation block")
                            }
                            None => warn!("subscription error channel closed, replaying"),
                        }
                        self.reset_for_replay();
                        continue 'resubscribe;
                    }
                    changed = clock.changed() => {
                        if changed.is_err() {
                            // The clock source is gone; the task cannot make
                            // deadline decisions any more.
                            return Err(DriverError::Cancelled);
                        }
                        let now = *clock.borrow();
                        self.on_tick(oracle, now).await?;
                    }
                }
            }
        }
    }

    /// Forget everything since creation and replay: the next subscription
    /// starts at the creation block and moves stay suppressed until history
    /// catches back up to the previously observed tip.
    fn reset_for_replay(&mut self) {
        self.resume_target = self.last_block_seen;
        self.caught_up = self.resume_target <= self.creation_block;
        self.challenge = self.initial.clone();
        self.move_pending = false;
        self.timeout_pending = false;
    }

    async fn act_if_on_turn<O: MoveOracle<V>>(
        &mut self,
        oracle: &mut O,
    ) -> Result<(), DriverError> {
        if !self.caught_up || self.move_pending {
            return Ok(());
        }
        if self.challenge.state().on_turn() != Some(self.local_role) {
            return Ok(());
        }
        let call = match self.local_role {
            Role::Asserter => {
                let next = oracle
                    .next_assertion(&self.challenge)
                    .await
                    .map_err(DriverError::Oracle)?;
                match next {
                    AsserterMove::Bisect(bisection) => {
                        self.challenge.prepare_bisection(&bisection)?
                    }
                    AsserterMove::OneStep(data) => self.challenge.prepare_one_step(data)?,
                }
            }
            Role::Challenger => {
                let Some(bisection) = self.challenge.current_bisection().cloned() else {
                    return Ok(());
                };
                let index = oracle
                    .pick_segment(&self.challenge, &bisection)
                    .await
                    .map_err(DriverError::Oracle)?;
                self.challenge.prepare_choose_segment(index)?
            }
        };
        self.submit(call).await?;
        self.move_pending = true;
        Ok(())
    }

    async fn on_tick<O: MoveOracle<V>>(
        &mut self,
        oracle: &mut O,
        now: TimeTicks,
    ) -> Result<(), DriverError> {
        if !self.caught_up || self.challenge.state().is_terminal() {
            return Ok(());
        }
        if self.challenge.state().on_turn() == Some(self.local_role) {
            // A reconnect may have interrupted our move; the tick retries it.
            return self.act_if_on_turn(oracle).await;
        }
        if !self.timeout_pending && now > self.challenge.deadline() {
            info!(
                deadline = ?self.challenge.deadline(),
                now = ?now,
                "opponent missed the deadline, claiming timeout"
            );
            let call = self.challenge.prepare_timeout(self.local_role, now)?;
            self.submit(call).await?;
            self.timeout_pending = true;
        }
        Ok(())
    }

    /// Submit with bounded retry on transient failures. A revert classified
    /// as an invalid move is fatal.
    async fn submit(&self, call: ContractCall) -> Result<TxReceipt, DriverError> {
        let mut attempt = 1u32;
        loop {
            match self
                .adapter
                .submit_transaction(call.clone(), &self.cancel)
                .await
            {
                Ok(receipt) if receipt.succeeded => {
                    info!(
                        method = call.method(),
                        block = receipt.block_number,
                        "transaction mined"
                    );
                    return Ok(receipt);
                }
                Ok(receipt) => {
                    return Err(DriverError::Chain(ChainError::Reverted {
                        method: call.method(),
                        reason: format!("status 0 in block {}", receipt.block_number),
                    }));
                }
                Err(ChainError::Cancelled) => return Err(DriverError::Cancelled),
                Err(err) if err.is_transient() && attempt < self.config.max_submission_attempts => {
                    warn!(
                        method = call.method(),
                        attempt,
                        error = %err,
                        "transient submission failure, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = self.cancel.cancelled() => return Err(DriverError::Cancelled),
                    }
                }
                Err(err) => return Err(DriverError::Chain(err)),
            }
        }
    }
}
