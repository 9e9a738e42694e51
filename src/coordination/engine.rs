//! Drives one nonce from first broadcast to confirmation

use crate::chain::{ChainClient, ConfirmationTracker, Depth, ForkGuard};
use crate::config::Settings;
use crate::error::{PacerError, PacerResult};
use crate::report::{ProgressEntry, ProgressLog, Status};
use crate::tx::{Attempt, Escalation, FeeEscalator, PacingController, PendingSet, TransactionSender};

use ethers::types::{H256, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Inputs of one iteration
#[derive(Debug, Clone)]
pub struct IterationState {
    /// 0-based iteration index
    pub index: u64,
    /// Final price of the previous iteration
    pub current_price: U256,
    pub global_start: Instant,
    pub last_duration: Duration,
}

/// The confirmed attempt for a nonce
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationResult {
    pub attempt: Attempt,
    pub block_hash: H256,
    /// Price the chain reports for the mined attempt
    pub final_price: U256,
}

#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub result: ConfirmationResult,
    /// Time from first broadcast to confirmation
    pub elapsed: Duration,
}

/// Result of one confirmation check
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmStatus {
    Confirmed(ConfirmationResult),
    /// The mined block was reorganized away
    Blocked,
    /// Nothing mined yet
    Pending,
}

/// Per-nonce state machine: price adjust, broadcast, confirm, escalate
pub struct IterationOrchestrator<C: ChainClient> {
    sender: TransactionSender<C>,
    escalator: FeeEscalator,
    tracker: ConfirmationTracker<C>,
    fork_guard: ForkGuard<C>,
    pacing: PacingController,
    log: ProgressLog,
    pending_poll: Duration,
    escalation_interval: Duration,
    max_iteration: Option<Duration>,
}

impl<C: ChainClient> IterationOrchestrator<C> {
    pub fn new(client: Arc<C>, settings: &Settings, log: ProgressLog) -> PacerResult<Self> {
        let contract = settings
            .contract_address()
            .map_err(|e| PacerError::Config(e.to_string()))?;
        let timing = &settings.timing;
        let batch = &settings.batch;

        let sender = TransactionSender::new(
            client.clone(),
            contract,
            &settings.contract.method,
            timing.broadcast_retry(),
            timing.broadcast_max_attempts,
        );

        let pacing =
            PacingController::new(batch.target, batch.target_time(), batch.max_gas_price());
        debug!(
            "Pacing {} transactions at {:.1}s each",
            batch.target,
            pacing.target_ratio().as_secs_f64()
        );

        Ok(Self {
            sender,
            escalator: FeeEscalator::new(batch.max_gas_price()),
            tracker: ConfirmationTracker::new(client.clone()),
            fork_guard: ForkGuard::new(
                client,
                settings.network.confirmations,
                timing.confirmation_poll(),
            ),
            pacing,
            log,
            pending_poll: timing.pending_poll(),
            escalation_interval: timing.escalation_interval(),
            max_iteration: batch.max_iteration(),
        })
    }

    pub fn log_mut(&mut self) -> &mut ProgressLog {
        &mut self.log
    }

    /// Run one nonce to confirmation
    pub async fn run_iteration(&mut self, state: &IterationState) -> PacerResult<IterationOutcome> {
        let progress = state.index + 1;

        let base_price = self.pacing.adjust(
            state.index,
            state.current_price,
            state.global_start,
            state.last_duration,
        );

        let first = self.sender.submit_with_fresh_nonce(base_price).await?;
        let nonce = first.nonce;
        let started = first.submitted_at;

        if self.log.needs_header(state.index) {
            self.log.header(progress);
        }
        self.record(progress, nonce, base_price, Status::Pending, first.hash);

        let mut pending = PendingSet::new(nonce);
        pending.push(first)?;

        let mut price = base_price;
        let mut next_step: u32 = 1;
        let mut last_mined = None;

        loop {
            match self.confirm(&pending, progress, &mut last_mined).await? {
                ConfirmStatus::Confirmed(result) => {
                    let elapsed = started.elapsed();
                    self.record(
                        progress,
                        nonce,
                        result.final_price,
                        Status::Success,
                        result.attempt.hash,
                    );
                    crate::metrics::record_confirmed(result.final_price, elapsed.as_secs_f64());
                    info!(
                        "Nonce {} confirmed at price {} after {:.1}s",
                        nonce,
                        result.final_price,
                        elapsed.as_secs_f64()
                    );
                    return Ok(IterationOutcome { result, elapsed });
                }
                ConfirmStatus::Blocked => {
                    warn!(
                        "Nonce {} lost its block, watching {} attempts up to price {:?} again",
                        nonce,
                        pending.len(),
                        pending.highest_price()
                    );
                }
                ConfirmStatus::Pending => {}
            }

            // Escalation k is due once k intervals have passed since the broadcast
            if started.elapsed() >= self.escalation_interval * next_step {
                next_step += 1;
                let (next_price, outcome) = self
                    .escalator
                    .escalate(&self.sender, price, nonce, &mut pending)
                    .await?;
                price = next_price;

                match (outcome, pending.last()) {
                    (Escalation::Submitted, Some(last)) => {
                        let (gas_price, hash) = (last.gas_price, last.hash);
                        self.record(progress, nonce, gas_price, Status::Pending, hash);
                    }
                    _ => debug!("Escalation of nonce {} ended as {:?}", nonce, outcome),
                }
            }

            if let Some(limit) = self.max_iteration {
                if started.elapsed() >= limit {
                    return Err(PacerError::Timeout {
                        operation: format!("confirmation of nonce {}", nonce),
                    });
                }
            }

            tokio::time::sleep(self.pending_poll).await;
        }
    }

    /// Look for a mined attempt and wait for its depth
    ///
    /// `last_mined` holds the (attempt, block) pair last printed as mined, so
    /// a node still serving an orphaned receipt does not repeat the row.
    async fn confirm(
        &mut self,
        pending: &PendingSet,
        progress: u64,
        last_mined: &mut Option<(H256, H256)>,
    ) -> PacerResult<ConfirmStatus> {
        let mined = match self.tracker.find_mined(pending).await? {
            Some(mined) => mined,
            None => return Ok(ConfirmStatus::Pending),
        };

        let seen = Some((mined.attempt.hash, mined.block_hash));
        if *last_mined != seen {
            *last_mined = seen;
            self.record(
                progress,
                pending.nonce(),
                mined.gas_price,
                Status::Mined,
                mined.attempt.hash,
            );
        }

        match self.fork_guard.await_confirmations(mined.block_hash).await? {
            Depth::Reached => Ok(ConfirmStatus::Confirmed(ConfirmationResult {
                attempt: mined.attempt,
                block_hash: mined.block_hash,
                final_price: mined.gas_price,
            })),
            Depth::Forked => Ok(ConfirmStatus::Blocked),
        }
    }

    fn record(&mut self, progress: u64, nonce: u64, gas_price: U256, status: Status, tx_hash: H256) {
        self.log.record(&ProgressEntry {
            progress,
            nonce,
            gas_price,
            status,
            tx_hash,
        });
    }
}
