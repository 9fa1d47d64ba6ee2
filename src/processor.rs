use crate::{
    Error,
    Result,
    config::EngineConfig,
    ledger::{
        ClaimReceipt,
        LedgerClient,
        Submission,
        TxId,
    },
    queue::SpinQueue,
    reconstruct::{
        OutcomeReconstructor,
        ReconstructedOutcome,
    },
    spin::{
        QueuedSpin,
        ReconstructionInput,
        SpinId,
        SpinStatus,
    },
    wager::{
        WagerKey,
        WagerRequest,
    },
    wallet::WalletProvider,
};
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
    },
    task::{
        AbortHandle,
        JoinHandle,
    },
    time::{
        self,
        Instant,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    warn,
};

/// Retry/in-flight bookkeeping for one spin. Everything else is re-derived from the queue.
#[derive(Default)]
struct SpinWork {
    in_flight: Option<AbortHandle>,
    submit_failures: u32,
    poll_failures: u32,
    retry_at: Option<Instant>,
}

impl SpinWork {
    fn abort(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

#[derive(Clone, Copy)]
enum RetryBudget {
    Submit,
    Poll,
}

enum Step {
    Submit {
        request: WagerRequest,
        check_balance: bool,
    },
    Poll {
        tx_id: TxId,
        commitment_round: u64,
    },
    Reconstruct(ReconstructionInput),
    Claim(WagerKey),
}

/// A confirmed bet as the ledger reports it.
struct Confirmation {
    claim_round: u64,
    current_round: u64,
}

enum StepResult {
    Submitted(Result<Submission>),
    Polled {
        commitment_round: u64,
        /// `None` while the transaction is unconfirmed.
        result: Result<Option<Confirmation>>,
    },
    /// A losing outcome arrives with the receipt of the claim that settled it.
    Reconstructed(Result<(ReconstructedOutcome, Option<ClaimReceipt>)>),
    Claimed(Result<ClaimReceipt>),
}

struct StepReport {
    id: SpinId,
    result: StepResult,
}

/// What a step task needs from the processor; cloned into every task.
struct StepContext<L, W> {
    ledger: Arc<L>,
    wallet: Arc<W>,
    reconstructor: OutcomeReconstructor<L>,
    ledger_timeout: Duration,
    spin_fee: u64,
}

impl<L, W> Clone for StepContext<L, W> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            wallet: self.wallet.clone(),
            reconstructor: self.reconstructor.clone(),
            ledger_timeout: self.ledger_timeout,
            spin_fee: self.spin_fee,
        }
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    time::timeout(timeout, call).await?
}

impl<L: LedgerClient, W: WalletProvider> StepContext<L, W> {
    async fn run(self, step: Step) -> StepResult {
        match step {
            Step::Submit {
                request,
                check_balance,
            } => StepResult::Submitted(self.submit(&request, check_balance).await),
            Step::Poll {
                tx_id,
                commitment_round,
            } => StepResult::Polled {
                commitment_round,
                result: self.poll(&tx_id).await,
            },
            Step::Reconstruct(input) => StepResult::Reconstructed(self.reconstruct(&input).await),
            Step::Claim(wager_key) => StepResult::Claimed(
                with_timeout(self.ledger_timeout, self.ledger.claim(&wager_key)).await,
            ),
        }
    }

    async fn submit(&self, request: &WagerRequest, check_balance: bool) -> Result<Submission> {
        if check_balance {
            let balance = with_timeout(self.ledger_timeout, self.wallet.balance()).await?;
            let required = request.total_bet.saturating_add(self.spin_fee);
            if balance < required {
                return Err(Error::Submission(format!(
                    "insufficient balance: {balance} available, {required} required"
                )));
            }
        }
        with_timeout(self.ledger_timeout, self.ledger.submit(request)).await
    }

    async fn poll(&self, tx_id: &str) -> Result<Option<Confirmation>> {
        let status = with_timeout(self.ledger_timeout, self.ledger.status(tx_id)).await?;
        if !status.confirmed {
            return Ok(None);
        }
        let current_round = with_timeout(self.ledger_timeout, self.ledger.current_round()).await?;
        Ok(Some(Confirmation {
            claim_round: status.claim_round,
            current_round,
        }))
    }

    /// Losses are claimed straight away, so the ledger confirms the zero payout and
    /// releases the bet.
    async fn reconstruct(
        &self,
        input: &ReconstructionInput,
    ) -> Result<(ReconstructedOutcome, Option<ClaimReceipt>)> {
        let outcome =
            with_timeout(self.ledger_timeout, self.reconstructor.reconstruct(input)).await?;
        if outcome.total_winnings > 0 {
            return Ok((outcome, None));
        }
        let receipt =
            with_timeout(self.ledger_timeout, self.ledger.claim(&input.wager_key)).await?;
        Ok((outcome, Some(receipt)))
    }
}

/// Background scheduler that drives every live spin to a terminal status.
///
/// The processor loop is the only writer of spin status. Ledger calls run in per-spin
/// tasks that report back over a channel; at most one call is in flight per spin.
pub struct QueueProcessor<L, W> {
    queue: SpinQueue,
    config: Arc<EngineConfig>,
    ctx: StepContext<L, W>,
    work: HashMap<SpinId, SpinWork>,
    results: mpsc::UnboundedSender<StepReport>,
}

/// Stops the processor when shut down or dropped.
pub struct ProcessorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProcessorHandle {
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(err) = (&mut self.task).await {
            warn!(?err, "queue processor task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

fn check_payout(receipt: &ClaimReceipt, expected: u64) -> Result<()> {
    if receipt.payout == expected {
        return Ok(());
    }
    Err(Error::ReconstructionMismatch(format!(
        "ledger paid {} but the reconstructed outcome pays {expected}",
        receipt.payout
    )))
}

async fn next_round(rounds: &mut Option<watch::Receiver<u64>>) -> bool {
    match rounds {
        Some(rx) => rx.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

impl<L: LedgerClient, W: WalletProvider> QueueProcessor<L, W> {
    pub fn spawn(
        queue: SpinQueue,
        ledger: Arc<L>,
        wallet: Arc<W>,
        config: Arc<EngineConfig>,
    ) -> ProcessorHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let reconstructor = OutcomeReconstructor::new(ledger.clone(), config.max_claim_round_delta);
        let processor = Self {
            queue,
            ctx: StepContext {
                ledger,
                wallet,
                reconstructor,
                ledger_timeout: config.ledger_timeout(),
                spin_fee: config.spin_fee,
            },
            config,
            work: HashMap::new(),
            results: results_tx,
        };
        let task = tokio::spawn(processor.run(results_rx, shutdown_rx));
        ProcessorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    async fn run(
        mut self,
        mut results: mpsc::UnboundedReceiver<StepReport>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(tick = ?self.config.tick_interval(), "queue processor started");
        let mut ticker = time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rounds = self.ctx.ledger.round_updates();
        let queue = self.queue.clone();

        loop {
            tokio::select! {
                _ = ticker.tick() => self.drive(),
                _ = queue.enqueued() => self.drive(),
                changed = next_round(&mut rounds) => {
                    if !changed {
                        debug!("ledger round updates closed, falling back to ticks");
                        rounds = None;
                    }
                    self.drive();
                }
                Some(report) = results.recv() => {
                    self.apply(report);
                    self.drive();
                }
                _ = &mut shutdown => break,
            }
        }

        for work in self.work.values_mut() {
            work.abort();
        }
        info!("queue processor stopped");
    }

    /// One pass over every live spin.
    fn drive(&mut self) {
        let now = Instant::now();
        let active = self.queue.list_active();
        let live: HashSet<SpinId> = active.iter().map(|s| s.id).collect();
        self.work.retain(|id, work| {
            let keep = live.contains(id);
            if !keep {
                work.abort();
            }
            keep
        });
        for spin in &active {
            self.drive_spin(spin, now);
        }
        self.queue.evict_history();
    }

    fn drive_spin(&mut self, spin: &QueuedSpin, now: Instant) {
        let elapsed = now.saturating_duration_since(spin.created);
        if elapsed > self.config.spin_expiry() {
            self.expire(spin.id, elapsed);
            return;
        }
        if let Some(work) = self.work.get(&spin.id) {
            let backing_off = work.retry_at.is_some_and(|at| at > now);
            if work.in_flight.is_some() || backing_off {
                return;
            }
        }
        match self.next_step(spin) {
            Ok(Some(step)) => self.launch(spin.id, step),
            Ok(None) => {}
            Err(err) => self.fail(spin.id, err),
        }
    }

    fn wager_request(&self, spin: &QueuedSpin) -> WagerRequest {
        let wager_key = spin.wager_key.unwrap_or_else(|| {
            WagerKey::new(
                &self.ctx.wallet.address(),
                spin.bet_per_line,
                spin.selected_paylines.saturating_sub(1),
                spin.wager_nonce,
            )
        });
        WagerRequest {
            wager_key,
            bet_per_line: spin.bet_per_line,
            selected_paylines: spin.selected_paylines,
            total_bet: spin.total_bet,
        }
    }

    fn next_step(&self, spin: &QueuedSpin) -> Result<Option<Step>> {
        let step = match spin.status {
            SpinStatus::Pending => {
                let request = self.wager_request(spin);
                self.queue.begin_submission(spin.id, request.wager_key)?;
                Step::Submit {
                    request,
                    check_balance: true,
                }
            }
            SpinStatus::Submitting => Step::Submit {
                request: self.wager_request(spin),
                check_balance: false,
            },
            SpinStatus::Waiting => {
                let (Some(tx_id), Some(commitment_round)) =
                    (spin.tx_id.clone(), spin.commitment_round)
                else {
                    return Err(Error::Submission(format!(
                        "{} is waiting without a recorded submission",
                        spin.id
                    )));
                };
                Step::Poll {
                    tx_id,
                    commitment_round,
                }
            }
            SpinStatus::Processing => Step::Reconstruct(spin.reconstruction_input()?),
            SpinStatus::ReadyToClaim | SpinStatus::Claiming => {
                let wager_key = spin.wager_key.ok_or_else(|| {
                    Error::InvalidReconstructionInput(format!("{} has no wager key", spin.id))
                })?;
                if spin.status == SpinStatus::ReadyToClaim {
                    self.queue.begin_claim(spin.id)?;
                }
                Step::Claim(wager_key)
            }
            SpinStatus::Completed | SpinStatus::Failed | SpinStatus::Expired => {
                return Ok(None);
            }
        };
        Ok(Some(step))
    }

    fn launch(&mut self, id: SpinId, step: Step) {
        let ctx = self.ctx.clone();
        let results = self.results.clone();
        let handle = tokio::spawn(async move {
            let result = ctx.run(step).await;
            let _ = results.send(StepReport { id, result });
        });
        let work = self.work.entry(id).or_default();
        work.retry_at = None;
        work.in_flight = Some(handle.abort_handle());
    }

    fn apply(&mut self, report: StepReport) {
        let StepReport { id, result } = report;
        match self.work.get_mut(&id) {
            Some(work) => work.in_flight = None,
            None => {
                debug!(spin_id = %id, "dropping result for untracked spin");
                return;
            }
        }
        let Some(spin) = self.queue.get(id).filter(|s| !s.is_terminal()) else {
            debug!(spin_id = %id, "dropping result for finished spin");
            self.work.remove(&id);
            return;
        };

        let applied = match result {
            StepResult::Submitted(Ok(submission)) => {
                self.reset_failures(id);
                self.queue
                    .mark_waiting(id, submission.tx_id, submission.commitment_round)
                    .map(drop)
            }
            StepResult::Submitted(Err(err)) => {
                self.retry_or_fail(id, err, RetryBudget::Submit);
                Ok(())
            }
            StepResult::Polled {
                commitment_round,
                result: Ok(Some(confirmed)),
            } if confirmed.current_round >= confirmed.claim_round => {
                self.reset_failures(id);
                let expected = commitment_round + self.config.round_future_delta;
                if confirmed.claim_round != expected {
                    warn!(
                        spin_id = %id,
                        claim_round = confirmed.claim_round,
                        expected,
                        "ledger claim round disagrees with round_future_delta"
                    );
                }
                self.queue.mark_processing(id, confirmed.claim_round).map(drop)
            }
            StepResult::Polled { result: Ok(_), .. } => {
                // not settled yet; look again next tick
                self.reset_failures(id);
                self.back_off(id, self.config.tick_interval());
                Ok(())
            }
            StepResult::Polled { result: Err(err), .. } => {
                self.retry_or_fail(id, err, RetryBudget::Poll);
                Ok(())
            }
            StepResult::Reconstructed(Ok((outcome, receipt))) => {
                self.reset_failures(id);
                let settled = receipt
                    .as_ref()
                    .map_or(Ok(()), |r| check_payout(r, outcome.total_winnings));
                settled.and_then(|()| {
                    let claim_tx_id = receipt.map(|r| r.claim_tx_id);
                    self.queue.record_outcome(id, outcome, claim_tx_id).map(drop)
                })
            }
            StepResult::Reconstructed(Err(err)) => {
                self.retry_or_fail(id, err, RetryBudget::Poll);
                Ok(())
            }
            StepResult::Claimed(Ok(receipt)) => {
                check_payout(&receipt, spin.winnings.unwrap_or_default())
                    .and_then(|()| self.queue.complete_claim(id, receipt.claim_tx_id).map(drop))
            }
            StepResult::Claimed(Err(err)) => {
                self.retry_or_fail(id, err, RetryBudget::Poll);
                Ok(())
            }
        };
        if let Err(err) = applied {
            self.fail(id, err);
        }
    }

    fn reset_failures(&mut self, id: SpinId) {
        if let Some(work) = self.work.get_mut(&id) {
            work.submit_failures = 0;
            work.poll_failures = 0;
        }
    }

    fn retry_or_fail(&mut self, id: SpinId, err: Error, budget: RetryBudget) {
        if !err.is_retryable() {
            self.fail(id, err);
            return;
        }
        let work = self.work.entry(id).or_default();
        // an unproduced seed is waiting, not failing; only expiry bounds it
        let (failures, limit) = match (&err, budget) {
            (Error::SeedUnavailable { .. }, _) => (1, u32::MAX),
            (_, RetryBudget::Submit) => {
                work.submit_failures += 1;
                (work.submit_failures, self.config.max_submit_attempts)
            }
            (_, RetryBudget::Poll) => {
                work.poll_failures += 1;
                (work.poll_failures, self.config.max_poll_retries)
            }
        };
        if failures >= limit {
            self.fail(id, err);
            return;
        }
        let delay = self.config.retry_delay(failures);
        work.retry_at = Some(Instant::now() + delay);
        warn!(spin_id = %id, ?err, failures, ?delay, "ledger call failed, retrying");
    }

    fn back_off(&mut self, id: SpinId, delay: Duration) {
        self.work.entry(id).or_default().retry_at = Some(Instant::now() + delay);
    }

    fn fail(&mut self, id: SpinId, err: Error) {
        if let Some(mut work) = self.work.remove(&id) {
            work.abort();
        }
        if let Err(rejected) = self.queue.fail(id, err.to_string()) {
            debug!(spin_id = %id, ?rejected, "failure not recorded");
        }
    }

    fn expire(&mut self, id: SpinId, elapsed: Duration) {
        if let Some(mut work) = self.work.remove(&id) {
            work.abort();
        }
        let reason = Error::Expiry {
            elapsed_ms: elapsed.as_millis() as u64,
        };
        if let Err(rejected) = self.queue.expire(id, reason.to_string()) {
            debug!(spin_id = %id, ?rejected, "expiry not recorded");
        }
    }
}
