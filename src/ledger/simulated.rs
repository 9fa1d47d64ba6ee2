use crate::{
    Error,
    Result,
    ledger::{
        BlockSeed,
        ClaimReceipt,
        LedgerClient,
        Submission,
        TxId,
        TxStatus,
    },
    slot::{
        Grid,
        PaylineEvaluator,
        ReelSet,
        reels::sha256,
    },
    wager::{
        WagerKey,
        WagerRequest,
    },
    wallet::SimulatedWallet,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time,
};
use tracing::debug;

/// Failure modes the simulated chain can be switched into.
#[derive(Clone, Debug, Default)]
pub struct LedgerFaults {
    /// Every submission is rejected with this reason.
    pub reject_submissions: Option<String>,
    /// The next N calls fail with a network error.
    pub network_failures: u32,
    /// Calls never resolve.
    pub unresponsive: bool,
    /// Seeds are never served.
    pub withhold_seeds: bool,
    /// Added to every claim payout, to model a ledger disagreeing with the client.
    pub payout_skew: u64,
}

#[derive(Clone, Debug)]
struct Bet {
    tx_id: TxId,
    commitment_round: u64,
    claim_round: u64,
    active_paylines: usize,
    receipt: Option<ClaimReceipt>,
}

struct LedgerState {
    round: u64,
    bets: HashMap<WagerKey, Bet>,
    faults: LedgerFaults,
    submissions: u64,
    status_calls: u64,
}

/// In-process stand-in for the slot contract's chain.
///
/// Seeds are `sha256(secret || round)`, outcomes use the canonical reel derivation, and
/// payouts are scored with the same evaluator the engine uses.
#[derive(Clone)]
pub struct SimulatedLedger {
    state: Arc<Mutex<LedgerState>>,
    secret: [u8; 32],
    round_future_delta: u64,
    wallet: Option<Arc<SimulatedWallet>>,
    reels: ReelSet,
    evaluator: PaylineEvaluator,
    rounds: watch::Sender<u64>,
}

impl SimulatedLedger {
    pub fn new(secret: [u8; 32]) -> Self {
        let (rounds, _) = watch::channel(1);
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                round: 1,
                bets: HashMap::new(),
                faults: LedgerFaults::default(),
                submissions: 0,
                status_calls: 0,
            })),
            secret,
            round_future_delta: 1,
            wallet: None,
            reels: ReelSet::canonical(),
            evaluator: PaylineEvaluator::default(),
            rounds,
        }
    }

    /// Bets are debited from and payouts credited to this wallet.
    pub fn with_wallet(mut self, wallet: Arc<SimulatedWallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_round_future_delta(mut self, delta: u64) -> Self {
        self.round_future_delta = delta;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // a poisoned simulator is still usable for inspection
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_faults(&self, faults: LedgerFaults) {
        self.lock().faults = faults;
    }

    pub fn update_faults(&self, f: impl FnOnce(&mut LedgerFaults)) {
        f(&mut self.lock().faults);
    }

    pub fn round(&self) -> u64 {
        self.lock().round
    }

    pub fn submissions(&self) -> u64 {
        self.lock().submissions
    }

    /// Every `status` call that reached the chain, failed or not.
    pub fn status_calls(&self) -> u64 {
        self.lock().status_calls
    }

    pub fn advance_round(&self) -> u64 {
        let round = {
            let mut state = self.lock();
            state.round += 1;
            state.round
        };
        self.rounds.send_replace(round);
        debug!(round, "simulated ledger produced round");
        round
    }

    /// Produces a round every `interval` until the handle is aborted.
    pub fn spawn_block_producer(&self, interval: Duration) -> JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                ledger.advance_round();
            }
        })
    }

    pub fn seed_for(&self, round: u64) -> BlockSeed {
        BlockSeed::new(round, sha256(&[&self.secret, &round.to_be_bytes()]))
    }

    /// The grid the chain would score for this wager, if its claim round exists.
    pub fn outcome_grid(&self, wager_key: &WagerKey) -> Option<Grid> {
        let claim_round = self.lock().bets.get(wager_key)?.claim_round;
        let seed = self.seed_for(claim_round);
        let bytes = self
            .reels
            .derive_grid_bytes(&seed.bytes, wager_key.as_bytes());
        Grid::from_bytes(&bytes).ok()
    }

    /// Applies call-level faults. Returns once the call may proceed.
    async fn gate(&self) -> Result<()> {
        let unresponsive = {
            let mut state = self.lock();
            if state.faults.network_failures > 0 {
                state.faults.network_failures -= 1;
                return Err(Error::Network("simulated connection reset".to_string()));
            }
            state.faults.unresponsive
        };
        if unresponsive {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

impl LedgerClient for SimulatedLedger {
    async fn submit(&self, request: &WagerRequest) -> Result<Submission> {
        self.gate().await?;
        let mut state = self.lock();
        if let Some(bet) = state.bets.get(&request.wager_key) {
            return Ok(Submission {
                tx_id: bet.tx_id.clone(),
                commitment_round: bet.commitment_round,
            });
        }
        if let Some(reason) = state.faults.reject_submissions.clone() {
            return Err(Error::Submission(reason));
        }
        if request.total_bet != request.bet_per_line * request.selected_paylines {
            return Err(Error::Submission("payment does not match bet".to_string()));
        }
        if let Some(wallet) = &self.wallet {
            wallet.debit(request.total_bet)?;
        }
        let commitment_round = state.round;
        let tx_id = hex::encode(&sha256(&[request.wager_key.as_bytes()])[..13]).to_uppercase();
        state.submissions += 1;
        state.bets.insert(
            request.wager_key,
            Bet {
                tx_id: tx_id.clone(),
                commitment_round,
                claim_round: commitment_round + self.round_future_delta,
                active_paylines: request.selected_paylines as usize,
                receipt: None,
            },
        );
        Ok(Submission {
            tx_id,
            commitment_round,
        })
    }

    async fn status(&self, tx_id: &str) -> Result<TxStatus> {
        self.lock().status_calls += 1;
        self.gate().await?;
        let state = self.lock();
        let bet = state
            .bets
            .values()
            .find(|b| b.tx_id == tx_id)
            .ok_or_else(|| Error::Submission(format!("transaction {tx_id} not found")))?;
        Ok(TxStatus {
            round: bet.commitment_round,
            claim_round: bet.claim_round,
            confirmed: true,
            claim_tx_id: bet.receipt.as_ref().map(|r| r.claim_tx_id.clone()),
        })
    }

    async fn seed(&self, round: u64) -> Result<BlockSeed> {
        self.gate().await?;
        let (current, withheld) = {
            let state = self.lock();
            (state.round, state.faults.withhold_seeds)
        };
        if withheld || round == 0 || round > current {
            return Err(Error::SeedUnavailable { round });
        }
        Ok(self.seed_for(round))
    }

    async fn current_round(&self) -> Result<u64> {
        self.gate().await?;
        Ok(self.round())
    }

    async fn claim(&self, wager_key: &WagerKey) -> Result<ClaimReceipt> {
        self.gate().await?;
        let mut state = self.lock();
        let current = state.round;
        let skew = state.faults.payout_skew;
        let bet = state
            .bets
            .get_mut(wager_key)
            .ok_or_else(|| Error::Submission("bet not found".to_string()))?;
        if let Some(receipt) = &bet.receipt {
            return Ok(receipt.clone());
        }
        if current < bet.claim_round {
            return Err(Error::SeedUnavailable {
                round: bet.claim_round,
            });
        }
        let seed = self.seed_for(bet.claim_round);
        let bytes = self
            .reels
            .derive_grid_bytes(&seed.bytes, wager_key.as_bytes());
        let grid = Grid::from_bytes(&bytes)?;
        let payout = self
            .evaluator
            .evaluate(&grid, wager_key.amount(), bet.active_paylines)
            .total_winnings
            + skew;
        let receipt = ClaimReceipt {
            claim_tx_id: format!("C{}", &bet.tx_id[1..]),
            payout,
        };
        bet.receipt = Some(receipt.clone());
        if let Some(wallet) = &self.wallet {
            wallet.credit(payout);
        }
        Ok(receipt)
    }

    fn round_updates(&self) -> Option<watch::Receiver<u64>> {
        Some(self.rounds.subscribe())
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::wager::Address;

    fn request(index: u64) -> WagerRequest {
        let key = WagerKey::new(&Address::new([3; 32]), 1_000, 1, index);
        WagerRequest {
            wager_key: key,
            bet_per_line: 1_000,
            selected_paylines: 2,
            total_bet: 2_000,
        }
    }

    #[tokio::test]
    async fn submit__is_idempotent_per_wager_key() {
        // given
        let wallet = Arc::new(SimulatedWallet::new(Address::new([3; 32]), 10_000));
        let ledger = SimulatedLedger::new([1; 32]).with_wallet(wallet.clone());

        // when
        let first = ledger.submit(&request(1)).await.unwrap();
        ledger.advance_round();
        let second = ledger.submit(&request(1)).await.unwrap();

        // then
        assert_eq!(first, second);
        assert_eq!(ledger.submissions(), 1);
        assert_eq!(wallet.current_balance(), 8_000);
    }

    #[tokio::test]
    async fn seed__unavailable_until_round_is_produced() {
        let ledger = SimulatedLedger::new([1; 32]);
        assert_eq!(
            ledger.seed(2).await,
            Err(Error::SeedUnavailable { round: 2 })
        );
        ledger.advance_round();
        assert_eq!(ledger.seed(2).await, Ok(ledger.seed_for(2)));
    }

    #[tokio::test]
    async fn claim__pays_once_and_repeats_receipt() {
        // given
        let wallet = Arc::new(SimulatedWallet::new(Address::new([3; 32]), 10_000));
        let ledger = SimulatedLedger::new([1; 32]).with_wallet(wallet.clone());
        let req = request(9);
        ledger.submit(&req).await.unwrap();
        ledger.advance_round();

        // when
        let first = ledger.claim(&req.wager_key).await.unwrap();
        let second = ledger.claim(&req.wager_key).await.unwrap();

        // then
        assert_eq!(first, second);
        assert_eq!(wallet.current_balance(), 8_000 + first.payout);
    }

    #[tokio::test]
    async fn status__reports_the_settling_round() {
        // given
        let ledger = SimulatedLedger::new([1; 32]).with_round_future_delta(4);
        let submission = ledger.submit(&request(5)).await.unwrap();

        // when
        let status = ledger.status(&submission.tx_id).await.unwrap();

        // then
        assert_eq!(status.round, submission.commitment_round);
        assert_eq!(status.claim_round, submission.commitment_round + 4);
        assert_eq!(ledger.status_calls(), 1);
    }

    #[tokio::test]
    async fn gate__fails_the_configured_number_of_calls() {
        let ledger = SimulatedLedger::new([1; 32]);
        ledger.update_faults(|f| f.network_failures = 2);
        assert!(matches!(ledger.current_round().await, Err(Error::Network(_))));
        assert!(matches!(ledger.current_round().await, Err(Error::Network(_))));
        assert_eq!(ledger.current_round().await, Ok(1));
    }

    #[tokio::test]
    async fn submit__reports_rejection_reason() {
        let ledger = SimulatedLedger::new([1; 32]);
        ledger.update_faults(|f| f.reject_submissions = Some("bank locked".to_string()));
        assert_eq!(
            ledger.submit(&request(2)).await,
            Err(Error::Submission("bank locked".to_string()))
        );
    }
}
