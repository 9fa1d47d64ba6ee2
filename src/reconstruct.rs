use crate::{
    Error,
    Result,
    ledger::{
        BlockSeed,
        LedgerClient,
    },
    slot::{
        GRID_LEN,
        Grid,
        PaylineEvaluator,
        ReelSet,
        WinningPayline,
    },
    spin::ReconstructionInput,
    wager::WagerKey,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::Arc;
use tracing::debug;

/// A spin's grid as re-derived from the ledger seed, with its payline evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructedOutcome {
    pub grid: Grid,
    pub grid_string: String,
    pub wager_key: WagerKey,
    pub block_seed: BlockSeed,
    pub claim_round: u64,
    pub winning_paylines: Vec<WinningPayline>,
    pub total_winnings: u64,
    /// Only when the seed came live from the ledger for exactly `claim_round`.
    pub is_verified: bool,
}

pub struct OutcomeReconstructor<L> {
    ledger: Arc<L>,
    reels: ReelSet,
    evaluator: PaylineEvaluator,
    max_claim_round_delta: u64,
}

impl<L> Clone for OutcomeReconstructor<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            reels: self.reels.clone(),
            evaluator: self.evaluator.clone(),
            max_claim_round_delta: self.max_claim_round_delta,
        }
    }
}

impl<L> OutcomeReconstructor<L> {
    pub fn new(ledger: Arc<L>, max_claim_round_delta: u64) -> Self {
        Self {
            ledger,
            reels: ReelSet::canonical(),
            evaluator: PaylineEvaluator::default(),
            max_claim_round_delta,
        }
    }

    pub fn with_reels(mut self, reels: ReelSet) -> Self {
        self.reels = reels;
        self
    }

    pub fn with_evaluator(mut self, evaluator: PaylineEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn evaluator(&self) -> &PaylineEvaluator {
        &self.evaluator
    }

    /// Derives and scores the grid from a seed the caller already holds.
    ///
    /// The result is never marked verified; see [`OutcomeReconstructor::reconstruct`].
    pub fn reconstruct_with_seed(
        &self,
        input: &ReconstructionInput,
        seed: &BlockSeed,
    ) -> Result<ReconstructedOutcome> {
        input.validate()?;
        if seed.round != input.claim_round {
            return Err(Error::InvalidReconstructionInput(format!(
                "seed is for round {}, spin settles on round {}",
                seed.round, input.claim_round
            )));
        }
        let bytes = self
            .reels
            .derive_grid_bytes(&seed.bytes, input.wager_key.as_bytes());
        let grid = Self::checked_grid(&bytes)?;
        let evaluation =
            self.evaluator
                .evaluate(&grid, input.bet_per_line, input.active_paylines);
        Ok(ReconstructedOutcome {
            grid,
            grid_string: grid.grid_string(),
            wager_key: input.wager_key,
            block_seed: *seed,
            claim_round: input.claim_round,
            winning_paylines: evaluation.winning_paylines,
            total_winnings: evaluation.total_winnings,
            is_verified: false,
        })
    }

    fn checked_grid(bytes: &[u8; GRID_LEN]) -> Result<Grid> {
        let grid = Grid::from_bytes(bytes)
            .map_err(|e| Error::ReconstructionMismatch(e.to_string()))?;
        if grid.to_bytes() != *bytes {
            return Err(Error::ReconstructionMismatch(format!(
                "grid {} does not round trip to {}",
                grid.grid_string(),
                String::from_utf8_lossy(bytes)
            )));
        }
        Ok(grid)
    }
}

impl<L: LedgerClient> OutcomeReconstructor<L> {
    /// Fetches the claim round's seed live and rebuilds the outcome.
    ///
    /// `SeedUnavailable` while the round is not yet produced; a seed older than
    /// `max_claim_round_delta` rounds is stale and rejected.
    pub async fn reconstruct(&self, input: &ReconstructionInput) -> Result<ReconstructedOutcome> {
        input.validate()?;
        let seed = self.ledger.seed(input.claim_round).await?;
        let current = self.ledger.current_round().await?;
        let age = current.saturating_sub(input.claim_round);
        if age > self.max_claim_round_delta {
            return Err(Error::InvalidReconstructionInput(format!(
                "seed for round {} is stale ({age} rounds old)",
                input.claim_round
            )));
        }
        let mut outcome = self.reconstruct_with_seed(input, &seed)?;
        outcome.is_verified = true;
        debug!(
            round = input.claim_round,
            grid = %outcome.grid_string,
            winnings = outcome.total_winnings,
            "outcome reconstructed"
        );
        Ok(outcome)
    }

    /// Re-derives a settled spin from a live seed and checks it against the payout the
    /// ledger recorded. Settled bets are audited at any age, so no staleness window.
    pub async fn audit(
        &self,
        input: &ReconstructionInput,
        payout: u64,
    ) -> Result<ReconstructedOutcome> {
        let seed = self.ledger.seed(input.claim_round).await?;
        let mut outcome = self.reconstruct_with_seed(input, &seed)?;
        outcome.is_verified = true;
        if outcome.total_winnings != payout {
            return Err(Error::ReconstructionMismatch(format!(
                "grid {} pays {} but the ledger recorded {payout}",
                outcome.grid_string, outcome.total_winnings
            )));
        }
        Ok(outcome)
    }
}
