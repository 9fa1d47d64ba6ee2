use crate::{
    Error,
    Result,
    ledger::TxId,
    reconstruct::ReconstructedOutcome,
    slot::PAYLINE_COUNT,
    wager::WagerKey,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpinId(u64);

impl SpinId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spin-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpinStatus {
    Pending,
    Submitting,
    Waiting,
    Processing,
    ReadyToClaim,
    Claiming,
    Completed,
    Failed,
    Expired,
}

impl SpinStatus {
    pub const ALL: [SpinStatus; 9] = [
        SpinStatus::Pending,
        SpinStatus::Submitting,
        SpinStatus::Waiting,
        SpinStatus::Processing,
        SpinStatus::ReadyToClaim,
        SpinStatus::Claiming,
        SpinStatus::Completed,
        SpinStatus::Failed,
        SpinStatus::Expired,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SpinStatus::Completed | SpinStatus::Failed | SpinStatus::Expired
        )
    }

    /// The lifecycle table. Anything not listed here is rejected.
    pub fn can_transition_to(self, next: SpinStatus) -> bool {
        use SpinStatus::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Expired => true,
            Submitting => self == Pending,
            Waiting => self == Submitting,
            Processing => self == Waiting,
            ReadyToClaim => self == Processing,
            Claiming => self == ReadyToClaim,
            Completed => matches!(self, Processing | Claiming),
            Pending => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SpinStatus::Pending => "PENDING",
            SpinStatus::Submitting => "SUBMITTING",
            SpinStatus::Waiting => "WAITING",
            SpinStatus::Processing => "PROCESSING",
            SpinStatus::ReadyToClaim => "READY_TO_CLAIM",
            SpinStatus::Claiming => "CLAIMING",
            SpinStatus::Completed => "COMPLETED",
            SpinStatus::Failed => "FAILED",
            SpinStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for SpinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status change, in the order the queue applied it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpinTransition {
    pub id: SpinId,
    pub from: SpinStatus,
    pub to: SpinStatus,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueuedSpin {
    pub id: SpinId,
    pub bet_per_line: u64,
    pub selected_paylines: u64,
    pub total_bet: u64,
    pub status: SpinStatus,
    /// Monotonic creation time, used for expiry and age limits.
    pub created: Instant,
    /// Insertion order; strictly increasing.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Set when the spin reaches a terminal status.
    pub finished: Option<Instant>,
    /// Index component of the wager key.
    pub wager_nonce: u64,
    pub wager_key: Option<WagerKey>,
    pub commitment_round: Option<u64>,
    pub outcome_round: Option<u64>,
    pub outcome: Option<ReconstructedOutcome>,
    pub winnings: Option<u64>,
    pub error: Option<String>,
    pub tx_id: Option<TxId>,
    pub claim_tx_id: Option<TxId>,
}

impl QueuedSpin {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time since enqueue, against the tokio clock.
    pub fn elapsed(&self) -> std::time::Duration {
        self.created.elapsed()
    }

    pub fn reconstruction_input(&self) -> Result<ReconstructionInput> {
        let wager_key = self.wager_key.ok_or_else(|| {
            Error::InvalidReconstructionInput(format!("{} has no wager key", self.id))
        })?;
        let claim_round = self.outcome_round.ok_or_else(|| {
            Error::InvalidReconstructionInput(format!("{} has no outcome round", self.id))
        })?;
        Ok(ReconstructionInput {
            wager_key,
            claim_round,
            bet_per_line: self.bet_per_line,
            active_paylines: self.selected_paylines as usize,
        })
    }
}

/// A spin found on the ledger rather than placed by this process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalSpin {
    pub wager_key: WagerKey,
    pub claim_round: u64,
    pub bet_per_line: u64,
    pub selected_paylines: u64,
    pub payout: u64,
    pub tx_id: Option<TxId>,
    pub claim_tx_id: Option<TxId>,
    pub placed_at: DateTime<Utc>,
}

impl HistoricalSpin {
    pub fn total_bet(&self) -> u64 {
        self.bet_per_line.saturating_mul(self.selected_paylines)
    }

    pub fn reconstruction_input(&self) -> Result<ReconstructionInput> {
        if self.wager_key.amount() != self.bet_per_line {
            return Err(Error::InvalidReconstructionInput(format!(
                "wager key amount {} does not match bet per line {}",
                self.wager_key.amount(),
                self.bet_per_line
            )));
        }
        Ok(ReconstructionInput {
            wager_key: self.wager_key,
            claim_round: self.claim_round,
            bet_per_line: self.bet_per_line,
            active_paylines: self.selected_paylines as usize,
        })
    }
}

/// What the reconstructor and evaluator need, whatever the spin's origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconstructionInput {
    pub wager_key: WagerKey,
    pub claim_round: u64,
    pub bet_per_line: u64,
    pub active_paylines: usize,
}

impl ReconstructionInput {
    pub fn validate(&self) -> Result<()> {
        if self.claim_round == 0 {
            return Err(Error::InvalidReconstructionInput(
                "claim round must be non-zero".to_string(),
            ));
        }
        if self.active_paylines > PAYLINE_COUNT {
            return Err(Error::InvalidReconstructionInput(format!(
                "{} active paylines, at most {PAYLINE_COUNT} exist",
                self.active_paylines
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SpinRecord {
    Live(QueuedSpin),
    Historical(HistoricalSpin),
}

impl SpinRecord {
    pub fn spin_id(&self) -> Option<SpinId> {
        match self {
            SpinRecord::Live(spin) => Some(spin.id),
            SpinRecord::Historical(_) => None,
        }
    }

    pub fn placed_at(&self) -> DateTime<Utc> {
        match self {
            SpinRecord::Live(spin) => spin.created_at,
            SpinRecord::Historical(spin) => spin.placed_at,
        }
    }

    pub fn round(&self) -> Option<u64> {
        match self {
            SpinRecord::Live(spin) => spin.outcome_round,
            SpinRecord::Historical(spin) => Some(spin.claim_round),
        }
    }

    pub fn tx_id(&self) -> Option<&str> {
        match self {
            SpinRecord::Live(spin) => spin.tx_id.as_deref(),
            SpinRecord::Historical(spin) => spin.tx_id.as_deref(),
        }
    }

    pub fn bet_per_line(&self) -> u64 {
        match self {
            SpinRecord::Live(spin) => spin.bet_per_line,
            SpinRecord::Historical(spin) => spin.bet_per_line,
        }
    }

    pub fn selected_paylines(&self) -> u64 {
        match self {
            SpinRecord::Live(spin) => spin.selected_paylines,
            SpinRecord::Historical(spin) => spin.selected_paylines,
        }
    }

    pub fn total_bet(&self) -> u64 {
        match self {
            SpinRecord::Live(spin) => spin.total_bet,
            SpinRecord::Historical(spin) => spin.total_bet(),
        }
    }

    pub fn payout(&self) -> u64 {
        match self {
            SpinRecord::Live(spin) => spin.winnings.unwrap_or(0),
            SpinRecord::Historical(spin) => spin.payout,
        }
    }

    /// Historical spins were settled on the ledger, so they count as completed.
    pub fn status(&self) -> SpinStatus {
        match self {
            SpinRecord::Live(spin) => spin.status,
            SpinRecord::Historical(_) => SpinStatus::Completed,
        }
    }

    pub fn reconstruction_input(&self) -> Result<ReconstructionInput> {
        match self {
            SpinRecord::Live(spin) => spin.reconstruction_input(),
            SpinRecord::Historical(spin) => spin.reconstruction_input(),
        }
    }
}
