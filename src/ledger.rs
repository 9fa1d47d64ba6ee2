use crate::{
    Result,
    wager::{
        WagerKey,
        WagerRequest,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    future::Future,
};
use tokio::sync::watch;

pub mod simulated;

pub use simulated::{
    LedgerFaults,
    SimulatedLedger,
};

pub type TxId = String;

/// The ledger's per-round verifiable random value.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSeed {
    pub round: u64,
    pub bytes: [u8; 32],
}

impl BlockSeed {
    pub fn new(round: u64, bytes: [u8; 32]) -> Self {
        Self { round, bytes }
    }
}

impl fmt::Debug for BlockSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockSeed(round={}, {})", self.round, hex::encode(&self.bytes[..8]))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub tx_id: TxId,
    pub commitment_round: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxStatus {
    /// Round the bet was committed in.
    pub round: u64,
    /// Round whose seed settles the bet.
    pub claim_round: u64,
    pub confirmed: bool,
    pub claim_tx_id: Option<TxId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimReceipt {
    pub claim_tx_id: TxId,
    pub payout: u64,
}

/// Narrow view of the chain the engine talks to.
///
/// Every call may block on the network; the processor wraps each one in a timeout and
/// aborts it when the owning spin expires.
pub trait LedgerClient: Send + Sync + 'static {
    /// Idempotent per wager key: resubmitting a known key returns the original submission.
    fn submit(
        &self,
        request: &WagerRequest,
    ) -> impl Future<Output = Result<Submission>> + Send;

    fn status(&self, tx_id: &str) -> impl Future<Output = Result<TxStatus>> + Send;

    /// Fails with `Error::SeedUnavailable` until the round has been produced.
    fn seed(&self, round: u64) -> impl Future<Output = Result<BlockSeed>> + Send;

    fn current_round(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Idempotent per wager key: a second claim returns the original receipt.
    fn claim(
        &self,
        wager_key: &WagerKey,
    ) -> impl Future<Output = Result<ClaimReceipt>> + Send;

    /// Push notifications of new rounds, when the client supports them.
    fn round_updates(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}
