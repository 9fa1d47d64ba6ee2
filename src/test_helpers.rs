use crate::{
    Engine,
    EngineConfig,
    ledger::SimulatedLedger,
    spin::{
        QueuedSpin,
        SpinId,
    },
    wager::Address,
    wallet::SimulatedWallet,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time,
};

pub const ALICE: Address = Address::new([0xa1; 32]);
pub const STARTING_BALANCE: u64 = 1_000_000_000;

/// A simulated chain producing a round every second, and Alice's wallet on it.
pub struct TestContext {
    ledger: Arc<SimulatedLedger>,
    wallet: Arc<SimulatedWallet>,
    blocks: Option<JoinHandle<()>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::new_with_balance(STARTING_BALANCE)
    }

    pub fn new_with_balance(balance: u64) -> Self {
        let wallet = Arc::new(SimulatedWallet::new(ALICE, balance));
        let ledger = Arc::new(SimulatedLedger::new([0x5e; 32]).with_wallet(wallet.clone()));
        let blocks = Some(ledger.spawn_block_producer(Duration::from_secs(1)));
        Self {
            ledger,
            wallet,
            blocks,
        }
    }

    pub fn ledger(&self) -> Arc<SimulatedLedger> {
        self.ledger.clone()
    }

    pub fn wallet(&self) -> Arc<SimulatedWallet> {
        self.wallet.clone()
    }

    /// Freezes the chain at its current round.
    pub fn stop_blocks(&mut self) {
        if let Some(blocks) = self.blocks.take() {
            blocks.abort();
        }
    }

    pub fn engine(&self, config: EngineConfig) -> Engine<SimulatedLedger, SimulatedWallet> {
        Engine::start(config, self.ledger(), self.wallet()).unwrap()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.stop_blocks();
    }
}

/// Polls until the spin is terminal; panics after `limit` of tokio time.
pub async fn wait_for_terminal(
    engine: &Engine<SimulatedLedger, SimulatedWallet>,
    id: SpinId,
    limit: Duration,
) -> QueuedSpin {
    let deadline = time::Instant::now() + limit;
    loop {
        if let Some(spin) = engine.get(id).filter(|s| s.is_terminal()) {
            return spin;
        }
        if time::Instant::now() > deadline {
            panic!("{id} still {:?} after {limit:?}", engine.get(id).map(|s| s.status));
        }
        time::sleep(Duration::from_millis(100)).await;
    }
}
