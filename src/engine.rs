use crate::{
    Error,
    Result,
    config::EngineConfig,
    display::{
        DisplayCoordinator,
        DisplayEvent,
    },
    export,
    ledger::LedgerClient,
    processor::{
        ProcessorHandle,
        QueueProcessor,
    },
    queue::SpinQueue,
    reconstruct::{
        OutcomeReconstructor,
        ReconstructedOutcome,
    },
    spin::{
        HistoricalSpin,
        QueuedSpin,
        SpinId,
        SpinRecord,
        SpinStatus,
    },
    wallet::WalletProvider,
};
use std::sync::Arc;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time,
};
use tracing::info;

/// The spin lifecycle wired to one ledger and one wallet.
pub struct Engine<L, W> {
    config: Arc<EngineConfig>,
    queue: SpinQueue,
    display: Arc<DisplayCoordinator>,
    wallet: Arc<W>,
    processor: ProcessorHandle,
    display_task: JoinHandle<()>,
    reconstructor: OutcomeReconstructor<L>,
    ledger: Arc<L>,
}

impl<L: LedgerClient, W: WalletProvider> Engine<L, W> {
    pub fn start(config: EngineConfig, ledger: Arc<L>, wallet: Arc<W>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let queue = SpinQueue::new(config.clone());
        let display = Arc::new(DisplayCoordinator::new(queue.clone(), &config));
        let display_task = display.clone().spawn();
        let processor =
            QueueProcessor::spawn(queue.clone(), ledger.clone(), wallet.clone(), config.clone());
        let reconstructor = OutcomeReconstructor::new(ledger.clone(), config.max_claim_round_delta);
        info!(address = %wallet.address(), "engine started");
        Ok(Self {
            config,
            queue,
            display,
            wallet,
            processor,
            display_task,
            reconstructor,
            ledger,
        })
    }

    /// Places a spin on the first `paylines` paylines.
    pub fn spin(&self, bet_per_line: u64, paylines: u64) -> Result<SpinId> {
        let total_bet = bet_per_line.saturating_mul(paylines);
        self.queue.enqueue(bet_per_line, paylines, total_bet)
    }

    pub async fn balance(&self) -> Result<u64> {
        self.wallet.balance().await
    }

    pub fn get(&self, id: SpinId) -> Option<QueuedSpin> {
        self.queue.get(id)
    }

    pub fn history(&self) -> Vec<SpinRecord> {
        self.queue.history()
    }

    pub fn import_historical(&self, spin: HistoricalSpin) {
        self.queue.import_historical(spin);
    }

    pub fn export_csv(&self) -> Result<String> {
        export::export_csv(&self.queue.history())
    }

    /// Rebuilds a settled spin from its ledger seed and checks the recorded payout.
    /// Live and imported spins go through the same projection.
    pub async fn verify(&self, record: &SpinRecord) -> Result<ReconstructedOutcome> {
        if record.status() != SpinStatus::Completed {
            return Err(Error::InvalidReconstructionInput(format!(
                "only completed spins can be verified, this one is {}",
                record.status()
            )));
        }
        let input = record.reconstruction_input()?;
        let audit = self.reconstructor.audit(&input, record.payout());
        time::timeout(self.config.ledger_timeout(), audit).await?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.display.subscribe()
    }

    pub fn replay(&self, id: SpinId) -> Result<()> {
        self.display.replay(id)
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    pub fn queue(&self) -> &SpinQueue {
        &self.queue
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn shutdown(self) {
        self.processor.shutdown().await;
        self.display_task.abort();
        info!("engine stopped");
    }
}
