use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use futures::future::join_all;
use reel_ledger::{
    Engine,
    EngineConfig,
    display::DisplayEvent,
    ledger::SimulatedLedger,
    spin::{
        QueuedSpin,
        SpinId,
    },
    wager::Address,
    wallet::SimulatedWallet,
};
use std::{
    path::PathBuf,
    sync::{
        Arc,
        OnceLock,
    },
    time::Duration,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    prelude::*,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(author, version, about = "Spin a provably-fair slot machine against a simulated ledger")]
struct Args {
    /// JSON engine config; every field is optional.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    spins: u32,

    #[arg(long, default_value_t = 1_000_000)]
    bet_per_line: u64,

    #[arg(long, default_value_t = 20)]
    paylines: u64,

    /// Also write a daily-rolling log file here.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1_000_000_000)]
    balance: u64,

    /// Print the history as CSV once every spin has settled.
    #[arg(long)]
    csv: bool,

    /// Re-derive every settled spin from its ledger seed and check the payout.
    #[arg(long)]
    verify: bool,
}

fn init_logging(log_dir: Option<&PathBuf>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = log_dir.map(|dir| {
        let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "reel-ledger.log"));
        let _ = LOG_GUARD.set(guard);
        fmt::layer().with_writer(writer).with_ansi(false)
    });
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
}

fn describe(event: &DisplayEvent) -> String {
    match event {
        DisplayEvent::SpinTakeover { spin_id } => format!("{spin_id}: reels spinning"),
        DisplayEvent::ContinueSpinning { spin_id } => format!("{spin_id}: still spinning..."),
        DisplayEvent::SpinCompleted {
            spin_id,
            outcome,
            winnings,
        } => format!(
            "{spin_id}: round {} paid {winnings}\n{}",
            outcome.claim_round,
            outcome.grid.rows_display()
        ),
        DisplayEvent::SpinFailed { spin_id, reason } => format!("{spin_id}: failed, {reason}"),
        DisplayEvent::WinCelebration { spin_id, winnings } => {
            format!("{spin_id}: WIN {winnings}")
        }
        DisplayEvent::LossFeedback { spin_id } => format!("{spin_id}: no win"),
        DisplayEvent::SpinReplay { spin_id, .. } => format!("{spin_id}: replay"),
    }
}

async fn settled<L, W>(engine: &Engine<L, W>, id: SpinId) -> Option<QueuedSpin>
where
    L: reel_ledger::ledger::LedgerClient,
    W: reel_ledger::wallet::WalletProvider,
{
    loop {
        let spin = engine.get(id)?;
        if spin.is_terminal() {
            return Some(spin);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    init_logging(args.log_dir.as_ref());

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .wrap_err_with(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let wallet = Arc::new(SimulatedWallet::new(
        Address::new(rand::random()),
        args.balance,
    ));
    let ledger = Arc::new(
        SimulatedLedger::new(rand::random())
            .with_wallet(wallet.clone())
            .with_round_future_delta(config.round_future_delta),
    );
    let blocks = ledger.spawn_block_producer(Duration::from_secs(1));
    let engine = Engine::start(config, ledger, wallet).wrap_err("starting engine")?;

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("{}", describe(&event));
        }
    });

    println!("balance: {}", engine.balance().await?);
    let mut ids = Vec::new();
    for _ in 0..args.spins {
        ids.push(
            engine
                .spin(args.bet_per_line, args.paylines)
                .wrap_err("placing spin")?,
        );
    }

    tokio::select! {
        _ = join_all(ids.iter().map(|id| settled(&engine, *id))) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received interrupt, exiting");
        }
    }

    println!("balance: {}", engine.balance().await?);
    if args.verify {
        for record in engine.history() {
            let label = record
                .spin_id()
                .map_or_else(|| "imported".to_string(), |id| id.to_string());
            match engine.verify(&record).await {
                Ok(outcome) => println!("{label}: verified {}", outcome.grid_string),
                Err(err) => println!("{label}: not verified, {err}"),
            }
        }
    }
    if args.csv {
        print!("{}", engine.export_csv().wrap_err("exporting history")?);
    }
    blocks.abort();
    printer.abort();
    engine.shutdown().await;
    Ok(())
}
