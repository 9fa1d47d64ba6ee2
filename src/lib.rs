use tracing_subscriber::EnvFilter;

pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod export;
pub mod ledger;
pub mod processor;
pub mod queue;
pub mod reconstruct;
pub mod schedule;
pub mod slot;
pub mod spin;
pub mod test_helpers;
pub mod wager;
pub mod wallet;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{
    Error,
    Result,
};

/// Console logging, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
