use crate::{
    Error,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::Path,
    time::Duration,
};

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 250;
pub const DEFAULT_SPIN_EXPIRY_MS: u64 = 120_000;
pub const DEFAULT_LEDGER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONTINUE_SPIN_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_HISTORY_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1_000;
// contract spin params, in micro units
pub const DEFAULT_MIN_BET: u64 = 1_000_000;
pub const DEFAULT_MAX_BET: u64 = 2_000_000_000;
pub const DEFAULT_SPIN_FEE: u64 = 50_500;
pub const DEFAULT_MAX_CLAIM_ROUND_DELTA: u64 = 1_000;

/// Tunables for the queue, processor and display coordinator.
///
/// Every field has a default, so a config file only needs to list what it overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tick_interval_ms: u64,
    pub spin_expiry_ms: u64,
    pub ledger_timeout_ms: u64,
    pub max_submit_attempts: u32,
    pub max_poll_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub continue_spin_interval_ms: u64,
    pub history_capacity: usize,
    pub history_max_age_ms: u64,
    pub notified_cache_capacity: usize,
    pub round_future_delta: u64,
    pub max_claim_round_delta: u64,
    pub min_bet: u64,
    pub max_bet: u64,
    pub spin_fee: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            spin_expiry_ms: DEFAULT_SPIN_EXPIRY_MS,
            ledger_timeout_ms: DEFAULT_LEDGER_TIMEOUT_MS,
            max_submit_attempts: 3,
            max_poll_retries: 5,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5_000,
            continue_spin_interval_ms: DEFAULT_CONTINUE_SPIN_INTERVAL_MS,
            history_capacity: 100,
            history_max_age_ms: DEFAULT_HISTORY_MAX_AGE_MS,
            notified_cache_capacity: 256,
            round_future_delta: 1,
            max_claim_round_delta: DEFAULT_MAX_CLAIM_ROUND_DELTA,
            min_bet: DEFAULT_MIN_BET,
            max_bet: DEFAULT_MAX_BET,
            spin_fee: DEFAULT_SPIN_FEE,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("spin_expiry_ms", self.spin_expiry_ms),
            ("ledger_timeout_ms", self.ledger_timeout_ms),
            ("retry_base_delay_ms", self.retry_base_delay_ms),
            ("continue_spin_interval_ms", self.continue_spin_interval_ms),
            ("round_future_delta", self.round_future_delta),
            ("max_claim_round_delta", self.max_claim_round_delta),
        ];
        if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Config(format!("{name} must be greater than zero")));
        }
        if self.max_submit_attempts == 0 || self.max_poll_retries == 0 {
            return Err(Error::Config(
                "retry bounds must allow at least one attempt".to_string(),
            ));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(Error::Config(
                "retry_max_delay_ms must be at least retry_base_delay_ms".to_string(),
            ));
        }
        if self.min_bet > self.max_bet {
            return Err(Error::Config(format!(
                "min_bet {} exceeds max_bet {}",
                self.min_bet, self.max_bet
            )));
        }
        if self.history_capacity == 0 || self.notified_cache_capacity == 0 {
            return Err(Error::Config("history capacities must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn spin_expiry(&self) -> Duration {
        Duration::from_millis(self.spin_expiry_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }

    pub fn continue_spin_interval(&self) -> Duration {
        Duration::from_millis(self.continue_spin_interval_ms)
    }

    pub fn history_max_age(&self) -> Duration {
        Duration::from_millis(self.history_max_age_ms)
    }

    /// Exponential backoff for the given (1-based) failed attempt, capped at the max delay.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }
}
