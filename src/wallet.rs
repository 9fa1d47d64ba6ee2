use crate::{
    Error,
    Result,
    wager::Address,
};
use std::{
    future::Future,
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

/// Source of the player's address and spendable balance.
///
/// The engine only reads the balance for display and for the submission-time
/// sufficiency check.
pub trait WalletProvider: Send + Sync + 'static {
    fn balance(&self) -> impl Future<Output = Result<u64>> + Send;

    fn address(&self) -> Address;
}

/// In-process wallet backing the simulated ledger and the tests.
#[derive(Debug)]
pub struct SimulatedWallet {
    address: Address,
    balance: AtomicU64,
}

impl SimulatedWallet {
    pub fn new(address: Address, balance: u64) -> Self {
        Self {
            address,
            balance: AtomicU64::new(balance),
        }
    }

    pub fn debit(&self, amount: u64) -> Result<()> {
        self.balance
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(amount)
            })
            .map(|_| ())
            .map_err(|current| {
                Error::Submission(format!(
                    "insufficient balance: {current} available, {amount} required"
                ))
            })
    }

    pub fn credit(&self, amount: u64) {
        self.balance.fetch_add(amount, Ordering::SeqCst);
    }

    pub fn current_balance(&self) -> u64 {
        self.balance.load(Ordering::SeqCst)
    }
}

impl WalletProvider for SimulatedWallet {
    async fn balance(&self) -> Result<u64> {
        Ok(self.current_balance())
    }

    fn address(&self) -> Address {
        self.address
    }
}
