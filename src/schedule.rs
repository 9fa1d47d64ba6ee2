use std::{
    ops::ControlFlow,
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};

/// A repeating background task that stops when dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Runs `f` every `period`, first after one full period, until it breaks or the task is dropped.
    pub fn every<F>(period: Duration, mut f: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if f().is_break() {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
