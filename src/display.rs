use crate::{
    Error,
    Result,
    config::EngineConfig,
    queue::{
        QueueEvent,
        SpinQueue,
    },
    reconstruct::ReconstructedOutcome,
    schedule::ScheduledTask,
    spin::{
        QueuedSpin,
        SpinId,
        SpinStatus,
    },
};
use std::{
    ops::ControlFlow,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::{
    sync::broadcast,
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};

pub mod notified;

pub use notified::NotifiedCache;

const DISPLAY_EVENT_CAPACITY: usize = 256;

/// What the presentation layer is told to show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    SpinTakeover {
        spin_id: SpinId,
    },
    ContinueSpinning {
        spin_id: SpinId,
    },
    SpinCompleted {
        spin_id: SpinId,
        outcome: ReconstructedOutcome,
        winnings: u64,
    },
    SpinFailed {
        spin_id: SpinId,
        reason: String,
    },
    WinCelebration {
        spin_id: SpinId,
        winnings: u64,
    },
    LossFeedback {
        spin_id: SpinId,
    },
    SpinReplay {
        spin_id: SpinId,
        outcome: ReconstructedOutcome,
        winnings: u64,
    },
}

struct DisplayState {
    displayed: Option<SpinId>,
    ticker: Option<ScheduledTask>,
    notified: NotifiedCache,
}

/// Decides which spin owns the reels and announces each result once.
pub struct DisplayCoordinator {
    queue: SpinQueue,
    state: Arc<Mutex<DisplayState>>,
    events: broadcast::Sender<DisplayEvent>,
    continue_interval: Duration,
}

fn lock(state: &Mutex<DisplayState>) -> MutexGuard<'_, DisplayState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl DisplayCoordinator {
    pub fn new(queue: SpinQueue, config: &EngineConfig) -> Self {
        let (events, _) = broadcast::channel(DISPLAY_EVENT_CAPACITY);
        Self {
            queue,
            state: Arc::new(Mutex::new(DisplayState {
                displayed: None,
                ticker: None,
                notified: NotifiedCache::new(config.notified_cache_capacity),
            })),
            events,
            continue_interval: config.continue_spin_interval(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.events.subscribe()
    }

    pub fn displayed(&self) -> Option<SpinId> {
        lock(&self.state).displayed
    }

    fn emit(&self, event: DisplayEvent) {
        debug!(?event, "display event");
        let _ = self.events.send(event);
    }

    /// Hands the reels to `spin_id` and restarts the continue-spinning ticker for it.
    pub fn take_over(&self, spin_id: SpinId) {
        let mut state = lock(&self.state);
        state.displayed = Some(spin_id);
        let shared = self.state.clone();
        let events = self.events.clone();
        // replacing the ticker drops (and aborts) the previous one under the same lock
        state.ticker = Some(ScheduledTask::every(self.continue_interval, move || {
            let state = lock(&shared);
            if state.displayed != Some(spin_id) {
                return ControlFlow::Break(());
            }
            let _ = events.send(DisplayEvent::ContinueSpinning { spin_id });
            ControlFlow::Continue(())
        }));
        info!(spin_id = %spin_id, "spin took over the display");
        self.emit(DisplayEvent::SpinTakeover { spin_id });
    }

    /// Reconciles the display with a spin's current status. Safe to call repeatedly.
    pub fn observe(&self, spin: &QueuedSpin) {
        let mut state = lock(&self.state);
        let is_displayed = state.displayed == Some(spin.id);
        let has_result = matches!(
            spin.status,
            SpinStatus::ReadyToClaim | SpinStatus::Claiming | SpinStatus::Completed
        );

        if let (true, Some(outcome), Some(winnings)) =
            (has_result, spin.outcome.as_ref(), spin.winnings)
        {
            let eligible = is_displayed || self.display_is_idle(&state);
            if !eligible || !state.notified.insert(spin.id) {
                return;
            }
            state.displayed = Some(spin.id);
            state.ticker = None;
            drop(state);
            info!(spin_id = %spin.id, winnings, "spin result shown");
            self.emit(DisplayEvent::SpinCompleted {
                spin_id: spin.id,
                outcome: outcome.clone(),
                winnings,
            });
            if winnings > 0 {
                self.emit(DisplayEvent::WinCelebration {
                    spin_id: spin.id,
                    winnings,
                });
            } else {
                self.emit(DisplayEvent::LossFeedback { spin_id: spin.id });
            }
            return;
        }

        let failed = matches!(spin.status, SpinStatus::Failed | SpinStatus::Expired);
        if failed && is_displayed && state.notified.insert(spin.id) {
            state.ticker = None;
            drop(state);
            let reason = spin
                .error
                .clone()
                .unwrap_or_else(|| spin.status.to_string());
            warn!(spin_id = %spin.id, %reason, "displayed spin failed");
            self.emit(DisplayEvent::SpinFailed {
                spin_id: spin.id,
                reason,
            });
        }
    }

    /// Nothing displayed, or the displayed spin has already finished.
    fn display_is_idle(&self, state: &DisplayState) -> bool {
        match state.displayed {
            None => true,
            Some(id) => self.queue.get(id).is_none_or(|spin| spin.is_terminal()),
        }
    }

    /// Re-emits a past spin's result, regardless of whether it was announced.
    pub fn replay(&self, spin_id: SpinId) -> Result<()> {
        let spin = self.queue.get(spin_id).ok_or(Error::SpinNotFound(spin_id))?;
        let (Some(outcome), Some(winnings)) = (spin.outcome, spin.winnings) else {
            return Err(Error::InvalidReconstructionInput(format!(
                "{spin_id} has no outcome to replay"
            )));
        };
        self.emit(DisplayEvent::SpinReplay {
            spin_id,
            outcome,
            winnings,
        });
        Ok(())
    }

    /// Catches up after missed queue events. Only the displayed spin and a spin
    /// enqueued after it are reconciled; older background results stay quiet.
    pub fn resync(&self) {
        let Some(newest) = self.queue.list_recent(1).pop() else {
            return;
        };
        let displayed = self.displayed().and_then(|id| self.queue.get(id));
        if let Some(spin) = &displayed {
            self.observe(spin);
        }
        if displayed.is_some_and(|shown| newest.sequence <= shown.sequence) {
            return;
        }
        if newest.is_terminal() {
            self.observe(&newest);
        } else {
            self.take_over(newest.id);
        }
    }

    pub fn forget(&self, ids: &[SpinId]) {
        lock(&self.state).notified.forget(ids);
    }

    /// Follows the queue until it is dropped, reconciling on every event.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let mut queue_events = self.queue.subscribe();
        tokio::spawn(async move {
            loop {
                match queue_events.recv().await {
                    Ok(QueueEvent::Enqueued(id)) => self.take_over(id),
                    Ok(QueueEvent::Transitioned(transition)) => {
                        if let Some(spin) = self.queue.get(transition.id) {
                            self.observe(&spin);
                        }
                    }
                    Ok(QueueEvent::Evicted(ids)) => self.forget(&ids),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "display fell behind the queue, resyncing");
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        ledger::BlockSeed,
        slot::Grid,
        wager::{
            Address,
            WagerKey,
        },
    };
    use tokio::time;

    fn key() -> WagerKey {
        WagerKey::new(&Address::new([1; 32]), 1_000_000, 0, 1)
    }

    fn outcome(total_winnings: u64) -> ReconstructedOutcome {
        let grid = Grid::from_bytes(b"AAABBBCCCDDD___").unwrap();
        ReconstructedOutcome {
            grid,
            grid_string: grid.grid_string(),
            wager_key: key(),
            block_seed: BlockSeed::new(2, [0; 32]),
            claim_round: 2,
            winning_paylines: vec![],
            total_winnings,
            is_verified: true,
        }
    }

    fn setup() -> (SpinQueue, DisplayCoordinator, broadcast::Receiver<DisplayEvent>) {
        let config = EngineConfig::default();
        let queue = SpinQueue::new(Arc::new(config.clone()));
        let display = DisplayCoordinator::new(queue.clone(), &config);
        let events = display.subscribe();
        (queue, display, events)
    }

    fn settle(queue: &SpinQueue, id: SpinId, winnings: u64) -> QueuedSpin {
        queue.begin_submission(id, key()).unwrap();
        queue.mark_waiting(id, "TX".to_string(), 1).unwrap();
        queue.mark_processing(id, 2).unwrap();
        let settled_loss = (winnings == 0).then(|| "CLAIM".to_string());
        queue
            .record_outcome(id, outcome(winnings), settled_loss)
            .unwrap()
    }

    fn drain(events: &mut broadcast::Receiver<DisplayEvent>) -> Vec<DisplayEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn observe__announces_result_exactly_once() {
        // given
        let (queue, display, mut events) = setup();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(id);
        let ready = settle(&queue, id, 5_000_000);

        // when
        display.observe(&ready);
        display.observe(&ready);
        queue.begin_claim(id).unwrap();
        let done = queue.complete_claim(id, "CLAIM".to_string()).unwrap();
        display.observe(&done);

        // then
        let completed: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, DisplayEvent::SpinCompleted { .. }))
            .collect();
        assert_eq!(
            completed,
            vec![DisplayEvent::SpinCompleted {
                spin_id: id,
                outcome: outcome(5_000_000),
                winnings: 5_000_000,
            }]
        );
    }

    #[tokio::test]
    async fn observe__loss_follows_completion() {
        let (queue, display, mut events) = setup();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(id);
        display.observe(&settle(&queue, id, 0));
        assert_eq!(
            drain(&mut events),
            vec![
                DisplayEvent::SpinTakeover { spin_id: id },
                DisplayEvent::SpinCompleted {
                    spin_id: id,
                    outcome: outcome(0),
                    winnings: 0,
                },
                DisplayEvent::LossFeedback { spin_id: id },
            ]
        );
    }

    #[tokio::test]
    async fn observe__ignores_background_result_while_another_spin_is_shown() {
        // given
        let (queue, display, mut events) = setup();
        let background = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        let shown = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(shown);
        drain(&mut events);

        // when
        display.observe(&settle(&queue, background, 0));

        // then
        assert!(drain(&mut events).is_empty());
        assert_eq!(display.displayed(), Some(shown));
    }

    #[tokio::test]
    async fn observe__failure_of_displayed_spin_is_reported() {
        let (queue, display, mut events) = setup();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(id);
        drain(&mut events);
        let failed = queue.fail(id, "submission rejected: closed").unwrap();
        display.observe(&failed);
        display.observe(&failed);
        assert_eq!(
            drain(&mut events),
            vec![DisplayEvent::SpinFailed {
                spin_id: id,
                reason: "submission rejected: closed".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn resync__skips_results_older_than_the_displayed_spin() {
        // given
        let (queue, display, mut events) = setup();
        let background = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        let shown = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(shown);
        display.observe(&settle(&queue, shown, 0));
        settle(&queue, background, 5_000_000);
        drain(&mut events);

        // when
        display.resync();

        // then
        assert!(drain(&mut events).is_empty());
        assert_eq!(display.displayed(), Some(shown));
    }

    #[tokio::test]
    async fn resync__hands_the_reels_to_a_spin_enqueued_while_lagging() {
        // given
        let (queue, display, mut events) = setup();
        let shown = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(shown);
        let missed = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        drain(&mut events);

        // when
        display.resync();

        // then
        assert_eq!(
            drain(&mut events),
            vec![DisplayEvent::SpinTakeover { spin_id: missed }]
        );
        assert_eq!(display.displayed(), Some(missed));
    }

    #[tokio::test(start_paused = true)]
    async fn take_over__ticks_only_for_the_newest_spin() {
        // given
        let (queue, display, mut events) = setup();
        let first = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        let second = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.take_over(first);
        time::sleep(Duration::from_millis(2_500)).await;

        // when
        display.take_over(second);
        time::sleep(Duration::from_millis(4_500)).await;

        // then
        assert_eq!(
            drain(&mut events),
            vec![
                DisplayEvent::SpinTakeover { spin_id: first },
                DisplayEvent::ContinueSpinning { spin_id: first },
                DisplayEvent::SpinTakeover { spin_id: second },
                DisplayEvent::ContinueSpinning { spin_id: second },
                DisplayEvent::ContinueSpinning { spin_id: second },
            ]
        );
    }

    #[tokio::test]
    async fn replay__re_emits_announced_result() {
        let (queue, display, mut events) = setup();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        display.observe(&settle(&queue, id, 0));
        drain(&mut events);
        display.replay(id).unwrap();
        assert_eq!(
            drain(&mut events),
            vec![DisplayEvent::SpinReplay {
                spin_id: id,
                outcome: outcome(0),
                winnings: 0,
            }]
        );
        assert_eq!(
            display.replay(SpinId::new(99)),
            Err(Error::SpinNotFound(SpinId::new(99)))
        );
    }
}
