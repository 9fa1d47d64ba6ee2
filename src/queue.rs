use crate::{
    Error,
    Result,
    config::EngineConfig,
    ledger::TxId,
    reconstruct::ReconstructedOutcome,
    slot::PAYLINE_COUNT,
    spin::{
        HistoricalSpin,
        QueuedSpin,
        SpinId,
        SpinRecord,
        SpinStatus,
        SpinTransition,
    },
    wager::WagerKey,
};
use chrono::Utc;
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::{
        Notify,
        broadcast,
    },
    time::Instant,
};
use tracing::{
    debug,
    error,
    info,
};

const EVENT_CAPACITY: usize = 1024;

/// Everything observers of the queue are told about, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueued(SpinId),
    Transitioned(SpinTransition),
    /// Terminal spins that left recent history.
    Evicted(Vec<SpinId>),
}

#[derive(Default)]
struct QueueState {
    spins: BTreeMap<SpinId, QueuedSpin>,
    historical: Vec<HistoricalSpin>,
    next_sequence: u64,
}

/// Authoritative store of in-flight and recently finished spins.
///
/// Cheap to clone; all clones share one state. Every status change goes through the
/// lifecycle table in [`SpinStatus::can_transition_to`].
#[derive(Clone)]
pub struct SpinQueue {
    state: Arc<RwLock<QueueState>>,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<QueueEvent>,
    enqueued: Arc<Notify>,
    config: Arc<EngineConfig>,
}

impl SpinQueue {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(RwLock::new(QueueState::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            events,
            enqueued: Arc::new(Notify::new()),
            config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Resolves after the next enqueue.
    pub async fn enqueued(&self) {
        self.enqueued.notified().await
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn enqueue(
        &self,
        bet_per_line: u64,
        selected_paylines: u64,
        total_bet: u64,
    ) -> Result<SpinId> {
        self.validate_wager(bet_per_line, selected_paylines, total_bet)?;
        let id = SpinId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        {
            let mut state = self.write();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.spins.insert(
                id,
                QueuedSpin {
                    id,
                    bet_per_line,
                    selected_paylines,
                    total_bet,
                    status: SpinStatus::Pending,
                    created: Instant::now(),
                    sequence,
                    created_at: Utc::now(),
                    finished: None,
                    wager_nonce: rand::random(),
                    wager_key: None,
                    commitment_round: None,
                    outcome_round: None,
                    outcome: None,
                    winnings: None,
                    error: None,
                    tx_id: None,
                    claim_tx_id: None,
                },
            );
        }
        info!(spin_id = %id, bet_per_line, selected_paylines, total_bet, "spin enqueued");
        let _ = self.events.send(QueueEvent::Enqueued(id));
        self.enqueued.notify_one();
        Ok(id)
    }

    fn validate_wager(
        &self,
        bet_per_line: u64,
        selected_paylines: u64,
        total_bet: u64,
    ) -> Result<()> {
        if bet_per_line == 0 || selected_paylines == 0 || total_bet == 0 {
            return Err(Error::InvalidWager(
                "bet per line, paylines and total bet must be positive".to_string(),
            ));
        }
        if selected_paylines > PAYLINE_COUNT as u64 {
            return Err(Error::InvalidWager(format!(
                "{selected_paylines} paylines selected, at most {PAYLINE_COUNT} available"
            )));
        }
        if bet_per_line.checked_mul(selected_paylines) != Some(total_bet) {
            return Err(Error::InvalidWager(format!(
                "total bet {total_bet} != {bet_per_line} x {selected_paylines}"
            )));
        }
        if total_bet < self.config.min_bet || total_bet > self.config.max_bet {
            return Err(Error::InvalidWager(format!(
                "total bet {total_bet} outside [{}, {}]",
                self.config.min_bet, self.config.max_bet
            )));
        }
        Ok(())
    }

    pub fn get(&self, id: SpinId) -> Option<QueuedSpin> {
        self.read().spins.get(&id).cloned()
    }

    pub fn list_pending(&self) -> Vec<QueuedSpin> {
        self.read()
            .spins
            .values()
            .filter(|s| s.status == SpinStatus::Pending)
            .cloned()
            .collect()
    }

    /// Every non-terminal spin, oldest first.
    pub fn list_active(&self) -> Vec<QueuedSpin> {
        self.read()
            .spins
            .values()
            .filter(|s| !s.is_terminal())
            .cloned()
            .collect()
    }

    /// The `limit` most recently enqueued spins, newest first.
    pub fn list_recent(&self, limit: usize) -> Vec<QueuedSpin> {
        self.read().spins.values().rev().take(limit).cloned().collect()
    }

    /// Terminal spins and imported ledger spins, most recent first.
    ///
    /// Live spins keep enqueue order whatever the wall clock did. Imported spins are
    /// merged in by the time the ledger placed them.
    pub fn history(&self) -> Vec<SpinRecord> {
        let state = self.read();
        let mut live: Vec<&QueuedSpin> =
            state.spins.values().filter(|s| s.is_terminal()).collect();
        live.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        let mut historical: Vec<&HistoricalSpin> = state.historical.iter().collect();
        historical.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        live.into_iter()
            .cloned()
            .map(SpinRecord::Live)
            .merge_by(
                historical.into_iter().cloned().map(SpinRecord::Historical),
                |a, b| a.placed_at() >= b.placed_at(),
            )
            .collect()
    }

    pub fn import_historical(&self, spin: HistoricalSpin) {
        let mut state = self.write();
        if state
            .historical
            .iter()
            .any(|known| known.wager_key == spin.wager_key)
        {
            return;
        }
        state.historical.push(spin);
    }

    /// Removes terminal spins at least `age` old. `Duration::ZERO` removes every
    /// terminal spin; live spins are never removed.
    pub fn clear_older_than(&self, age: Duration) -> Vec<SpinId> {
        let removed: Vec<SpinId> = {
            let mut state = self.write();
            let removed: Vec<SpinId> = state
                .spins
                .values()
                .filter(|s| s.is_terminal() && s.elapsed() >= age)
                .map(|s| s.id)
                .collect();
            for id in &removed {
                state.spins.remove(id);
            }
            removed
        };
        self.announce_eviction(&removed);
        removed
    }

    /// Applies the history bounds: at most `history_capacity` terminal spins, none
    /// finished longer than `history_max_age` ago.
    pub fn evict_history(&self) -> Vec<SpinId> {
        let capacity = self.config.history_capacity;
        let max_age = self.config.history_max_age();
        let evicted: Vec<SpinId> = {
            let mut state = self.write();
            let terminal: Vec<(SpinId, Option<Instant>)> = state
                .spins
                .values()
                .filter(|s| s.is_terminal())
                .map(|s| (s.id, s.finished))
                .collect();
            let overflow = terminal.len().saturating_sub(capacity);
            let evicted: Vec<SpinId> = terminal
                .iter()
                .enumerate()
                .filter(|(position, (_, finished))| {
                    *position < overflow
                        || finished.is_some_and(|at| at.elapsed() > max_age)
                })
                .map(|(_, (id, _))| *id)
                .collect();
            for id in &evicted {
                state.spins.remove(id);
            }
            if let Ok(max_age) = chrono::Duration::from_std(max_age) {
                let cutoff = Utc::now() - max_age;
                state.historical.retain(|h| h.placed_at >= cutoff);
            }
            let excess = state.historical.len().saturating_sub(capacity);
            state.historical.drain(..excess);
            evicted
        };
        self.announce_eviction(&evicted);
        evicted
    }

    fn announce_eviction(&self, ids: &[SpinId]) {
        if ids.is_empty() {
            return;
        }
        debug!(count = ids.len(), "spins left recent history");
        let _ = self.events.send(QueueEvent::Evicted(ids.to_vec()));
    }

    /// Applies one lifecycle step. Invalid steps leave the spin untouched.
    fn transition(
        &self,
        id: SpinId,
        to: SpinStatus,
        update: impl FnOnce(&mut QueuedSpin),
    ) -> Result<QueuedSpin> {
        let (from, snapshot) = {
            let mut state = self.write();
            let spin = state.spins.get_mut(&id).ok_or(Error::SpinNotFound(id))?;
            let from = spin.status;
            if !from.can_transition_to(to) {
                return Err(Error::InvalidTransition { id, from, to });
            }
            update(spin);
            spin.status = to;
            if to.is_terminal() {
                spin.finished = Some(Instant::now());
            }
            (from, spin.clone())
        };
        match to {
            SpinStatus::Failed | SpinStatus::Expired => error!(
                spin_id = %id,
                %from,
                %to,
                error = snapshot.error.as_deref().unwrap_or_default(),
                "spin ended without a result"
            ),
            _ => info!(spin_id = %id, %from, %to, "spin transitioned"),
        }
        let _ = self
            .events
            .send(QueueEvent::Transitioned(SpinTransition { id, from, to }));
        Ok(snapshot)
    }

    pub fn begin_submission(&self, id: SpinId, wager_key: WagerKey) -> Result<QueuedSpin> {
        self.transition(id, SpinStatus::Submitting, |spin| {
            spin.wager_key = Some(wager_key);
        })
    }

    pub fn mark_waiting(
        &self,
        id: SpinId,
        tx_id: TxId,
        commitment_round: u64,
    ) -> Result<QueuedSpin> {
        self.transition(id, SpinStatus::Waiting, |spin| {
            spin.tx_id = Some(tx_id);
            spin.commitment_round = Some(commitment_round);
        })
    }

    pub fn mark_processing(&self, id: SpinId, outcome_round: u64) -> Result<QueuedSpin> {
        self.transition(id, SpinStatus::Processing, |spin| {
            spin.outcome_round = Some(outcome_round);
        })
    }

    /// Records outcome and winnings together. A loss already settled by `claim_tx_id`
    /// completes the spin, anything else waits for the claim.
    pub fn record_outcome(
        &self,
        id: SpinId,
        outcome: ReconstructedOutcome,
        claim_tx_id: Option<TxId>,
    ) -> Result<QueuedSpin> {
        let to = if outcome.total_winnings == 0 && claim_tx_id.is_some() {
            SpinStatus::Completed
        } else {
            SpinStatus::ReadyToClaim
        };
        self.transition(id, to, |spin| {
            spin.winnings = Some(outcome.total_winnings);
            spin.outcome = Some(outcome);
            if to == SpinStatus::Completed {
                spin.claim_tx_id = claim_tx_id;
            }
        })
    }

    pub fn begin_claim(&self, id: SpinId) -> Result<QueuedSpin> {
        self.transition(id, SpinStatus::Claiming, |_| {})
    }

    pub fn complete_claim(&self, id: SpinId, claim_tx_id: TxId) -> Result<QueuedSpin> {
        self.transition(id, SpinStatus::Completed, |spin| {
            spin.claim_tx_id = Some(claim_tx_id);
        })
    }

    pub fn fail(&self, id: SpinId, reason: impl Into<String>) -> Result<QueuedSpin> {
        let reason = reason.into();
        self.transition(id, SpinStatus::Failed, |spin| spin.error = Some(reason))
    }

    pub fn expire(&self, id: SpinId, reason: impl Into<String>) -> Result<QueuedSpin> {
        let reason = reason.into();
        self.transition(id, SpinStatus::Expired, |spin| spin.error = Some(reason))
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        ledger::BlockSeed,
        slot::Grid,
        wager::Address,
    };

    fn queue() -> SpinQueue {
        SpinQueue::new(Arc::new(EngineConfig::default()))
    }

    fn outcome(total_winnings: u64) -> ReconstructedOutcome {
        let grid = Grid::from_bytes(b"ABCDAABCDABCD_A").unwrap();
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

    fn key() -> WagerKey {
        WagerKey::new(&Address::new([1; 32]), 1_000_000, 0, 1)
    }

    fn finish(queue: &SpinQueue, id: SpinId) {
        queue.begin_submission(id, key()).unwrap();
        queue.mark_waiting(id, "TX".to_string(), 1).unwrap();
        queue.mark_processing(id, 2).unwrap();
        queue
            .record_outcome(id, outcome(0), Some("CTX".to_string()))
            .unwrap();
    }

    #[test]
    fn enqueue__creates_pending_spin_with_total() {
        // given
        let queue = queue();

        // when
        let id = queue.enqueue(1_000_000, 5, 5_000_000).unwrap();

        // then
        let spin = queue.get(id).unwrap();
        assert_eq!(spin.status, SpinStatus::Pending);
        assert_eq!(spin.total_bet, 5_000_000);
        assert_eq!(spin.outcome, None);
        assert_eq!(spin.winnings, None);
    }

    #[test]
    fn enqueue__rejects_inconsistent_total() {
        let queue = queue();
        assert!(matches!(
            queue.enqueue(1_000_000, 5, 4_000_000),
            Err(Error::InvalidWager(_))
        ));
        assert!(matches!(queue.enqueue(0, 5, 0), Err(Error::InvalidWager(_))));
        assert!(matches!(
            queue.enqueue(1_000_000, 21, 21_000_000),
            Err(Error::InvalidWager(_))
        ));
        assert!(queue.list_recent(10).is_empty());
    }

    #[test]
    fn enqueue__rejects_bets_outside_limits() {
        let queue = queue();
        assert!(matches!(queue.enqueue(1, 1, 1), Err(Error::InvalidWager(_))));
        assert!(matches!(
            queue.enqueue(200_000_000, 20, 4_000_000_000),
            Err(Error::InvalidWager(_))
        ));
    }

    #[test]
    fn transition__rejects_skipping_and_leaves_spin_untouched() {
        // given
        let queue = queue();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();

        // when
        let result = queue.mark_processing(id, 9);

        // then
        assert_eq!(
            result,
            Err(Error::InvalidTransition {
                id,
                from: SpinStatus::Pending,
                to: SpinStatus::Processing,
            })
        );
        let spin = queue.get(id).unwrap();
        assert_eq!(spin.status, SpinStatus::Pending);
        assert_eq!(spin.outcome_round, None);
    }

    #[test]
    fn transition__terminal_spin_cannot_move() {
        // given
        let queue = queue();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        finish(&queue, id);

        // when
        let failed = queue.fail(id, "late");
        let expired = queue.expire(id, "late");

        // then
        assert!(matches!(failed, Err(Error::InvalidTransition { .. })));
        assert!(matches!(expired, Err(Error::InvalidTransition { .. })));
        assert_eq!(queue.get(id).unwrap().status, SpinStatus::Completed);
        assert_eq!(queue.get(id).unwrap().error, None);
    }

    #[test]
    fn record_outcome__sets_outcome_and_winnings_together() {
        let queue = queue();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        queue.begin_submission(id, key()).unwrap();
        queue.mark_waiting(id, "TX".to_string(), 1).unwrap();
        queue.mark_processing(id, 2).unwrap();

        let spin = queue.record_outcome(id, outcome(200_000_000), None).unwrap();

        assert_eq!(spin.status, SpinStatus::ReadyToClaim);
        assert_eq!(spin.winnings, Some(200_000_000));
        assert_eq!(spin.outcome.map(|o| o.total_winnings), Some(200_000_000));
    }

    #[test]
    fn record_outcome__unsettled_loss_still_waits_for_its_claim() {
        // given
        let queue = queue();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        queue.begin_submission(id, key()).unwrap();
        queue.mark_waiting(id, "TX".to_string(), 1).unwrap();
        queue.mark_processing(id, 2).unwrap();

        // when
        let unsettled = queue.record_outcome(id, outcome(0), None).unwrap();

        // then
        assert_eq!(unsettled.status, SpinStatus::ReadyToClaim);
        assert_eq!(unsettled.claim_tx_id, None);
    }

    #[test]
    fn record_outcome__settled_loss_completes_with_its_claim() {
        let queue = queue();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        finish(&queue, id);
        let spin = queue.get(id).unwrap();
        assert_eq!(spin.status, SpinStatus::Completed);
        assert_eq!(spin.winnings, Some(0));
        assert_eq!(spin.claim_tx_id.as_deref(), Some("CTX"));
    }

    #[test]
    fn history__follows_enqueue_order_when_the_wall_clock_steps_back() {
        // given
        let queue = queue();
        let first = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        let second = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        finish(&queue, first);
        finish(&queue, second);
        let stepped_back = Utc::now() - chrono::Duration::hours(1);
        queue.write().spins.get_mut(&second).unwrap().created_at = stepped_back;
        queue.import_historical(HistoricalSpin {
            wager_key: WagerKey::new(&Address::new([9; 32]), 1_000_000, 0, 77),
            claim_round: 5,
            bet_per_line: 1_000_000,
            selected_paylines: 1,
            payout: 0,
            tx_id: None,
            claim_tx_id: None,
            placed_at: Utc::now() - chrono::Duration::days(1),
        });

        // when
        let ids: Vec<Option<SpinId>> = queue.history().iter().map(SpinRecord::spin_id).collect();

        // then
        assert_eq!(ids, vec![Some(second), Some(first), None]);
    }

    #[test]
    fn clear_older_than__zero_removes_only_terminal_spins() {
        // given
        let queue = queue();
        let done = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        let live = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        finish(&queue, done);

        // when
        let removed = queue.clear_older_than(Duration::ZERO);

        // then
        assert_eq!(removed, vec![done]);
        assert!(queue.get(done).is_none());
        assert_eq!(queue.get(live).unwrap().status, SpinStatus::Pending);
    }

    #[test]
    fn list_recent__newest_first() {
        let queue = queue();
        let ids: Vec<SpinId> = (0..4)
            .map(|_| queue.enqueue(1_000_000, 1, 1_000_000).unwrap())
            .collect();
        let recent: Vec<SpinId> = queue.list_recent(2).iter().map(|s| s.id).collect();
        assert_eq!(recent, vec![ids[3], ids[2]]);
    }

    #[test]
    fn evict_history__keeps_at_most_capacity_terminal_spins() {
        // given
        let config = EngineConfig {
            history_capacity: 2,
            ..EngineConfig::default()
        };
        let queue = SpinQueue::new(Arc::new(config));
        let ids: Vec<SpinId> = (0..3)
            .map(|_| queue.enqueue(1_000_000, 1, 1_000_000).unwrap())
            .collect();
        ids.iter().for_each(|id| finish(&queue, *id));
        let mut events = queue.subscribe();

        // when
        let evicted = queue.evict_history();

        // then
        assert_eq!(evicted, vec![ids[0]]);
        assert_eq!(events.try_recv(), Ok(QueueEvent::Evicted(vec![ids[0]])));
        assert_eq!(queue.history().len(), 2);
    }

    #[test]
    fn subscribe__sees_transitions_in_order() {
        let queue = queue();
        let mut events = queue.subscribe();
        let id = queue.enqueue(1_000_000, 1, 1_000_000).unwrap();
        queue.begin_submission(id, key()).unwrap();
        assert_eq!(events.try_recv(), Ok(QueueEvent::Enqueued(id)));
        assert_eq!(
            events.try_recv(),
            Ok(QueueEvent::Transitioned(SpinTransition {
                id,
                from: SpinStatus::Pending,
                to: SpinStatus::Submitting,
            }))
        );
    }
}
