use crate::spin::SpinId;
use std::collections::{
    HashSet,
    VecDeque,
};

/// Bounded set of spins whose result has already been announced.
///
/// Oldest entries fall out first. It only suppresses duplicates; the spin's status is
/// what decides whether a result exists.
#[derive(Debug)]
pub struct NotifiedCache {
    capacity: usize,
    order: VecDeque<SpinId>,
    members: HashSet<SpinId>,
}

impl NotifiedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub fn contains(&self, id: SpinId) -> bool {
        self.members.contains(&id)
    }

    /// `true` when `id` was not yet present.
    pub fn insert(&mut self, id: SpinId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        true
    }

    pub fn forget(&mut self, ids: &[SpinId]) {
        for id in ids {
            if self.members.remove(id) {
                self.order.retain(|known| known != id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
