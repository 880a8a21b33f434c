//! Per-user refresh leases.
//!
//! At most one rebuild runs for a user at a time. The lease is a tokio mutex
//! per user, so callers can either wait for the in-flight rebuild or skip.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type Slots = Arc<DashMap<Uuid, Arc<Mutex<()>>>>;

#[derive(Debug, Clone, Default)]
pub struct RefreshLeases {
    slots: Slots,
}

impl RefreshLeases {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.slots.entry(user_id).or_default().clone()
    }

    /// Wait until the lease for `user_id` is free, then take it.
    pub async fn acquire(&self, user_id: Uuid) -> RefreshLease {
        let guard = self.slot(user_id).lock_owned().await;
        RefreshLease {
            user_id,
            guard: Some(guard),
            slots: Arc::clone(&self.slots),
        }
    }

    /// Take the lease only if nobody holds it.
    pub fn try_acquire(&self, user_id: Uuid) -> Option<RefreshLease> {
        match self.slot(user_id).try_lock_owned() {
            Ok(guard) => Some(RefreshLease {
                user_id,
                guard: Some(guard),
                slots: Arc::clone(&self.slots),
            }),
            Err(_) => {
                // The holder may have released while our clone was alive and
                // skipped the cleanup; finish it here.
                self.remove_idle(user_id);
                None
            }
        }
    }

    fn remove_idle(&self, user_id: Uuid) {
        self.slots
            .remove_if(&user_id, |_, slot| Arc::strong_count(slot) == 1);
    }

    pub fn is_held(&self, user_id: Uuid) -> bool {
        self.slots
            .get(&user_id)
            .is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of users with a live lease slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct RefreshLease {
    user_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl RefreshLease {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Cloning a slot needs the shard write lock, so a count of one here
        // means no waiter holds it. A refused `try_acquire` racing this check
        // removes the slot itself.
        self.slots
            .remove_if(&self.user_id, |_, slot| Arc::strong_count(slot) == 1);
    }
}
