// libs/appointment-cell/src/services/locks.rs
//
// Per-doctor scheduling locks. A booking or move holds the lock of every
// doctor whose calendar it touches from the conflict check until the write
// lands, so two requests for the same slot cannot both pass validation.
// Edits of one appointment are serialized by a per-appointment lock taken
// before any calendar lock.
//

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum LockKey {
    Doctor { clinic_id: Uuid, doctor_id: Uuid },
    Appointment { clinic_id: Uuid, appointment_id: Uuid },
}

type LockMap = SyncMutex<HashMap<LockKey, Arc<Mutex<()>>>>;

#[derive(Default)]
pub struct DoctorScheduleLocks {
    locks: Arc<LockMap>,
}

/// Held locks; released on drop. Entries nobody else waits on are evicted.
pub struct DoctorLockSet {
    guards: Vec<(LockKey, OwnedMutexGuard<()>)>,
    locks: Arc<LockMap>,
}

impl Drop for DoctorLockSet {
    fn drop(&mut self) {
        let keys: Vec<LockKey> = self.guards.drain(..).map(|(key, _guard)| key).collect();

        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            // the map holds the only reference once no task waits on it
            if locks.get(&key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&key);
            }
        }
    }
}

impl DoctorScheduleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: LockKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key).or_default().clone()
    }

    async fn acquire_keys(&self, mut keys: Vec<LockKey>) -> DoctorLockSet {
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.lock_for(key);
            guards.push((key, lock.lock_owned().await));
            debug!("Acquired schedule lock {:?}", key);
        }

        DoctorLockSet {
            guards,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Lock the calendars of `doctor_ids` in a stable order so that
    /// concurrent multi-doctor moves cannot deadlock.
    pub async fn acquire(&self, clinic_id: Uuid, doctor_ids: &[Uuid]) -> DoctorLockSet {
        let keys = doctor_ids
            .iter()
            .map(|&doctor_id| LockKey::Doctor { clinic_id, doctor_id })
            .collect();
        self.acquire_keys(keys).await
    }

    /// Serialize edits of one appointment. Must be taken before `acquire`.
    pub async fn acquire_appointment(&self, clinic_id: Uuid, appointment_id: Uuid) -> DoctorLockSet {
        self.acquire_keys(vec![LockKey::Appointment {
            clinic_id,
            appointment_id,
        }])
        .await
    }

    /// Number of locks currently held or awaited.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
