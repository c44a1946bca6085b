//! Per-key async locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use renec_core::EntityRef;

/// Prune dead entries once the table grows past this.
const PRUNE_THRESHOLD: usize = 4_096;

/// At most one holder per [`EntityRef`]; different keys never contend.
///
/// Entries are weak so the table only pins locks somebody holds or awaits.
#[derive(Default)]
pub struct KeyLocks {
    table: Mutex<HashMap<EntityRef, Weak<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &EntityRef) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            match table.get(key).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let fresh = Arc::new(AsyncMutex::new(()));
                    table.insert(key.clone(), Arc::downgrade(&fresh));
                    if table.len() > PRUNE_THRESHOLD {
                        table.retain(|_, weak| weak.strong_count() > 0);
                    }
                    fresh
                }
            }
        };
        lock.lock_owned().await
    }

    /// Keys with a live lock.
    pub fn active(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        table.values().filter(|w| w.strong_count() > 0).count()
    }
}
