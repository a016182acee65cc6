use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use crate::fingerprint::Fingerprint;
use crate::util::lock_unpoisoned;

#[derive(Debug)]
pub(crate) struct InFlightEntry {
    id: u64,
    cancel: CancellationToken,
}

impl InFlightEntry {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// One cancellation handle per fingerprint, owned by a single client instance.
#[derive(Debug, Default)]
pub(crate) struct InFlightRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<Fingerprint, InFlightEntry>>,
}

impl InFlightRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Installs a fresh entry and returns its ticket, its token and the
    /// entry it displaced, if any.
    pub(crate) fn replace(
        &self,
        fingerprint: Fingerprint,
    ) -> (u64, CancellationToken, Option<InFlightEntry>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let entry = InFlightEntry {
            id,
            cancel: cancel.clone(),
        };
        let previous = lock_unpoisoned(&self.entries).insert(fingerprint, entry);
        (id, cancel, previous)
    }

    /// Removes the entry only while `id` is still the registered occupant.
    pub(crate) fn remove_if_current(&self, fingerprint: &Fingerprint, id: u64) -> bool {
        let mut entries = lock_unpoisoned(&self.entries);
        match entries.get(fingerprint) {
            Some(entry) if entry.id == id => {
                entries.remove(fingerprint);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn current_id(&self, fingerprint: &Fingerprint) -> Option<u64> {
        lock_unpoisoned(&self.entries)
            .get(fingerprint)
            .map(InFlightEntry::id)
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }
}

#[cfg(test)]
mod tests {
    use super::InFlightRegistry;
    use crate::fingerprint::Fingerprint;

    #[test]
    fn replace_returns_displaced_entry() {
        let registry = InFlightRegistry::new();
        let key = Fingerprint::from("stats");

        let (first_id, first_token, displaced) = registry.replace(key.clone());
        assert!(displaced.is_none());

        let (second_id, _, displaced) = registry.replace(key.clone());
        let displaced = displaced.expect("first entry should be displaced");
        assert_eq!(displaced.id(), first_id);
        assert_ne!(first_id, second_id);
        assert!(!first_token.is_cancelled());
        displaced.cancel();
        assert!(first_token.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_ticket_never_removes_newer_entry() {
        let registry = InFlightRegistry::new();
        let key = Fingerprint::from("stats");
        let (stale_id, _, _) = registry.replace(key.clone());
        let (current_id, _, _) = registry.replace(key.clone());

        assert!(!registry.remove_if_current(&key, stale_id));
        assert_eq!(registry.current_id(&key), Some(current_id));
        assert!(registry.remove_if_current(&key, current_id));
        assert!(!registry.remove_if_current(&key, current_id));
        assert_eq!(registry.len(), 0);
    }
}
