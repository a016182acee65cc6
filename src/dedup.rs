use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::fingerprint::Fingerprint;
use crate::registry::InFlightRegistry;

/// Newest-wins duplicate suppression over an [`InFlightRegistry`].
#[derive(Clone, Debug, Default)]
pub struct DuplicateRequestGuard {
    registry: Arc<InFlightRegistry>,
}

/// Registration of one in-flight call. Released exactly once: explicitly via
/// [`DuplicateRequestGuard::release`] or on drop.
#[derive(Debug)]
pub struct InFlightHandle {
    registry: Arc<InFlightRegistry>,
    fingerprint: Fingerprint,
    id: u64,
    cancel: CancellationToken,
    released: bool,
    superseded_previous: bool,
}

impl InFlightHandle {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Fires when a newer identical request supersedes this one.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether registering this handle cancelled an older in-flight call.
    pub fn superseded_previous(&self) -> bool {
        self.superseded_previous
    }

    fn release_once(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.registry.remove_if_current(&self.fingerprint, self.id)
    }
}

impl Drop for InFlightHandle {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl DuplicateRequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the current occupant of `fingerprint`, if any, then registers
    /// the caller as the new occupant.
    pub fn register(&self, fingerprint: Fingerprint) -> InFlightHandle {
        let (id, cancel, previous) = self.registry.replace(fingerprint.clone());
        let superseded_previous = match previous {
            Some(previous) => {
                debug!(fingerprint = %fingerprint, "superseding in-flight duplicate");
                previous.cancel();
                true
            }
            None => false,
        };
        InFlightHandle {
            registry: Arc::clone(&self.registry),
            fingerprint,
            id,
            cancel,
            released: false,
            superseded_previous,
        }
    }

    /// Returns `true` only if this call removed the handle's own entry. A
    /// second release, or a release after supersession, is a no-op.
    pub fn release(&self, handle: &mut InFlightHandle) -> bool {
        handle.release_once()
    }

    pub fn is_current(&self, handle: &InFlightHandle) -> bool {
        self.registry.current_id(&handle.fingerprint) == Some(handle.id)
    }

    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }
}
