use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::hooks::{LoadingIndicator, NoopLoadingIndicator};
use crate::util::lock_unpoisoned;

struct LoadingInner {
    active: Mutex<usize>,
    indicator: Arc<dyn LoadingIndicator>,
}

/// Reference-counted busy indicator shared by every call on one client.
///
/// The indicator is shown on the 0 -> 1 transition and hidden on 1 -> 0, so
/// overlapping calls keep it visible for the union of their durations.
#[derive(Clone)]
pub struct LoadingCoordinator {
    inner: Arc<LoadingInner>,
}

impl std::fmt::Debug for LoadingCoordinator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LoadingCoordinator")
            .field("active", &self.active())
            .finish()
    }
}

/// Holds one unit of the shared counter until released or dropped.
#[must_use = "dropping the token immediately releases the loading state"]
pub struct LoadingToken {
    inner: Arc<LoadingInner>,
}

impl std::fmt::Debug for LoadingToken {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("LoadingToken").finish_non_exhaustive()
    }
}

impl LoadingCoordinator {
    pub fn new(indicator: Arc<dyn LoadingIndicator>) -> Self {
        Self {
            inner: Arc::new(LoadingInner {
                active: Mutex::new(0),
                indicator,
            }),
        }
    }

    pub fn acquire(&self) -> LoadingToken {
        let mut active = lock_unpoisoned(&self.inner.active);
        *active = active.saturating_add(1);
        if *active == 1 {
            debug!("showing loading indicator");
            self.inner.indicator.show();
        }
        LoadingToken {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn release(&self, token: LoadingToken) {
        drop(token);
    }

    pub fn active(&self) -> usize {
        *lock_unpoisoned(&self.inner.active)
    }

    pub fn is_visible(&self) -> bool {
        self.active() > 0
    }
}

impl Default for LoadingCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(NoopLoadingIndicator))
    }
}

impl Drop for LoadingToken {
    fn drop(&mut self) {
        let mut active = lock_unpoisoned(&self.inner.active);
        if *active == 0 {
            return;
        }
        *active -= 1;
        if *active == 0 {
            debug!("hiding loading indicator");
            self.inner.indicator.hide();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::LoadingCoordinator;
    use crate::hooks::LoadingIndicator;

    #[derive(Default)]
    struct CountingIndicator {
        shown: AtomicUsize,
        hidden: AtomicUsize,
    }

    impl LoadingIndicator for CountingIndicator {
        fn show(&self) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }

        fn hide(&self) {
            self.hidden.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn overlapping_tokens_show_and_hide_once() {
        let indicator = Arc::new(CountingIndicator::default());
        let coordinator = LoadingCoordinator::new(indicator.clone());

        let a = coordinator.acquire();
        let b = coordinator.acquire();
        let c = coordinator.acquire();
        assert_eq!(coordinator.active(), 3);
        assert_eq!(indicator.shown.load(Ordering::SeqCst), 1);

        coordinator.release(b);
        assert!(coordinator.is_visible());
        drop(a);
        assert!(coordinator.is_visible());
        assert_eq!(indicator.hidden.load(Ordering::SeqCst), 0);

        coordinator.release(c);
        assert!(!coordinator.is_visible());
        assert_eq!(indicator.hidden.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn each_idle_period_emits_its_own_transition() {
        let indicator = Arc::new(CountingIndicator::default());
        let coordinator = LoadingCoordinator::new(indicator.clone());

        for _ in 0..3 {
            let token = coordinator.acquire();
            drop(token);
        }
        assert_eq!(indicator.shown.load(Ordering::SeqCst), 3);
        assert_eq!(indicator.hidden.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.active(), 0);
    }

    #[test]
    fn clones_share_one_counter() {
        let coordinator = LoadingCoordinator::default();
        let other = coordinator.clone();
        let _token = other.acquire();
        assert_eq!(coordinator.active(), 1);
    }
}
