use std::sync::Mutex;

use tracing::warn;

use crate::hooks::{AuthStore, Router};
use crate::util::lock_unpoisoned;

/// Runs session-clear + login redirect once per expired session, however many
/// concurrent calls observe the 401.
#[derive(Debug, Default)]
pub(crate) struct AuthExpiryGuard {
    // `Some(token)` once the session that sent `token` has been expired.
    expired: Mutex<Option<Option<String>>>,
}

impl AuthExpiryGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `token` is the bearer token the failing request carried. Returns `true`
    /// if this call performed the handling.
    pub(crate) fn handle(
        &self,
        token: Option<&str>,
        auth_store: &dyn AuthStore,
        router: &dyn Router,
    ) -> bool {
        {
            let mut expired = lock_unpoisoned(&self.expired);
            if let Some(expired_token) = expired.as_ref()
                && (token.is_none() || expired_token.as_deref() == token)
            {
                return false;
            }
            *expired = Some(token.map(ToOwned::to_owned));
        }

        warn!("session expired, redirecting to login");
        auth_store.clear_session();
        let return_path = router.current_path();
        router.redirect_to_login(&return_path);
        true
    }

    pub(crate) fn reset(&self) {
        *lock_unpoisoned(&self.expired) = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::AuthExpiryGuard;
    use crate::hooks::{AuthStore, Router};

    #[derive(Default)]
    struct Session {
        cleared: AtomicUsize,
    }

    impl AuthStore for Session {
        fn token(&self) -> Option<String> {
            Some("t1".to_owned())
        }

        fn clear_session(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingRouter {
        redirects: Mutex<Vec<String>>,
    }

    impl Router for RecordingRouter {
        fn current_path(&self) -> String {
            "/usage?range=7d".to_owned()
        }

        fn redirect_to_login(&self, return_path: &str) {
            self.redirects
                .lock()
                .expect("router lock")
                .push(return_path.to_owned());
        }
    }

    #[test]
    fn repeated_expiry_of_same_token_is_handled_once() {
        let guard = AuthExpiryGuard::new();
        let session = Session::default();
        let router = RecordingRouter::default();

        assert!(guard.handle(Some("t1"), &session, &router));
        assert!(!guard.handle(Some("t1"), &session, &router));
        assert!(!guard.handle(None, &session, &router));

        assert_eq!(session.cleared.load(Ordering::SeqCst), 1);
        assert_eq!(
            *router.redirects.lock().expect("router lock"),
            vec!["/usage?range=7d".to_owned()]
        );
    }

    #[test]
    fn new_session_or_reset_rearms_handling() {
        let guard = AuthExpiryGuard::new();
        let session = Session::default();
        let router = RecordingRouter::default();

        assert!(guard.handle(Some("t1"), &session, &router));
        assert!(guard.handle(Some("t2"), &session, &router));
        guard.reset();
        assert!(guard.handle(Some("t2"), &session, &router));
        assert_eq!(session.cleared.load(Ordering::SeqCst), 3);
    }
}
