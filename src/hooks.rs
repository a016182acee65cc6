//! Collaborators the request layer calls out to but does not own.

use crate::error::ErrorRecord;

/// Read access to the session token plus the ability to drop the session.
pub trait AuthStore: Send + Sync {
    fn token(&self) -> Option<String>;

    fn clear_session(&self);
}

pub trait Router: Send + Sync {
    fn current_path(&self) -> String {
        "/".to_owned()
    }

    fn redirect_to_login(&self, return_path: &str);
}

/// Surface terminal failures to the user (toast, banner, log line).
pub trait ErrorPresenter: Send + Sync {
    fn present_error(&self, record: &ErrorRecord);
}

/// Shared busy indicator. Called while the coordinator's counter lock is held,
/// so implementations must not call back into the client.
pub trait LoadingIndicator: Send + Sync {
    fn show(&self);

    fn hide(&self);
}

#[derive(Debug, Default)]
pub struct AnonymousAuthStore;

impl AuthStore for AnonymousAuthStore {
    fn token(&self) -> Option<String> {
        None
    }

    fn clear_session(&self) {}
}

#[derive(Debug, Default)]
pub struct NoopRouter;

impl Router for NoopRouter {
    fn redirect_to_login(&self, _return_path: &str) {}
}

/// Default presenter: logs the failure instead of rendering it.
#[derive(Debug, Default)]
pub struct TracingErrorPresenter;

impl ErrorPresenter for TracingErrorPresenter {
    fn present_error(&self, record: &ErrorRecord) {
        tracing::warn!(
            kind = %record.kind(),
            attempt = record.attempt(),
            message = record.message(),
            "request failed"
        );
    }
}

#[derive(Debug, Default)]
pub struct NoopLoadingIndicator;

impl LoadingIndicator for NoopLoadingIndicator {
    fn show(&self) {}

    fn hide(&self) {}
}
