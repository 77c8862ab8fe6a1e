use std::sync::Arc;

use core_types::SessionTerminator;
use parking_lot::Mutex;
use tracing::debug;

type LogoutHandler = Arc<dyn Fn() + Send + Sync>;

/// Single-slot registration point for the forced-logout handler.
///
/// The transport only sees this as a [`SessionTerminator`]; whoever owns the
/// session registers the handler later. The last registration wins and
/// triggering with nothing registered does nothing.
#[derive(Default)]
pub struct AuthBridge {
    handler: Mutex<Option<LogoutHandler>>,
}

impl AuthBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    pub fn is_registered(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn trigger(&self) {
        // The lock is released before the handler runs so it may re-register.
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(),
            None => debug!("forced logout requested with no handler registered"),
        }
    }
}

impl SessionTerminator for AuthBridge {
    fn terminate(&self) {
        self.trigger();
    }
}

impl std::fmt::Debug for AuthBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBridge")
            .field("registered", &self.is_registered())
            .finish()
    }
}
