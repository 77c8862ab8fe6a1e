use std::sync::Arc;

use config::ClientConfig;
use core_types::{BackendApi, SessionStorage};
use file_pipeline::{ObjectUrlRegistry, ResourceRegistry};
use parking_lot::Mutex;
use secrets::MemoryStorage;
use session::SessionStore;
use tracing::{info, warn};
use transport::{AuthBridge, Endpoints, HttpBackend, HttpTransport};

use crate::{Notice, QaClient};

pub struct ClientBuilder {
    base_url: String,
    api_key: String,
    max_file_bytes: u64,
    storage: Option<Arc<dyn SessionStorage>>,
    registry: Option<Arc<dyn ResourceRegistry>>,
    backend: Option<Arc<dyn BackendApi>>,
}

impl ClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        let defaults = ClientConfig::default();
        Self {
            base_url: base_url.into(),
            api_key: String::new(),
            max_file_bytes: defaults.upload.max_file_bytes,
            storage: None,
            registry: None,
            backend: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.backend.base_url.clone()).max_file_bytes(config.upload.max_file_bytes)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    /// Durable home for the session slots; defaults to process memory.
    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ResourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the HTTP backend. Forced logout then only happens through
    /// [`QaClient::bridge`].
    pub fn backend(mut self, backend: Arc<dyn BackendApi>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> QaClient {
        let bridge = Arc::new(AuthBridge::new());
        let backend: Arc<dyn BackendApi> = match self.backend {
            Some(backend) => backend,
            None => {
                let transport = Arc::new(HttpTransport::new(self.api_key, bridge.clone()));
                Arc::new(HttpBackend::new(transport, Endpoints::new(&self.base_url)))
            }
        };
        let storage: Arc<dyn SessionStorage> = match self.storage {
            Some(storage) => storage,
            None => Arc::new(MemoryStorage::new()),
        };
        let registry: Arc<dyn ResourceRegistry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ObjectUrlRegistry::new()),
        };

        let session = Arc::new(SessionStore::restore(backend.clone(), storage));
        let notices = Arc::new(Mutex::new(Vec::new()));

        // Weak: the session reaches the bridge through backend and transport.
        let weak_session = Arc::downgrade(&session);
        let queue = Arc::clone(&notices);
        bridge.register(move || {
            let Some(session) = weak_session.upgrade() else {
                return;
            };
            if session.logout() {
                warn!("backend rejected the session token; signed out");
                queue.lock().push(Notice::SessionExpired);
            }
        });

        info!(
            base_url = %self.base_url,
            authenticated = session.is_authenticated(),
            "client ready"
        );
        QaClient::assemble(
            session,
            backend,
            registry,
            self.max_file_bytes,
            bridge,
            notices,
        )
    }
}
