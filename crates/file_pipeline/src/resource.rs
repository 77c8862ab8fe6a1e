use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use core_types::SourceFile;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Issues local URLs for picked files so a player can open them.
pub trait ResourceRegistry: Send + Sync {
    fn create(&self, file: &SourceFile) -> String;
    fn revoke(&self, url: &str);
}

/// In-process `blob:`-style URL table.
#[derive(Default)]
pub struct ObjectUrlRegistry {
    live: Mutex<HashMap<String, SourceFile>>,
    created: AtomicUsize,
    revoked: AtomicUsize,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, url: &str) -> Option<SourceFile> {
        self.live.lock().get(url).cloned()
    }

    pub fn is_live(&self, url: &str) -> bool {
        self.live.lock().contains_key(url)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl ResourceRegistry for ObjectUrlRegistry {
    fn create(&self, file: &SourceFile) -> String {
        let url = format!("blob:mediaqa/{}", Uuid::new_v4());
        self.live.lock().insert(url.clone(), file.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        debug!(%url, filename = file.name(), "object url created");
        url
    }

    fn revoke(&self, url: &str) {
        if self.live.lock().remove(url).is_none() {
            warn!(url, "revoke of unknown object url");
            return;
        }
        self.revoked.fetch_add(1, Ordering::SeqCst);
        debug!(url, "object url revoked");
    }
}

/// Owns one registry URL and revokes it when dropped.
///
/// Not `Clone`: each handle is released exactly once, whichever way its
/// owner goes away.
pub struct ResourceHandle {
    url: String,
    registry: Arc<dyn ResourceRegistry>,
}

impl ResourceHandle {
    pub fn acquire(registry: Arc<dyn ResourceRegistry>, file: &SourceFile) -> Self {
        let url = registry.create(file);
        Self { url, registry }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        self.registry.revoke(&self.url);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("url", &self.url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_revokes_on_drop() {
        let registry = Arc::new(ObjectUrlRegistry::new());
        let file = SourceFile::from_bytes("clip.mp4", vec![1, 2, 3]);

        let handle = ResourceHandle::acquire(registry.clone(), &file);
        let url = handle.url().to_string();
        assert!(url.starts_with("blob:"));
        assert_eq!(registry.resolve(&url).map(|f| f.size()), Some(3));

        drop(handle);
        assert!(!registry.is_live(&url));
        assert_eq!(registry.revoked_count(), 1);
    }

    #[test]
    fn unknown_revoke_is_not_counted() {
        let registry = ObjectUrlRegistry::new();
        registry.revoke("blob:mediaqa/missing");
        assert_eq!(registry.revoked_count(), 0);
    }
}
