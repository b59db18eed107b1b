use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use url::Url;

/// Where navigations load their documents from.
///
/// Stands in for the HTTP stack. Implementations are called from the IO-role
/// loop and must be cheap; anything slow belongs behind the implementation's
/// own caching.
pub trait ResourceSource: Send + Sync {
    fn get(&self, url: &Url) -> Option<Resource>;
}

/// A document served for a URL.
#[derive(Debug, Clone)]
pub struct Resource {
    pub body: String,
    pub mime_type: String,
}

impl Resource {
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            mime_type: "text/html".to_string(),
        }
    }
}

/// In-memory [`ResourceSource`] keyed by exact URL.
///
/// Clones share the same underlying map, so fixtures can be registered after
/// the engine has launched.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: Arc<Mutex<HashMap<Url, Resource>>>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resource` under `url`, replacing any previous entry.
    pub fn insert(&self, url: Url, resource: Resource) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url, resource);
    }
}

impl ResourceSource for ResourceMap {
    fn get(&self, url: &Url) -> Option<Resource> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
    }
}
