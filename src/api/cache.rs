//! ETag cache for measurement bodies
//!
//! Two maps: measurement id -> latest ETag, and ETag -> body received with it.
//! A 304 for an id is answered from the body of the ETag that was sent.
//! There is no TTL; entries live as long as the client.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct MeasurementCache {
    inner: RwLock<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    etags: HashMap<String, String>,
    bodies: HashMap<String, Arc<[u8]>>,
}

impl MeasurementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// ETag to send as `If-None-Match` for `id`.
    pub fn etag(&self, id: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.etags.get(id).cloned()
    }

    pub fn body(&self, etag: &str) -> Option<Arc<[u8]>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.bodies.get(etag).cloned()
    }

    /// Record a fresh 200 response. The body of the ETag it supersedes is dropped.
    pub fn store(&self, id: &str, etag: &str, body: Arc<[u8]>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = inner.etags.insert(id.to_string(), etag.to_string()) {
            if previous != etag {
                inner.drop_unreferenced(&previous);
            }
        }
        inner.bodies.insert(etag.to_string(), body);
    }

    /// Forget `id`, e.g. after a 200 that carried no ETag.
    pub fn forget(&self, id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = inner.etags.remove(id) {
            inner.drop_unreferenced(&previous);
        }
    }
}

impl CacheInner {
    /// Remove the body for `etag` unless another id still points at it.
    fn drop_unreferenced(&mut self, etag: &str) {
        if !self.etags.values().any(|e| e == etag) {
            self.bodies.remove(etag);
        }
    }
}
