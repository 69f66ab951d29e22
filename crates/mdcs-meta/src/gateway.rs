//! Storage gateway abstraction.
//!
//! A gateway moves opaque bytes to and from a backing store addressed by
//! URLs. File, browser and network gateways live outside this crate; the
//! [`MemoryGateway`] here backs tests and local simulations.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

/// Errors reported by gateways.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("gateway i/o error: {0}")]
    Io(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Callback invoked with every payload published to a subscribed URL.
pub type SubscribeHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

/// A live push subscription. Dropping the handle cancels it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the subscription. No handler invocation starts after this
    /// returns.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Return `url` with query parameter `name` set to `value`, replacing any
/// previous value.
pub fn with_param(url: &Url, name: &str, value: &str) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut out = url.clone();
    {
        let mut pairs = out.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, value);
    }
    out
}

/// Look up a query parameter.
pub fn get_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// The store address with the `key` parameter removed.
fn store_base(url: &Url) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "key")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut out = url.clone();
    out.set_query(None);
    if !kept.is_empty() {
        out.query_pairs_mut().extend_pairs(kept);
    }
    out.to_string()
}

/// Abstract storage gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Build the address of `key` (e.g. a branch) below a store address.
    async fn build_url(&self, base: &Url, key: &str) -> Result<Url, GatewayError> {
        Ok(with_param(base, "key", key))
    }

    /// Prepare the store at `url` for use.
    async fn start(&self, url: &Url) -> Result<Url, GatewayError>;

    async fn get(&self, url: &Url) -> Result<Vec<u8>, GatewayError>;

    async fn put(&self, url: &Url, body: &[u8]) -> Result<(), GatewayError>;

    async fn delete(&self, url: &Url) -> Result<(), GatewayError>;

    /// Release resources held for the store at `url`.
    async fn close(&self, url: &Url) -> Result<(), GatewayError>;

    /// Permanently delete everything stored below `url`.
    async fn destroy(&self, url: &Url) -> Result<(), GatewayError>;

    /// Register a push handler for payloads published to `url`.
    ///
    /// Gateways without a push channel keep the default.
    async fn subscribe(
        &self,
        _url: &Url,
        _handler: SubscribeHandler,
    ) -> Result<Subscription, GatewayError> {
        Err(GatewayError::Unsupported("subscribe"))
    }
}

type Subscribers = HashMap<String, Vec<(u64, SubscribeHandler)>>;

/// In-memory gateway with push notifications.
///
/// Clones share the same backing map, so several stores (standing in for
/// several replicas) can talk through one gateway.
#[derive(Clone, Default)]
pub struct MemoryGateway {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live subscriptions across all URLs.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().values().map(Vec::len).sum()
    }

    /// Deliver `body` to every subscriber of `url` without storing it.
    pub async fn publish(&self, url: &Url, body: &[u8]) {
        let handlers: Vec<SubscribeHandler> = self
            .subscribers
            .lock()
            .get(url.as_str())
            .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        trace!(url = %url, subscribers = handlers.len(), "publishing meta payload");
        for handler in handlers {
            handler(body.to_vec()).await;
        }
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn start(&self, url: &Url) -> Result<Url, GatewayError> {
        debug!(url = %url, "memory gateway started");
        Ok(url.clone())
    }

    async fn get(&self, url: &Url) -> Result<Vec<u8>, GatewayError> {
        self.entries
            .read()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(url.to_string()))
    }

    async fn put(&self, url: &Url, body: &[u8]) -> Result<(), GatewayError> {
        self.entries
            .write()
            .insert(url.to_string(), body.to_vec());
        self.publish(url, body).await;
        Ok(())
    }

    async fn delete(&self, url: &Url) -> Result<(), GatewayError> {
        self.entries.write().remove(url.as_str());
        Ok(())
    }

    async fn close(&self, url: &Url) -> Result<(), GatewayError> {
        debug!(url = %url, "memory gateway closed");
        Ok(())
    }

    async fn destroy(&self, url: &Url) -> Result<(), GatewayError> {
        let base = store_base(url);
        self.entries
            .write()
            .retain(|key, _| match Url::parse(key) {
                Ok(entry) => store_base(&entry) != base,
                Err(_) => true,
            });
        debug!(url = %url, "memory gateway destroyed store");
        Ok(())
    }

    async fn subscribe(
        &self,
        url: &Url,
        handler: SubscribeHandler,
    ) -> Result<Subscription, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = url.to_string();
        self.subscribers
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, handler));

        let subscribers = Arc::clone(&self.subscribers);
        Ok(Subscription::new(move || {
            let mut subscribers = subscribers.lock();
            if let Some(list) = subscribers.get_mut(&key) {
                list.retain(|(sid, _)| *sid != id);
                if list.is_empty() {
                    subscribers.remove(&key);
                }
            }
        }))
    }
}
