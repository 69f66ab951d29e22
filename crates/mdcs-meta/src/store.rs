//! The meta store: persists and replicates the causal frontier through a
//! [`Gateway`].
//!
//! The store keeps its own notion of the frontier (`parents`), separate
//! from any Merkle-Clock head. Every save, load and subscription delivery
//! reconciles it: the union of the known frontier and the newly observed
//! events, minus every CID an observed event names as a parent.

use crate::codec::{decode_meta_events, encode_meta_event, DbMetaEvent};
use crate::error::{MetaError, Result};
use crate::gateway::{get_param, with_param, Gateway, GatewayError, SubscribeHandler, Subscription};
use crate::meta::DbMeta;
use crate::ready::ReadyOnce;
use async_trait::async_trait;
use futures::FutureExt;
use mdcs_merkle::Cid;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use url::Url;

/// Receives every newly observed meta event, from both `load` and
/// subscription deliveries.
///
/// Each event CID is forwarded at most once per store; an implementation
/// must still tolerate seeing an event it already merged.
#[async_trait]
pub trait MetaConsumer: Send + Sync {
    async fn handle_event(&self, event: &DbMetaEvent) -> Result<()>;
}

/// Configuration for a [`MetaStore`].
#[derive(Clone, Debug)]
pub struct MetaStoreConfig {
    /// Logical store name; also written to the `name` URL parameter.
    pub name: String,
    /// Base address of the store.
    pub url: Url,
    /// Subscribe to pushes from the gateway once started.
    pub remote: bool,
    /// Branch used by `load`/`save` when the caller names none.
    pub default_branch: String,
}

/// Builder for meta store configuration.
pub struct MetaStoreConfigBuilder {
    config: MetaStoreConfig,
}

impl MetaStoreConfigBuilder {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            config: MetaStoreConfig {
                name: name.into(),
                url,
                remote: false,
                default_branch: "main".to_string(),
            },
        }
    }

    pub fn remote(mut self, remote: bool) -> Self {
        self.config.remote = remote;
        self
    }

    pub fn default_branch(mut self, branch: impl Into<String>) -> Self {
        self.config.default_branch = branch.into();
        self
    }

    pub fn build(self) -> MetaStoreConfig {
        self.config
    }
}

/// Local view of a branch.
///
/// `superseded` and `observed` grow for the life of the store, bounded by the
/// number of meta events in the history it has seen.
#[derive(Debug, Default)]
struct FrontierState {
    parents: Vec<Cid>,
    /// CIDs named as a parent by some observed or saved event.
    superseded: HashSet<Cid>,
    /// Events already forwarded to the consumer or written by us.
    observed: HashSet<Cid>,
    /// Last non-empty key seen on the branch; carried into keyless saves.
    key: Option<String>,
}

impl FrontierState {
    fn reconcile(&mut self, events: &[DbMetaEvent]) {
        for event in events {
            self.superseded.extend(event.parents.iter().copied());
            if let Some(key) = event.db_meta.key() {
                self.key = Some(key.to_string());
            }
        }

        let mut seen = HashSet::new();
        let candidates: Vec<Cid> = self
            .parents
            .iter()
            .copied()
            .chain(events.iter().map(|e| e.event_cid))
            .collect();
        self.parents = candidates
            .into_iter()
            .filter(|cid| !self.superseded.contains(cid) && seen.insert(*cid))
            .collect();
    }
}

type CloseCallback = Box<dyn FnOnce() + Send>;

/// Persists the frontier through a gateway and tracks the local parents.
pub struct MetaStore {
    config: MetaStoreConfig,
    gateway: Arc<dyn Gateway>,
    url: RwLock<Url>,
    frontier: RwLock<FrontierState>,
    consumer: RwLock<Option<Weak<dyn MetaConsumer>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    on_closed: Mutex<Vec<CloseCallback>>,
    ready: ReadyOnce<MetaError>,
    closed: AtomicBool,
}

impl MetaStore {
    pub fn new(config: MetaStoreConfig, gateway: Arc<dyn Gateway>) -> Arc<Self> {
        let url = if get_param(&config.url, "name").is_some() {
            config.url.clone()
        } else {
            with_param(&config.url, "name", &config.name)
        };

        Arc::new(MetaStore {
            config,
            gateway,
            url: RwLock::new(url),
            frontier: RwLock::new(FrontierState::default()),
            consumer: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            on_closed: Mutex::new(Vec::new()),
            ready: ReadyOnce::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &MetaStoreConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The store address as confirmed by the gateway.
    pub fn url(&self) -> Url {
        self.url.read().clone()
    }

    /// The store's current view of the frontier.
    pub fn parents(&self) -> Vec<Cid> {
        self.frontier.read().parents.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Attach the hook that receives observed events. The store holds it
    /// weakly.
    pub fn set_consumer<C: MetaConsumer + 'static>(&self, consumer: &Arc<C>) {
        let weak: Weak<dyn MetaConsumer> = Arc::downgrade(consumer) as Weak<dyn MetaConsumer>;
        *self.consumer.write() = Some(weak);
    }

    /// Register a callback to run once when the store closes.
    pub fn on_closed<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            callback();
            return;
        }
        self.on_closed.lock().push(Box::new(callback));
    }

    /// Start the store. Runs once; concurrent callers share the outcome.
    pub async fn ready(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        self.ready.get_or_init(move || async move { this.start().await }).await
    }

    async fn start(self: Arc<Self>) -> Result<()> {
        self.ensure_open()?;
        let base = self.url();
        let url = self
            .gateway
            .start(&base)
            .await
            .map_err(|e| MetaError::gateway("start", &base, e))?;
        *self.url.write() = url;

        if self.config.remote {
            let branch = self.config.default_branch.clone();
            self.subscribe(&branch).await?;
        }
        info!(name = %self.config.name, remote = self.config.remote, "meta store ready");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(MetaError::Closed(self.config.name.clone()));
        }
        Ok(())
    }

    async fn branch_url(&self, branch: &str) -> Result<Url> {
        let base = self.url();
        self.gateway
            .build_url(&base, branch)
            .await
            .map_err(|e| MetaError::gateway("buildUrl", &base, e))
    }

    /// Listen for payloads pushed to `branch`.
    ///
    /// Returns `false` when the gateway has no push channel.
    pub async fn subscribe(self: &Arc<Self>, branch: &str) -> Result<bool> {
        self.ensure_open()?;
        let url = self.branch_url(branch).await?;

        let store = Arc::downgrade(self);
        let handler: SubscribeHandler = Arc::new(move |bytes: Vec<u8>| {
            let store = store.clone();
            async move {
                let Some(store) = store.upgrade() else {
                    return;
                };
                if let Err(e) = store.apply_incoming(&bytes).await {
                    warn!(error = %e, "failed to apply pushed meta payload");
                }
            }
            .boxed()
        });

        match self.gateway.subscribe(&url, handler).await {
            Ok(subscription) => {
                debug!(url = %url, "subscribed to gateway");
                self.subscriptions.lock().push(subscription);
                Ok(true)
            }
            Err(GatewayError::Unsupported(_)) => {
                debug!(url = %url, "gateway has no push channel");
                Ok(false)
            }
            Err(e) => Err(MetaError::gateway("subscribe", &url, e)),
        }
    }

    /// Decode a payload, forward fresh events to the consumer, and
    /// reconcile the frontier. Returns the decoded metadata in payload
    /// order.
    pub async fn apply_incoming(&self, bytes: &[u8]) -> Result<Vec<DbMeta>> {
        if self.is_closed() {
            debug!(name = %self.config.name, "dropping payload for closed store");
            return Ok(Vec::new());
        }

        let events = decode_meta_events(bytes);
        let consumer = self.consumer.read().as_ref().and_then(Weak::upgrade);

        for event in &events {
            let seen = self.frontier.read().observed.contains(&event.event_cid);
            if seen {
                continue;
            }
            if let Some(consumer) = &consumer {
                consumer.handle_event(event).await?;
            }
            self.frontier.write().observed.insert(event.event_cid);
        }

        let parents = {
            let mut frontier = self.frontier.write();
            frontier.reconcile(&events);
            frontier.parents.clone()
        };
        debug!(
            name = %self.config.name,
            events = events.len(),
            parents = ?parents,
            "reconciled meta parents"
        );

        Ok(events.into_iter().map(|e| e.db_meta).collect())
    }

    /// Load the history of `branch` (the default branch if `None`).
    ///
    /// A branch without history yields `Ok(None)`.
    pub async fn load(self: &Arc<Self>, branch: Option<&str>) -> Result<Option<Vec<DbMeta>>> {
        self.ready().await?;
        self.ensure_open()?;
        let branch = branch.unwrap_or(self.config.default_branch.as_str());
        let url = self.branch_url(branch).await?;

        let bytes = match self.gateway.get(&url).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                debug!(url = %url, "no meta history for branch");
                return Ok(None);
            }
            Err(e) => return Err(MetaError::gateway("get", &url, e)),
        };

        self.apply_incoming(&bytes).await.map(Some)
    }

    /// Write `meta` as one event parented on the current frontier.
    ///
    /// Parents are replaced by the new event only after the gateway accepts
    /// the write. No compare-and-swap is made against the remote branch.
    pub async fn save(self: &Arc<Self>, meta: &DbMeta, branch: Option<&str>) -> Result<Cid> {
        self.ready().await?;
        self.ensure_open()?;
        let branch = branch.unwrap_or(self.config.default_branch.as_str());
        let (parents, known_key) = {
            let frontier = self.frontier.read();
            (frontier.parents.clone(), frontier.key.clone())
        };

        // A key, once set on the branch, is only replaced, never dropped.
        let meta = match (meta.key(), known_key) {
            (None, Some(key)) => meta.clone().with_key(key),
            _ => meta.clone(),
        };
        let (event, bytes) = encode_meta_event(&meta, &parents)?;
        let cid = event.cid();
        let url = self.branch_url(branch).await?;

        // Record before the write so an echo through our own subscription
        // is not forwarded to the consumer.
        let fresh = self.frontier.write().observed.insert(cid);
        if let Err(e) = self.gateway.put(&url, &bytes).await {
            if fresh {
                self.frontier.write().observed.remove(&cid);
            }
            return Err(MetaError::gateway("put", &url, e));
        }

        {
            let mut frontier = self.frontier.write();
            frontier.superseded.extend(parents.iter().copied());
            frontier.parents = vec![cid];
            if let Some(key) = meta.key() {
                frontier.key = Some(key.to_string());
            }
        }
        debug!(url = %url, cid = %cid.short(), parents = parents.len(), "saved meta event");
        Ok(cid)
    }

    /// Release the gateway resource and run close callbacks. Only the first
    /// call has any effect.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let subscriptions: Vec<Subscription> = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        let url = self.url();
        let closed = self
            .gateway
            .close(&url)
            .await
            .map_err(|e| MetaError::gateway("close", &url, e));

        let callbacks: Vec<CloseCallback> = std::mem::take(&mut *self.on_closed.lock());
        for callback in callbacks {
            callback();
        }
        info!(name = %self.config.name, "meta store closed");
        closed
    }

    /// Close the store and delete its backing data.
    pub async fn destroy(&self) -> Result<()> {
        self.close().await?;
        let url = self.url();
        self.gateway
            .destroy(&url)
            .await
            .map_err(|e| MetaError::gateway("destroy", &url, e))?;
        info!(name = %self.config.name, "meta store destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore")
            .field("name", &self.config.name)
            .field("url", &self.url().as_str())
            .field("parents", &self.parents().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
