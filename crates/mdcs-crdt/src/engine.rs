//! The CRDT engine: transactional document writes over the Merkle-Clock.
//!
//! Every `bulk` call becomes one immutable transaction event parented on
//! the current head. Reads replay transaction events in causal order, so
//! replicas that have merged the same events materialize the same
//! documents. When a meta store is configured, every commit persists the
//! new head and remote heads observed by the store are merged back in.

use crate::config::CrdtConfig;
use crate::document::{AllDocs, Changes, CrdtMeta, Doc, DocUpdate, TxnPayload};
use crate::error::{CrdtError, Result};
use crate::index::IndexHook;
use async_trait::async_trait;
use mdcs_merkle::{
    BlockError, BlockStore, Cid, ClockHead, EventBlock, HeadChange, MerkleClock, ObserverId,
};
use mdcs_meta::{
    DbMeta, DbMetaEvent, Gateway, MetaConsumer, MetaStore, MetaStoreConfigBuilder, ReadyOnce,
    Result as MetaResult,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type Indexes = Arc<RwLock<Vec<Arc<dyn IndexHook>>>>;

/// Document engine over a shared block store.
pub struct CrdtEngine {
    config: CrdtConfig,
    blocks: Arc<dyn BlockStore>,
    clock: MerkleClock,
    meta: Option<Arc<MetaStore>>,
    indexes: Indexes,
    zoom_observer: ObserverId,
    /// Serializes local commits.
    write_lock: tokio::sync::Mutex<()>,
    ready: ReadyOnce<CrdtError>,
    closed: AtomicBool,
}

impl CrdtEngine {
    /// An engine that keeps its head in memory only.
    pub fn new(config: CrdtConfig, blocks: Arc<dyn BlockStore>) -> Arc<Self> {
        Self::build(config, blocks, None)
    }

    /// An engine that persists its head through a meta store on `gateway`.
    pub fn with_gateway(
        config: CrdtConfig,
        blocks: Arc<dyn BlockStore>,
        gateway: Arc<dyn Gateway>,
    ) -> Result<Arc<Self>> {
        let url = config
            .meta_url
            .clone()
            .ok_or_else(|| CrdtError::Config(format!("{}: meta_url is required", config.name)))?;
        let meta_config = MetaStoreConfigBuilder::new(config.name.clone(), url)
            .remote(config.remote)
            .default_branch(config.branch.clone())
            .build();
        let meta = MetaStore::new(meta_config, gateway);

        let engine = Self::build(config, blocks, Some(Arc::clone(&meta)));
        meta.set_consumer(&engine);
        Ok(engine)
    }

    fn build(
        config: CrdtConfig,
        blocks: Arc<dyn BlockStore>,
        meta: Option<Arc<MetaStore>>,
    ) -> Arc<Self> {
        let clock = MerkleClock::new(Arc::clone(&blocks));
        let indexes: Indexes = Arc::new(RwLock::new(Vec::new()));

        let zoom_indexes = Arc::clone(&indexes);
        let zoom_observer = clock.on_zoom(move || {
            let hooks: Vec<Arc<dyn IndexHook>> = zoom_indexes.read().clone();
            for hook in hooks {
                debug!(index = hook.name(), "resetting index after zoom");
                hook.reset();
            }
        });

        Arc::new(CrdtEngine {
            config,
            blocks,
            clock,
            meta,
            indexes,
            zoom_observer,
            write_lock: tokio::sync::Mutex::new(()),
            ready: ReadyOnce::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn head(&self) -> ClockHead {
        self.clock.head()
    }

    pub fn clock(&self) -> &MerkleClock {
        &self.clock
    }

    pub fn blocks(&self) -> &Arc<dyn BlockStore> {
        &self.blocks
    }

    pub fn meta_store(&self) -> Option<&Arc<MetaStore>> {
        self.meta.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register an index to be fed commits and reset on zoom.
    pub fn register_index(&self, index: Arc<dyn IndexHook>) {
        debug!(index = index.name(), "registered index");
        self.indexes.write().push(index);
    }

    /// Start the meta store and merge the persisted head. Runs once.
    pub async fn ready(self: &Arc<Self>) -> Result<()> {
        let meta = self.meta.clone();
        let branch = self.config.branch.clone();
        self.ready
            .get_or_init(move || load_persisted_head(meta, branch))
            .await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CrdtError::Closed(self.config.name.clone()));
        }
        Ok(())
    }

    /// Commit `updates` as one transaction and persist the new head.
    pub async fn bulk(self: &Arc<Self>, updates: Vec<DocUpdate>) -> Result<CrdtMeta> {
        self.ready().await?;
        self.ensure_open()?;
        if let Some(bad) = updates.iter().find(|u| u.id.is_empty()) {
            return Err(CrdtError::InvalidDocumentId(bad.id.clone()));
        }

        let _guard = self.write_lock.lock().await;
        let previous = self.clock.head();
        let payload = TxnPayload { updates };
        let event = EventBlock::create(payload, previous.iter().copied())?;
        self.blocks.put(event.to_raw())?;

        let change = self.clock.apply_head(&[event.cid()], &previous);
        let hooks: Vec<Arc<dyn IndexHook>> = self.indexes.read().clone();
        for hook in hooks {
            hook.apply(&event.data().updates);
        }
        debug!(
            name = %self.config.name,
            cid = %event.cid().short(),
            kind = ?change.kind,
            "committed transaction"
        );

        if let Some(meta) = &self.meta {
            meta.save(&DbMeta::new(change.current.clone()), Some(self.config.branch.as_str()))
                .await?;
        }

        Ok(CrdtMeta {
            head: change.current,
        })
    }

    /// Merge a head observed elsewhere.
    pub fn merge_head(&self, head: &[Cid]) -> HeadChange {
        self.clock.apply_head(head, &[])
    }

    fn transactions(&self, head: &[Cid]) -> Result<Vec<(Cid, TxnPayload)>> {
        self.blocks
            .topological_order(head)
            .into_iter()
            .map(|cid| -> Result<(Cid, TxnPayload)> {
                let block = self
                    .blocks
                    .get(&cid)
                    .ok_or(BlockError::NotFound(cid))?;
                let event: EventBlock<TxnPayload> = block.decode()?;
                Ok((cid, event.into_data()))
            })
            .collect()
    }

    fn materialize(&self, head: &[Cid]) -> Result<BTreeMap<String, Value>> {
        let mut docs = BTreeMap::new();
        for (_, txn) in self.transactions(head)? {
            for update in txn.updates {
                match update.value {
                    Some(value) if !update.del => {
                        docs.insert(update.id, value);
                    }
                    _ => {
                        docs.remove(&update.id);
                    }
                }
            }
        }
        Ok(docs)
    }

    /// Read one document at the current head.
    pub fn get(&self, id: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        Ok(self.materialize(&self.clock.head())?.remove(id))
    }

    /// Every live document at the current head, ordered by id.
    pub fn all_docs(&self) -> Result<AllDocs> {
        self.ensure_open()?;
        let head = self.clock.head();
        let rows = self
            .materialize(&head)?
            .into_iter()
            .map(|(id, value)| Doc { id, value })
            .collect();
        Ok(AllDocs { rows, head })
    }

    /// Updates reachable from the current head but not from `since`.
    pub fn changes(&self, since: &[Cid]) -> Result<Changes> {
        self.ensure_open()?;
        let head = self.clock.head();
        let seen: HashSet<Cid> = self.blocks.topological_order(since).into_iter().collect();

        let updates = self
            .transactions(&head)?
            .into_iter()
            .filter(|(cid, _)| !seen.contains(cid))
            .flat_map(|(_, txn)| txn.updates)
            .collect();
        Ok(Changes { updates, head })
    }

    /// Close the engine and its meta store.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.clock.remove_observer(self.zoom_observer);
        if let Some(meta) = &self.meta {
            meta.close().await?;
        }
        info!(name = %self.config.name, "engine closed");
        Ok(())
    }

    /// Close the engine and delete its persisted metadata.
    pub async fn destroy(&self) -> Result<()> {
        self.close().await?;
        if let Some(meta) = &self.meta {
            meta.destroy().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetaConsumer for CrdtEngine {
    async fn handle_event(&self, event: &DbMetaEvent) -> MetaResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        let change = self.merge_head(&event.db_meta.cids);
        debug!(
            name = %self.config.name,
            event = %event.event_cid.short(),
            kind = ?change.kind,
            "merged observed head"
        );
        Ok(())
    }
}

/// Merging happens through the meta consumer hook while the branch loads.
async fn load_persisted_head(meta: Option<Arc<MetaStore>>, branch: String) -> Result<()> {
    let Some(meta) = meta else {
        return Ok(());
    };
    meta.ready().await?;
    match meta.load(Some(branch.as_str())).await? {
        Some(metas) => info!(name = %meta.name(), events = metas.len(), "loaded meta history"),
        None => info!(name = %meta.name(), "no meta history, starting empty"),
    }
    Ok(())
}

impl std::fmt::Debug for CrdtEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrdtEngine")
            .field("name", &self.config.name)
            .field("head", &self.clock.head().len())
            .field("persists", &self.meta.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrdtConfigBuilder;
    use mdcs_merkle::MemoryBlockStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn engine() -> Arc<CrdtEngine> {
        CrdtEngine::new(
            CrdtConfigBuilder::new("test").build(),
            Arc::new(MemoryBlockStore::new()),
        )
    }

    struct CountingIndex {
        resets: AtomicUsize,
        applied: AtomicUsize,
    }

    impl IndexHook for CountingIndex {
        fn name(&self) -> &str {
            "counting"
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }

        fn apply(&self, updates: &[DocUpdate]) {
            self.applied.fetch_add(updates.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_bulk_and_get() {
        let engine = engine();
        let meta = engine
            .bulk(vec![DocUpdate::put("a", json!(1)), DocUpdate::put("b", json!(2))])
            .await
            .unwrap();

        assert_eq!(meta.head.len(), 1);
        assert_eq!(engine.head(), meta.head);
        assert_eq!(engine.get("a").unwrap(), Some(json!(1)));
        assert_eq!(engine.get("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_later_write_wins_and_delete() {
        let engine = engine();
        engine.bulk(vec![DocUpdate::put("a", json!("v1"))]).await.unwrap();
        engine.bulk(vec![DocUpdate::put("a", json!("v2"))]).await.unwrap();
        assert_eq!(engine.get("a").unwrap(), Some(json!("v2")));

        engine.bulk(vec![DocUpdate::delete("a")]).await.unwrap();
        assert_eq!(engine.get("a").unwrap(), None);
        assert!(engine.all_docs().unwrap().rows.is_empty());
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let engine = engine();
        let err = engine.bulk(vec![DocUpdate::put("", json!(1))]).await.unwrap_err();
        assert!(matches!(err, CrdtError::InvalidDocumentId(_)));
        assert!(engine.head().is_empty());
    }

    #[tokio::test]
    async fn test_changes_since() {
        let engine = engine();
        let first = engine.bulk(vec![DocUpdate::put("a", json!(1))]).await.unwrap();
        engine.bulk(vec![DocUpdate::put("b", json!(2))]).await.unwrap();

        let all = engine.changes(&[]).unwrap();
        assert_eq!(all.updates.len(), 2);

        let since = engine.changes(&first.head).unwrap();
        assert_eq!(since.updates, vec![DocUpdate::put("b", json!(2))]);
        assert_eq!(since.head, engine.head());
    }

    #[tokio::test]
    async fn test_index_fed_and_reset_on_zoom() {
        let engine = engine();
        let index = Arc::new(CountingIndex {
            resets: AtomicUsize::new(0),
            applied: AtomicUsize::new(0),
        });
        engine.register_index(index.clone());

        let base = engine.bulk(vec![DocUpdate::put("a", json!(1))]).await.unwrap();
        assert_eq!(index.applied.load(Ordering::SeqCst), 1);
        assert_eq!(index.resets.load(Ordering::SeqCst), 0);

        // A concurrent branch written elsewhere on the same base.
        let side = EventBlock::create(
            TxnPayload {
                updates: vec![DocUpdate::put("b", json!(2))],
            },
            base.head.clone(),
        )
        .unwrap();
        engine.blocks().put(side.to_raw()).unwrap();
        engine.bulk(vec![DocUpdate::put("c", json!(3))]).await.unwrap();

        let change = engine.merge_head(&[side.cid()]);
        assert!(change.is_zoom());
        assert_eq!(engine.head().len(), 2);
        assert_eq!(index.resets.load(Ordering::SeqCst), 1);
        assert_eq!(engine.all_docs().unwrap().rows.len(), 3);
    }

    #[tokio::test]
    async fn test_closed_engine() {
        let engine = engine();
        engine.close().await.unwrap();
        assert!(matches!(engine.get("a"), Err(CrdtError::Closed(_))));
        assert!(matches!(
            engine.bulk(vec![DocUpdate::put("a", json!(1))]).await,
            Err(CrdtError::Closed(_))
        ));
    }

    #[test]
    fn test_with_gateway_requires_url() {
        let result = CrdtEngine::with_gateway(
            CrdtConfigBuilder::new("test").build(),
            Arc::new(MemoryBlockStore::new()),
            Arc::new(mdcs_meta::MemoryGateway::new()),
        );
        assert!(matches!(result, Err(CrdtError::Config(_))));
    }
}
