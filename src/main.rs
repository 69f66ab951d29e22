use mdcs_crdt::{CrdtConfigBuilder, CrdtEngine, CrdtError, DocUpdate};
use mdcs_merkle::{BlockStore, MemoryBlockStore};
use mdcs_meta::{
    embed_key_into_payload, extract_and_register_key, store_key_name, Gateway, GatewayError,
    MemoryGateway, MemoryKeyBag, MetaError,
};
use serde_json::json;
use std::sync::Arc;
use sync_stress::stress_test_replicas;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;
pub mod sync_stress;

#[tokio::main]
async fn main() -> Result<(), CrdtError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    two_replica_demo().await?;

    // Run replica sync stress tests
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICA SYNC STRESS TESTS                       ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let stats = stress_test_replicas(2, 50, 7).await?;
    stats.print();

    let stats = stress_test_replicas(5, 100, 42).await?;
    stats.print();

    println!("\n✓ All runs completed successfully!");
    Ok(())
}

async fn two_replica_demo() -> Result<(), CrdtError> {
    let url = Url::parse("memory://demo?store=meta").map_err(|e| CrdtError::Config(e.to_string()))?;
    let blocks: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let gateway = MemoryGateway::new();

    let replica = |name: &str| {
        let config = CrdtConfigBuilder::new("demo-db")
            .meta_url(url.clone())
            .remote(true)
            .build();
        info!(replica = name, "starting replica");
        CrdtEngine::with_gateway(config, Arc::clone(&blocks), Arc::new(gateway.clone()))
    };
    let alice = replica("alice")?;
    let bob = replica("bob")?;
    alice.ready().await?;
    bob.ready().await?;

    alice
        .bulk(vec![
            DocUpdate::put("todo-1", json!({ "title": "write docs", "done": false })),
            DocUpdate::put("todo-2", json!({ "title": "ship", "done": false })),
        ])
        .await?;
    bob.bulk(vec![
        DocUpdate::put("todo-1", json!({ "title": "write docs", "done": true })),
        DocUpdate::delete("todo-2"),
    ])
    .await?;

    for (name, engine) in [("alice", &alice), ("bob", &bob)] {
        let docs = engine.all_docs()?;
        println!("{} sees {} document(s) at head {:?}", name, docs.rows.len(), docs.head);
        for doc in docs.rows {
            println!("  {} = {}", doc.id, doc.value);
        }
    }

    // Hand the data key to a fresh replica inside the current meta payload.
    if let Some(store) = alice.meta_store() {
        let sender = MemoryKeyBag::new();
        let key_name = store_key_name(&store.url())?;
        sender.generate_named_key(&key_name);

        let branch = gateway
            .build_url(&store.url(), "main")
            .await
            .map_err(|source| gateway_error("buildUrl", &store.url(), source))?;
        let payload = gateway
            .get(&branch)
            .await
            .map_err(|source| gateway_error("get", &branch, source))?;
        let keyed = embed_key_into_payload(&sender, &store.url(), &payload).await?;

        let receiver = MemoryKeyBag::new();
        extract_and_register_key(&receiver, &store.url(), &keyed).await?;
        println!("key {} transferred: {}", key_name, receiver.contains(&key_name));
    }

    alice.close().await?;
    bob.close().await?;
    Ok(())
}

fn gateway_error(op: &'static str, url: &Url, source: GatewayError) -> CrdtError {
    CrdtError::Meta(MetaError::Gateway {
        op,
        url: url.to_string(),
        source,
    })
}
