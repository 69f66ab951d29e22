use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use mdcs_crdt::{CrdtConfigBuilder, CrdtEngine, CrdtError, DocUpdate};
use mdcs_merkle::{same_set, BlockStore, MemoryBlockStore};
use mdcs_meta::MemoryGateway;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

/// Statistics collected during a replica sync run
#[derive(Clone, Debug)]
pub struct SyncStressStats {
    pub num_replicas: usize,
    pub writes_per_replica: usize,
    pub total_writes: usize,
    pub total_time: Duration,
    pub avg_commit_time: Duration,
    pub writes_per_second: f64,
    pub head_width: usize,
    pub converged: bool,
}

impl SyncStressStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Replica Sync Statistics                        ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Writes per Replica:        {:>30} ║", self.writes_per_replica);
        println!("║  Total Writes:              {:>30} ║", self.total_writes);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Commit Time:       {:>28}µs ║", self.avg_commit_time.as_micros());
        println!("║  Writes/Second:             {:>30.0} ║", self.writes_per_second);
        println!("║  Final Head Width:          {:>30} ║", self.head_width);
        println!("║  Converged:                 {:>30} ║", self.converged);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// Generator that yields (replica, document id, value) writes
fn write_generator(
    num_replicas: usize,
    num_writes: usize,
    seed: u64,
) -> impl Stream<Item = (usize, String, u64)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for i in 0..num_writes {
            let replica = rng.gen_range(0..num_replicas);
            let doc = format!("doc-{}", rng.gen_range(0..32));
            yield (replica, doc, i as u64);
        }
    }
}

fn converged(replicas: &[Arc<CrdtEngine>]) -> Result<bool, CrdtError> {
    let Some(first) = replicas.first() else {
        return Ok(true);
    };
    let head = first.head();
    let docs = first.all_docs()?.rows;
    for replica in &replicas[1..] {
        if !same_set(&replica.head(), &head) || replica.all_docs()?.rows != docs {
            warn!(replica = replica.name(), "replica diverged");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Replicas sharing one block store and one gateway, each subscribed to
/// the meta branch, receiving random writes.
pub async fn stress_test_replicas(
    num_replicas: usize,
    writes_per_replica: usize,
    seed: u64,
) -> Result<SyncStressStats, CrdtError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Replica Sync Stress Test                            ║");
    println!("║  Replicas: {} | Writes/Replica: {} | Seed: {} ║",
             num_replicas, writes_per_replica, seed);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let url = Url::parse("memory://stress?store=meta")
        .map_err(|e| CrdtError::Config(e.to_string()))?;
    let blocks: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
    let gateway = MemoryGateway::new();

    println!("\n[Phase 1/2] Starting replicas...");
    let mut replicas = Vec::with_capacity(num_replicas);
    for _ in 0..num_replicas {
        let config = CrdtConfigBuilder::new("stress-db")
            .meta_url(url.clone())
            .remote(true)
            .build();
        let engine =
            CrdtEngine::with_gateway(config, Arc::clone(&blocks), Arc::new(gateway.clone()))?;
        engine.ready().await?;
        replicas.push(engine);
    }
    println!("[Phase 1/2] ✓ Completed");

    println!("[Phase 2/2] Writing through random replicas...");
    let total = num_replicas * writes_per_replica;
    let mut commit_times = Vec::with_capacity(total);
    let mut writes = Box::pin(write_generator(num_replicas, total, seed));

    while let Some((replica, doc, value)) = writes.next().await {
        let commit_start = Instant::now();
        replicas[replica]
            .bulk(vec![DocUpdate::put(doc, json!({ "n": value }))])
            .await?;
        commit_times.push(commit_start.elapsed());

        if commit_times.len() % 100 == 0 {
            println!("  Writes committed: {}/{}", commit_times.len(), total);
        }
    }

    let total_time = start.elapsed();
    let avg_commit_time = if !commit_times.is_empty() {
        commit_times.iter().sum::<Duration>() / commit_times.len() as u32
    } else {
        Duration::ZERO
    };
    let converged = converged(&replicas)?;
    let head_width = replicas.first().map(|r| r.head().len()).unwrap_or(0);
    println!("[Phase 2/2] ✓ Completed");

    for replica in &replicas {
        replica.close().await?;
    }
    info!(replicas = num_replicas, writes = total, converged, "stress run finished");

    Ok(SyncStressStats {
        num_replicas,
        writes_per_replica,
        total_writes: total,
        total_time,
        avg_commit_time,
        writes_per_second: total as f64 / total_time.as_secs_f64(),
        head_width,
        converged,
    })
}
