//! End-to-end scenarios over a fully wired engine.

use cortex_engine::EngineBuilder;
use cortex_facts::StoreFact;
use cortex_types::compaction::{CompactionOptions, CompactionStrategy};
use cortex_types::config::CortexConfig;
use cortex_types::search::{SearchMode, SearchRequest};
use tempfile::TempDir;

async fn engine_in(dir: &TempDir) -> cortex_engine::Engine {
    let config = CortexConfig {
        db_path: dir.path().join("cortex.db"),
        ..CortexConfig::default()
    };
    EngineBuilder::new(config).build().await.unwrap()
}

async fn engine_without_vectors(dir: &TempDir) -> cortex_engine::Engine {
    let config = CortexConfig {
        db_path: dir.path().join("cortex.db"),
        ..CortexConfig::default()
    };
    EngineBuilder::new(config)
        .without_embedder()
        .build()
        .await
        .unwrap()
}

async fn tx_id_of(engine: &cortex_engine::Engine, fact_id: i64, tenant: &str) -> i64 {
    engine
        .history("sim", tenant, None)
        .await
        .ok()
        .and_then(|facts| facts.into_iter().find(|f| f.id == fact_id))
        .and_then(|f| f.tx_id)
        .unwrap()
}

// Two stores produce a chain anchored at GENESIS that verifies clean.
#[tokio::test]
async fn ledger_chain_links_from_genesis() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let f1 = engine
        .store(StoreFact::new("sim", "Fact A, comfortably long.", "t1"))
        .await
        .unwrap();
    let f2 = engine
        .store(StoreFact::new("sim", "Fact B, comfortably long.", "t1"))
        .await
        .unwrap();
    assert_eq!((f1, f2), (1, 2));
    assert_eq!(tx_id_of(&engine, f1, "t1").await, 1);
    assert_eq!(tx_id_of(&engine, f2, "t1").await, 2);

    let report = engine.verify_ledger().await.unwrap();
    assert!(report.valid, "violations: {:?}", report.violations);
    assert_eq!(report.tx_checked, 2);
    engine.shutdown().await;
}

// Storing identical content twice returns the same id and appends one
// ledger entry.
#[tokio::test]
async fn store_is_dedup_idempotent() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let a = engine
        .store(StoreFact::new("p", "Exactly the same content body.", "t"))
        .await
        .unwrap();
    let b = engine
        .store(StoreFact::new("p", "Exactly the same content body.", "t"))
        .await
        .unwrap();
    assert_eq!(a, b);

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.total_facts, 1);
    assert_eq!(stats.transactions, 1);
    engine.shutdown().await;
}

// Recall and search never cross the tenant boundary.
#[tokio::test]
async fn tenants_never_leak() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    engine
        .store(StoreFact::new("shared", "Budget is $1M this quarter.", "A"))
        .await
        .unwrap();
    engine
        .store(StoreFact::new("shared", "Budget is $5M this quarter.", "B"))
        .await
        .unwrap();

    let a = engine.recall("shared", "A", None, 0).await.unwrap();
    assert_eq!(a.len(), 1);
    assert!(a[0].content.contains("$1M"));

    let results = engine
        .search(&SearchRequest::new("budget quarter", "B"))
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.content.contains("$5M")));
    engine.shutdown().await;
}

// A high-reputation upvote outweighs a low-reputation downvote and
// flips the fact to verified.
#[tokio::test]
async fn weighted_consensus_flips_to_verified() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let fact = engine
        .store(StoreFact::new("p", "A contested fact, long enough.", "t"))
        .await
        .unwrap();
    let whale = engine.register_agent("whale", "ai", None).await.unwrap();
    let shrimp = engine.register_agent("shrimp", "ai", None).await.unwrap();

    // Reputation fixture, the way an operator would set it.
    {
        let conn = rusqlite::Connection::open(dir.path().join("cortex.db")).unwrap();
        conn.busy_timeout(std::time::Duration::from_secs(5)).unwrap();
        conn.execute(
            "UPDATE agents SET reputation_score = 10.0 WHERE id = ?1",
            [whale],
        )
        .unwrap();
        conn.execute(
            "UPDATE agents SET reputation_score = 1.0 WHERE id = ?1",
            [shrimp],
        )
        .unwrap();
    }

    engine.vote(fact, shrimp, -1, "t").await.unwrap();
    let receipt = engine.vote(fact, whale, 1, "t").await.unwrap();

    // Weight sum = +10 - 1 = 9 → score 1.9 → verified.
    assert!((receipt.new_consensus_score - 1.9).abs() < 1e-9);
    assert_eq!(receipt.new_confidence.as_deref(), Some("verified"));

    let recalled = engine.recall("p", "t", None, 0).await.unwrap();
    assert_eq!(recalled[0].confidence.as_str(), "verified");
    assert!((recalled[0].consensus_score - 1.9).abs() < 1e-9);
    engine.shutdown().await;
}

// Time travel reconstructs the active set as of a transaction id.
#[tokio::test]
async fn time_travel_reconstructs_active_sets() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let f1 = engine
        .store(StoreFact::new("sim", "First timeline fact here.", "t"))
        .await
        .unwrap();
    let f2 = engine
        .store(StoreFact::new("sim", "Second timeline fact here.", "t"))
        .await
        .unwrap();
    let t2 = tx_id_of(&engine, f2, "t").await;
    engine.deprecate(f1, "t", None).await.unwrap();
    let t3 = t2 + 1;

    let at_t2: Vec<i64> = engine
        .time_travel(t2, "t", Some("sim"))
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(at_t2, vec![f1, f2]);

    let at_t3: Vec<i64> = engine
        .time_travel(t3, "t", Some("sim"))
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(at_t3, vec![f2]);
    engine.shutdown().await;
}

// Compaction deprecates, never deletes: history keeps every version.
#[tokio::test]
async fn compaction_preserves_lineage() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    // Cosmetic variants: storage-time dedup admits them, compaction folds them.
    for content in [
        "Retry budget is three attempts.",
        "Retry budget is three attempts",
        "retry  budget is three attempts.",
    ] {
        engine.store(StoreFact::new("p", content, "t")).await.unwrap();
    }

    let result = engine
        .compact(
            "p",
            "t",
            CompactionOptions {
                strategies: Some(vec![CompactionStrategy::Dedup]),
                ..CompactionOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.original_count, 3);
    assert_eq!(result.compacted_count, 1);

    let history = engine.history("p", "t", None).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().filter(|f| f.is_active()).count(), 1);

    // The ledger still verifies with creation + deprecation entries.
    let report = engine.verify_ledger().await.unwrap();
    assert!(report.valid);
    engine.shutdown().await;
}

// With the vector arm disabled, hybrid search still answers from the
// lexical index and never errors.
#[tokio::test]
async fn search_survives_without_vector_arm() {
    let dir = TempDir::new().unwrap();
    let engine = engine_without_vectors(&dir).await;

    engine
        .store(StoreFact::new("p", "The foo subsystem handles retries.", "t"))
        .await
        .unwrap();

    let results = engine
        .search(&SearchRequest::new("foo retries", "t"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].content.contains("foo"));
    engine.shutdown().await;
}

// Deprecation: excluded from recall, preserved in history (invariant 6).
#[tokio::test]
async fn deprecation_preserves_history() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let id = engine
        .store(StoreFact::new("p", "Soon to be deprecated content.", "t"))
        .await
        .unwrap();
    let before = cortex_types::time::now_iso();
    assert!(engine.deprecate(id, "t", Some("cleanup".into())).await.unwrap());

    assert!(engine.recall("p", "t", None, 0).await.unwrap().is_empty());
    let at_before = engine.history("p", "t", Some(&before)).await.unwrap();
    assert_eq!(at_before.len(), 1);
    assert_eq!(at_before[0].id, id);
    engine.shutdown().await;
}

// Hybrid search returns the semantic shape: scores, tags, tx linkage.
#[tokio::test]
async fn search_results_carry_ledger_linkage() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let mut req = StoreFact::new("p", "Vector clocks order distributed events.", "t");
    req.tags = vec!["distsys".to_string()];
    engine.store(req).await.unwrap();

    // Let the embedding backfill settle.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let results = engine
        .search(&SearchRequest {
            mode: SearchMode::Hybrid,
            ..SearchRequest::new("vector clocks ordering", "t")
        })
        .await
        .unwrap();
    assert!(!results.is_empty());
    let hit = &results[0];
    assert!(hit.score > 0.0);
    assert_eq!(hit.tags, vec!["distsys".to_string()]);
    assert!(hit.tx_id.is_some());
    assert!(hit.hash.is_some());
    engine.shutdown().await;
}

// Snapshots: export produces a file plus sibling metadata, and lists back.
#[tokio::test]
async fn snapshot_export_and_list() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    engine
        .store(StoreFact::new("p", "A fact worth snapshotting now.", "t"))
        .await
        .unwrap();
    let record = engine.export_snapshot("before launch v2").await.unwrap();
    assert_eq!(record.name, "before_launch_v2");
    assert!(record.path.exists());
    assert!(record.tx_id >= 1);

    let listed = engine.list_snapshots().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "before_launch_v2");
    engine.shutdown().await;
}

// Graph outbox: stored facts leave CDC rows; draining marks or parks them.
#[tokio::test]
async fn graph_outbox_drains_and_parks() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    engine
        .store(StoreFact::new(
            "p",
            "Deploy `cortex-engine` behind Nginx today.",
            "t",
        ))
        .await
        .unwrap();

    // First pass: the consumer accepts everything.
    let (sent, parked) = engine.drain_graph_outbox(|_| true).await.unwrap();
    assert_eq!((sent, parked), (1, 0));

    // Nothing pending afterwards.
    let (sent, parked) = engine.drain_graph_outbox(|_| true).await.unwrap();
    assert_eq!((sent, parked), (0, 0));

    // A row whose consumer keeps failing is retried, then parked.
    engine
        .store(StoreFact::new(
            "p",
            "Schedule `metrics-export` through Grafana weekly.",
            "t",
        ))
        .await
        .unwrap();
    let mut last = (0, 0);
    for _ in 0..5 {
        last = engine.drain_graph_outbox(|_| false).await.unwrap();
    }
    assert_eq!(last, (0, 1));
    let (sent, parked) = engine.drain_graph_outbox(|_| true).await.unwrap();
    assert_eq!((sent, parked), (0, 0));
    engine.shutdown().await;
}

// Auth wiring: keys authenticate and bind tenants end to end.
#[tokio::test]
async fn auth_keys_bind_tenants() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir).await;

    let (raw, _) = engine
        .auth()
        .create_key(
            "api_agent",
            "test_proj",
            cortex_types::auth::Role::Agent,
            vec![],
            100,
        )
        .await
        .unwrap();
    let auth = engine.auth().authenticate(&raw).await.unwrap();
    assert!(auth.authenticated);
    assert_eq!(auth.tenant_id.as_deref(), Some("test_proj"));
    engine.shutdown().await;
}
