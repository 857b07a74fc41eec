//! Local index persistence across engine restarts

mod common;

use common::{config, engine_with, MemoryVault, DAY_MS, JAN_1};
use tempfile::TempDir;
use vaultroot_core::Config;

fn vault() -> std::sync::Arc<MemoryVault> {
    let vault = MemoryVault::new();
    vault.add("Monge.md", "O monge acorda cedo e medita.", JAN_1);
    vault.add("Trilhas/serra.md", "Subida da montanha pela serra.", JAN_1 + DAY_MS);
    vault.add("Trilhas/mar.md", "Caminhada na praia ao amanhecer.", JAN_1 + 2 * DAY_MS);
    vault
}

fn persistent_config(dir: &TempDir) -> Config {
    let mut config = config();
    config.index.path = Some(dir.path().join("index").join("index.json"));
    config
}

#[tokio::test]
async fn reloaded_index_answers_identically() {
    let dir = TempDir::new().unwrap();
    let first = engine_with(vault(), persistent_config(&dir));
    let built = first.rebuild_index().await.unwrap();

    let second_vault = vault();
    let second = engine_with(second_vault.clone(), persistent_config(&dir));
    let loaded = second.indexer().snapshot().expect("persisted index loaded");

    assert_eq!(loaded.generation, built.generation);
    let terms: Vec<&str> = built.terms().collect();
    assert!(!terms.is_empty());
    for term in terms {
        assert_eq!(loaded.query(term), built.query(term), "term {}", term);
    }
    assert_eq!(second.suggest("mon", 5), first.suggest("mon", 5));

    let context = second.search("montanha", 500).await.unwrap();
    assert_eq!(context.sources[0].path, "Trilhas/serra.md");
    assert_eq!(second_vault.listing_calls(), 0);
    assert_eq!(second.stats().warm_searches, 1);
}

#[tokio::test]
async fn corrupt_index_file_starts_cold() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    engine_with(vault(), config.clone())
        .rebuild_index()
        .await
        .unwrap();

    let path = config.index.path.clone().unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, text.replace("montanha", "montanhz")).unwrap();

    let engine = engine_with(vault(), config);
    assert!(!engine.indexer().is_warm());
    assert!(engine.indexer().needs_rebuild());

    engine.rebuild_index().await.unwrap();
    assert!(engine.indexer().is_warm());
    assert_eq!(engine.indexer().query("montanha").len(), 1);
}

#[tokio::test]
async fn expired_index_is_ignored_on_load() {
    let dir = TempDir::new().unwrap();
    let mut config = persistent_config(&dir);
    engine_with(vault(), config.clone())
        .rebuild_index()
        .await
        .unwrap();

    config.index.ttl_secs = 0;
    std::thread::sleep(std::time::Duration::from_millis(5));
    let engine = engine_with(vault(), config);
    assert!(!engine.indexer().is_warm());
}
