//! Integration tests for the knowledge base.
//!
//! These tests load small on-disk corpora and exercise partial loading,
//! filtered retrieval, ranking stability, and index reloads.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use railmind_knowledge::{
    Category, CategoryLoad, HashedEmbedder, KnowledgeBase, KnowledgeConfig,
};
use tempfile::TempDir;

const TIMETABLES: &str = r#"[
    {"content": "12627 Karnataka Express departs KSR Bengaluru 19:20 and reaches New Delhi at 09:00 on day three."},
    {"train": "12007", "name": "Shatabdi Express", "from": "MAS", "to": "SBC", "departs": "06:00"}
]"#;

const POLICIES: &str = "Passengers must carry a valid photo ID while travelling.\n\n\
Luggage above 40 kg in sleeper class attracts an excess charge.\n\n\
Pets are allowed only in first class AC coupes.";

const REFUND_RULES: &str = "A full refund is granted when a train is cancelled by the railway.\n\n\
If a train is delayed by more than three hours, a full refund is available when the ticket is cancelled before departure.\n\n\
Tatkal tickets are not refundable except when the train is cancelled.";

const ROUTE_MAPS: &str = r#"[
    {"content": "Chennai Central to Bengaluru via Katpadi, Jolarpettai and Bangarapet."},
    {"content": "Katpadi is the junction for Tirupati branch line services."}
]"#;

fn write_corpus(dir: &TempDir) -> BTreeMap<Category, PathBuf> {
    let files = [
        (Category::Timetables, "timetables.json", TIMETABLES),
        (Category::Policies, "policies.txt", POLICIES),
        (Category::RefundRules, "refund_rules.txt", REFUND_RULES),
        (Category::RouteMaps, "route_maps.json", ROUTE_MAPS),
    ];
    files
        .into_iter()
        .map(|(category, name, body)| {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            (category, path)
        })
        .collect()
}

fn knowledge_base() -> KnowledgeBase {
    KnowledgeBase::new(Arc::new(HashedEmbedder::default()))
}

#[tokio::test]
async fn test_full_corpus_loads_every_category() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    let report = kb.load(&write_corpus(&dir)).await;

    assert_eq!(
        report.get(Category::Timetables),
        Some(&CategoryLoad::Loaded { passages: 2 })
    );
    assert_eq!(
        report.get(Category::Policies),
        Some(&CategoryLoad::Loaded { passages: 3 })
    );
    assert_eq!(
        report.get(Category::RefundRules),
        Some(&CategoryLoad::Loaded { passages: 3 })
    );
    assert_eq!(
        report.get(Category::RouteMaps),
        Some(&CategoryLoad::Loaded { passages: 2 })
    );
    assert_eq!(kb.len(), 10);
}

#[tokio::test]
async fn test_missing_refund_rules_leaves_other_categories_loaded() {
    let dir = TempDir::new().unwrap();
    let mut sources = write_corpus(&dir);
    sources.insert(Category::RefundRules, dir.path().join("does_not_exist.txt"));

    let kb = knowledge_base();
    let report = kb.load(&sources).await;

    assert!(matches!(
        report.get(Category::RefundRules),
        Some(CategoryLoad::Missing { .. })
    ));
    for category in [Category::Timetables, Category::Policies, Category::RouteMaps] {
        assert!(report.get(category).unwrap().is_loaded(), "{category} should load");
    }

    let refunds = kb
        .retrieve("refund for cancelled train", 3, Some(Category::RefundRules))
        .await
        .unwrap();
    assert!(refunds.is_empty());

    let policies = kb
        .retrieve("photo ID", 3, Some(Category::Policies))
        .await
        .unwrap();
    assert!(!policies.is_empty());
    assert!(policies.hits[0].document.text.contains("photo ID"));
}

#[tokio::test]
async fn test_malformed_source_fails_only_its_category() {
    let dir = TempDir::new().unwrap();
    let mut sources = write_corpus(&dir);
    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    sources.insert(Category::Timetables, broken);

    let kb = knowledge_base();
    let report = kb.load(&sources).await;

    assert!(matches!(
        report.get(Category::Timetables),
        Some(CategoryLoad::Failed { .. })
    ));
    assert_eq!(kb.stats().get(&Category::Timetables), None);
    assert_eq!(kb.stats().get(&Category::RefundRules), Some(&3));
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb.load(&write_corpus(&dir)).await;

    let first = kb.retrieve("train cancelled refund", 5, None).await.unwrap();
    for _ in 0..10 {
        let again = kb.retrieve("train cancelled refund", 5, None).await.unwrap();
        assert_eq!(again.refs(), first.refs());
    }
}

#[tokio::test]
async fn test_ties_keep_corpus_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policies.txt");
    std::fs::write(&path, "alpha rule\n\nalpha rule\n\nalpha rule").unwrap();
    let sources = BTreeMap::from([(Category::Policies, path)]);

    let kb = knowledge_base();
    kb.load(&sources).await;

    let result = kb.retrieve("alpha", 3, None).await.unwrap();
    let ordinals: Vec<usize> = result.refs().iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
    assert!(result.hits.windows(2).all(|w| w[0].score == w[1].score));
}

#[tokio::test]
async fn test_results_are_sorted_and_bounded() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb.load(&write_corpus(&dir)).await;

    let result = kb.retrieve("Katpadi junction route", 3, None).await.unwrap();
    assert_eq!(result.len(), 3);
    assert!(result.hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(result.hits[0].document.category(), Category::RouteMaps);
}

#[tokio::test]
async fn test_category_filter_restricts_results() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb.load(&write_corpus(&dir)).await;

    let result = kb
        .retrieve("What is the refund policy for cancelled trains?", 5, Some(Category::RefundRules))
        .await
        .unwrap();
    assert_eq!(result.len(), 3);
    assert!(result.iter().all(|h| h.document.category() == Category::RefundRules));
    assert!(result.top_score().unwrap() > 0.0);
}

#[tokio::test]
async fn test_similarity_floor_drops_weak_hits() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base().with_min_similarity(Some(0.3));
    kb.load(&write_corpus(&dir)).await;

    let result = kb.retrieve("Tatkal refundable", 10, None).await.unwrap();
    assert!(!result.is_empty());
    assert!(result.iter().all(|h| h.score >= 0.3));
    assert!(result.len() < 10);
}

#[tokio::test]
async fn test_reload_swaps_index() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb.load(&write_corpus(&dir)).await;
    assert_eq!(kb.len(), 10);

    let path = dir.path().join("only_policies.txt");
    std::fs::write(&path, "Smoking is prohibited on all trains.").unwrap();
    kb.load(&BTreeMap::from([(Category::Policies, path)])).await;

    assert_eq!(kb.len(), 1);
    assert!(kb
        .retrieve("refund", 5, Some(Category::RefundRules))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_reload_with_every_source_failing_keeps_index() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb.load(&write_corpus(&dir)).await;
    assert_eq!(kb.len(), 10);

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    let report = kb
        .load(&BTreeMap::from([
            (Category::Policies, dir.path().join("gone.txt")),
            (Category::RouteMaps, broken),
        ]))
        .await;

    assert!(report.kept_previous);
    assert_eq!(report.total_passages(), 0);
    assert!(matches!(
        report.get(Category::Policies),
        Some(CategoryLoad::Missing { .. })
    ));
    assert_eq!(kb.len(), 10);
    assert_eq!(kb.documents(Category::RefundRules).len(), 3);
}

#[tokio::test]
async fn test_empty_reload_replaces_index() {
    let dir = TempDir::new().unwrap();
    let kb = knowledge_base();
    kb.load(&write_corpus(&dir)).await;

    let report = kb.load(&BTreeMap::new()).await;
    assert!(!report.kept_previous);
    assert!(kb.is_empty());
}

#[tokio::test]
async fn test_concurrent_readers_during_reload() {
    let dir = TempDir::new().unwrap();
    let sources = write_corpus(&dir);
    let kb = Arc::new(knowledge_base());
    kb.load(&sources).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let kb = kb.clone();
        let sources = sources.clone();
        handles.push(tokio::spawn(async move {
            if i % 4 == 0 {
                kb.load(&sources).await;
            }
            kb.retrieve("refund", 2, None).await.unwrap().len()
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), 2);
    }
}

#[tokio::test]
async fn test_from_config_loads_sources() {
    let dir = TempDir::new().unwrap();
    let config = KnowledgeConfig {
        embedding_model: "hashed".to_string(),
        sources: write_corpus(&dir),
        ..Default::default()
    };
    let (kb, report) = KnowledgeBase::from_config(&config).await.unwrap();
    assert_eq!(report.total_passages(), 10);
    assert_eq!(kb.embedder().model_name(), "hashed");
}
