//! The in-memory knowledge index.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use railmind_common::{RailmindError, Result};
use tracing::{debug, error, info, warn};

use crate::corpus::{read_passages, CorpusError};
use crate::embedding::{build_embedder, Embedder};
use crate::types::{
    Category, CategoryLoad, Document, DocumentRef, KnowledgeConfig, LoadReport, RetrievalHit,
    RetrievalResult,
};

/// Immutable snapshot of the indexed corpus.
///
/// Documents are stored in corpus order (categories in [`Category::ALL`]
/// order, passages in source order); each category owns a contiguous range.
#[derive(Default)]
struct KnowledgeIndex {
    documents: Vec<Arc<Document>>,
    ranges: BTreeMap<Category, Range<usize>>,
}

impl KnowledgeIndex {
    fn candidates(&self, category: Option<Category>) -> &[Arc<Document>] {
        match category {
            None => &self.documents,
            Some(c) => match self.ranges.get(&c) {
                Some(range) => &self.documents[range.clone()],
                None => &[],
            },
        }
    }
}

/// Cosine similarity accumulated in `f64`. Zero-norm or mismatched vectors
/// score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Corpus of railway knowledge with linear-scan similarity search.
///
/// Safe for any number of concurrent readers. [`KnowledgeBase::load`]
/// builds a fresh index and swaps it in whole; searches already running keep
/// the snapshot they started with.
pub struct KnowledgeBase {
    embedder: Arc<dyn Embedder>,
    index: RwLock<Arc<KnowledgeIndex>>,
    min_similarity: Option<f64>,
}

impl KnowledgeBase {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            index: RwLock::new(Arc::new(KnowledgeIndex::default())),
            min_similarity: None,
        }
    }

    /// Drop hits scoring below `floor`.
    pub fn with_min_similarity(mut self, floor: Option<f64>) -> Self {
        self.min_similarity = floor;
        self
    }

    /// Builds the configured embedder and loads the configured sources.
    pub async fn from_config(config: &KnowledgeConfig) -> Result<(Self, LoadReport)> {
        let embedder = build_embedder(&config.embedding_model, config.embedding_dim)
            .map_err(|e| RailmindError::Config(e.to_string()))?;
        let kb = Self::new(embedder).with_min_similarity(config.min_similarity);
        let report = kb.load(&config.sources).await;
        Ok((kb, report))
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Loads every category and replaces the current index.
    ///
    /// Each category succeeds or fails on its own; a failed category is
    /// left empty and the rest still load. When every configured source
    /// fails, a non-empty index already in place is kept instead.
    pub async fn load(&self, sources: &BTreeMap<Category, PathBuf>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut next = KnowledgeIndex::default();

        for category in Category::ALL {
            let Some(path) = sources.get(&category) else {
                debug!(category = %category, "No source configured");
                report.categories.insert(category, CategoryLoad::NotConfigured);
                continue;
            };

            let outcome = match self.load_category(category, path).await {
                Ok(documents) => {
                    let start = next.documents.len();
                    let count = documents.len();
                    next.documents.extend(documents);
                    next.ranges.insert(category, start..next.documents.len());
                    info!(category = %category, passages = count, path = %path.display(), "Category loaded");
                    CategoryLoad::Loaded { passages: count }
                }
                Err(LoadFailure::Corpus(CorpusError::Missing(path))) => {
                    warn!(category = %category, path = %path.display(), "Knowledge source missing, category left empty");
                    CategoryLoad::Missing { path }
                }
                Err(failure) => {
                    let reason = failure.to_string();
                    warn!(category = %category, error = %reason, "Knowledge source failed to load, category left empty");
                    CategoryLoad::Failed { reason }
                }
            };
            report.categories.insert(category, outcome);
        }

        if report.all_failed() && !self.is_empty() {
            error!(
                kept_passages = self.len(),
                "Every knowledge source failed to load, keeping the previous index"
            );
            report.kept_previous = true;
            return report;
        }

        *self.index.write() = Arc::new(next);
        info!(
            total_passages = report.total_passages(),
            model = %self.embedder.model_name(),
            "Knowledge index swapped in"
        );
        report
    }

    async fn load_category(
        &self,
        category: Category,
        path: &std::path::Path,
    ) -> std::result::Result<Vec<Arc<Document>>, LoadFailure> {
        let passages = read_passages(path).await.map_err(LoadFailure::Corpus)?;
        let embeddings = self
            .embedder
            .embed_batch(&passages)
            .await
            .map_err(|e| LoadFailure::Embedding(e.to_string()))?;
        if embeddings.len() != passages.len() {
            return Err(LoadFailure::Embedding(format!(
                "expected {} embeddings, got {}",
                passages.len(),
                embeddings.len()
            )));
        }

        Ok(passages
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(ordinal, (text, embedding))| {
                Arc::new(Document {
                    id: DocumentRef { category, ordinal },
                    text,
                    embedding,
                })
            })
            .collect())
    }

    /// Ranks passages against `query`, optionally within one category.
    ///
    /// An empty index or category yields an empty result. Equal scores keep
    /// corpus order.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        category: Option<Category>,
    ) -> Result<RetrievalResult> {
        let snapshot = Arc::clone(&self.index.read());
        if top_k == 0 || snapshot.candidates(category).is_empty() {
            return Ok(RetrievalResult::empty());
        }

        let query_vec = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RailmindError::Knowledge(e.to_string()))?;

        let mut scored: Vec<RetrievalHit> = snapshot
            .candidates(category)
            .iter()
            .map(|doc| RetrievalHit {
                score: cosine_similarity(&query_vec, &doc.embedding),
                document: Arc::clone(doc),
            })
            .filter(|hit| self.min_similarity.map_or(true, |floor| hit.score >= floor))
            .collect();

        // sort_by is stable
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);

        debug!(
            category = ?category,
            top_k,
            returned = scored.len(),
            top_score = scored.first().map(|h| h.score),
            "Retrieved passages"
        );

        Ok(RetrievalResult { hits: scored })
    }

    /// Passage count per loaded category.
    pub fn stats(&self) -> BTreeMap<Category, usize> {
        let snapshot = self.index.read();
        snapshot
            .ranges
            .iter()
            .map(|(category, range)| (*category, range.len()))
            .collect()
    }

    /// Passages of one category in source order.
    pub fn documents(&self, category: Category) -> Vec<Arc<Document>> {
        self.index.read().candidates(Some(category)).to_vec()
    }

    pub fn len(&self) -> usize {
        self.index.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
enum LoadFailure {
    #[error(transparent)]
    Corpus(CorpusError),
    #[error("embedding failed: {0}")]
    Embedding(String),
}
