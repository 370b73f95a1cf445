//! Knowledge base types and configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use railmind_common::RailmindError;
use serde::{Deserialize, Serialize};

/// The fixed set of corpus categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Timetables,
    Policies,
    #[serde(alias = "refund_rules")]
    RefundRules,
    #[serde(alias = "route_maps")]
    RouteMaps,
}

impl Category {
    /// Load order. Also the corpus order used to break score ties.
    pub const ALL: [Category; 4] = [
        Category::Timetables,
        Category::Policies,
        Category::RefundRules,
        Category::RouteMaps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timetables => "timetables",
            Self::Policies => "policies",
            Self::RefundRules => "refund-rules",
            Self::RouteMaps => "route-maps",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RailmindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "timetables" | "timetable" => Ok(Self::Timetables),
            "policies" | "policy" => Ok(Self::Policies),
            "refund-rules" | "refunds" => Ok(Self::RefundRules),
            "route-maps" | "routes" => Ok(Self::RouteMaps),
            other => Err(RailmindError::InvalidRequest(format!(
                "unknown knowledge category '{other}'"
            ))),
        }
    }
}

/// Stable reference to a passage: its category and position within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub category: Category,
    pub ordinal: usize,
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.category, self.ordinal)
    }
}

impl FromStr for DocumentRef {
    type Err = RailmindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, ordinal) = s
            .trim()
            .trim_matches(|c: char| c == '[' || c == ']')
            .split_once('#')
            .ok_or_else(|| RailmindError::InvalidResponse(format!("bad document ref '{s}'")))?;
        let ordinal = ordinal
            .parse()
            .map_err(|_| RailmindError::InvalidResponse(format!("bad document ref '{s}'")))?;
        Ok(Self {
            category: category.parse()?,
            ordinal,
        })
    }
}

/// A knowledge-base passage. Immutable once indexed.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: DocumentRef,
    pub text: String,
    /// Vector embedding computed at load time
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl Document {
    pub fn category(&self) -> Category {
        self.id.category
    }
}

/// One ranked passage.
#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub document: Arc<Document>,
    pub score: f64,
}

/// Passages ranked by descending similarity, at most `top_k` long.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub hits: Vec<RetrievalHit>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RetrievalHit> {
        self.hits.iter()
    }

    pub fn top_score(&self) -> Option<f64> {
        self.hits.first().map(|h| h.score)
    }

    pub fn refs(&self) -> Vec<DocumentRef> {
        self.hits.iter().map(|h| h.document.id).collect()
    }
}

/// Outcome of loading one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryLoad {
    Loaded { passages: usize },
    Missing { path: PathBuf },
    Failed { reason: String },
    NotConfigured,
}

impl CategoryLoad {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Per-category load outcomes. Loading as a whole never fails.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub categories: BTreeMap<Category, CategoryLoad>,
    /// Every configured source failed and the previous index was kept
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub kept_previous: bool,
}

impl LoadReport {
    pub fn get(&self, category: Category) -> Option<&CategoryLoad> {
        self.categories.get(&category)
    }

    /// True when sources were configured but none of them loaded.
    pub fn all_failed(&self) -> bool {
        let mut configured = self
            .categories
            .values()
            .filter(|c| **c != CategoryLoad::NotConfigured)
            .peekable();
        configured.peek().is_some() && configured.all(|c| !c.is_loaded())
    }

    pub fn total_passages(&self) -> usize {
        self.categories
            .values()
            .map(|c| match c {
                CategoryLoad::Loaded { passages } => *passages,
                _ => 0,
            })
            .sum()
    }
}

/// Knowledge base configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// A fastembed model name, or `hashed` for the offline lexical embedder
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Source file per category
    #[serde(default)]
    pub sources: BTreeMap<Category, PathBuf>,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Hits scoring below this are dropped. Unset keeps every hit.
    #[serde(default)]
    pub min_similarity: Option<f64>,

    /// Character budget for passages rendered into a prompt
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_embedding_dim() -> usize {
    384
}

fn default_top_k() -> usize {
    5
}

fn default_max_context_chars() -> usize {
    4000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            embedding_model: default_embedding_model(),
            embedding_dim: default_embedding_dim(),
            sources: BTreeMap::new(),
            default_top_k: default_top_k(),
            min_similarity: None,
            max_context_chars: default_max_context_chars(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Category::RefundRules).unwrap(),
            "\"refund-rules\""
        );
        let parsed: Category = serde_json::from_str("\"route_maps\"").unwrap();
        assert_eq!(parsed, Category::RouteMaps);
    }

    #[test]
    fn category_from_str_is_lenient() {
        assert_eq!("Refund_Rules".parse::<Category>().unwrap(), Category::RefundRules);
        assert_eq!("timetable".parse::<Category>().unwrap(), Category::Timetables);
        assert!("weather".parse::<Category>().is_err());
    }

    #[test]
    fn document_ref_display() {
        let id = DocumentRef {
            category: Category::Policies,
            ordinal: 3,
        };
        assert_eq!(id.to_string(), "policies#3");
        assert_eq!("[policies#3]".parse::<DocumentRef>().unwrap(), id);
        assert!("policies".parse::<DocumentRef>().is_err());
        assert!("policies#x".parse::<DocumentRef>().is_err());
    }

    #[test]
    fn config_from_toml_with_sources() {
        let config: KnowledgeConfig = toml::from_str(
            r#"
min_similarity = 0.3

[sources]
timetables = "data/timetables.json"
refund-rules = "data/refund_rules.txt"
"#,
        )
        .unwrap();
        assert_eq!(config.embedding_model, "all-MiniLM-L6-v2");
        assert_eq!(config.embedding_dim, 384);
        assert_eq!(config.default_top_k, 5);
        assert_eq!(config.min_similarity, Some(0.3));
        assert_eq!(config.sources.len(), 2);
        assert_eq!(
            config.sources[&Category::RefundRules],
            PathBuf::from("data/refund_rules.txt")
        );
    }

    #[test]
    fn load_report_totals() {
        let mut report = LoadReport::default();
        report
            .categories
            .insert(Category::Policies, CategoryLoad::Loaded { passages: 4 });
        report
            .categories
            .insert(Category::Timetables, CategoryLoad::Loaded { passages: 2 });
        report.categories.insert(
            Category::RefundRules,
            CategoryLoad::Missing {
                path: PathBuf::from("nope.txt"),
            },
        );
        assert_eq!(report.total_passages(), 6);
        assert!(!report.get(Category::RefundRules).unwrap().is_loaded());
        assert!(report.get(Category::RouteMaps).is_none());
    }
}
