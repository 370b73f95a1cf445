//! Retrieval subsystem for railmind.
//!
//! Holds a small corpus of railway knowledge in four fixed categories
//! (timetables, policies, refund rules, route maps), embeds every passage at
//! load time, and answers queries with a linear cosine-similarity scan.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   KNOWLEDGE BASE                     │
//! ├──────────────────────────────────────────────────────┤
//! │  sources ──▶ corpus (split) ──▶ Embedder ──▶ index   │
//! │                                                ▲     │
//! │  RwLock<Arc<index>>  ◀── atomic swap on load ──┘     │
//! │        │                                             │
//! │        ▼ snapshot                                    │
//! │  retrieve(query, k, category?) ──▶ RetrievalResult   │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod corpus;
pub mod embedding;
pub mod retrieval;
pub mod store;
pub mod types;

pub use embedding::{build_embedder, Embedder, EmbeddingError, HashedEmbedder};
#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedder;
pub use store::{cosine_similarity, KnowledgeBase};
pub use types::{
    Category, CategoryLoad, Document, DocumentRef, KnowledgeConfig, LoadReport, RetrievalHit,
    RetrievalResult,
};
