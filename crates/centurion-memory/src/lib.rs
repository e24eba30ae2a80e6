pub mod cache;
pub mod cleanup;
pub mod db;
pub mod similarity;
pub mod store;
pub mod types;

pub use cache::HistoryCache;
pub use cleanup::{run_once, CleanupReport, MemoryCleanupWorker};
pub use db::init_db;
pub use similarity::{CosineScorer, SimilarityScorer};
pub use store::{FactStore, KnowledgeStore};
pub use types::{Fact, FactSource, KnowledgeChunk};
