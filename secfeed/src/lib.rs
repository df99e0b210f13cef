pub mod activity;
pub mod categoriser;
pub mod config;
pub mod dedup;
pub mod extractor;
pub mod fetcher;
pub mod ingestion;
pub mod llm_adapter;
pub mod parser;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod summariser;
pub mod types;

pub use activity::{ActivityCategory, ActivityEntry, ActivityLevel, ActivityLog};
pub use extractor::ContentExtractor;
pub use fetcher::{FeedFetcher, Fetcher, PageFetcher};
pub use ingestion::FeedIngester;
pub use llm_adapter::{build_backend, InferenceBackend, InferenceError, LlmConfig};
pub use parser::FeedParser;
pub use scheduler::{Pipeline, ScheduleConfig, Scheduler};
pub use store::{MemoryStore, PgStore};
pub use summariser::{Summariser, SummariserConfig};
pub use types::*;
