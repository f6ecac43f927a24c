pub mod aggregator;
pub mod annotator;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod state;
pub mod types;

pub use config::{EngineKind, PlateServiceConfig};
pub use error::{PipelineError, StorageError};
pub use history::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};
pub use pipeline::PlatePipeline;
pub use state::PlateServiceState;
