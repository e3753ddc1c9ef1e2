// Library interface for ridelab modules
// The binary and the integration tests go through this crate root

pub mod adaptation;
pub mod analysis;
pub mod config;
pub mod durability;
pub mod efficiency;
pub mod error;
pub mod frontier;
pub mod logging;
pub mod models;
pub mod power;
pub mod repeatability;
pub mod rolling;
pub mod series;
pub mod snapshot;
pub mod zones;

// Re-export commonly used types for convenience
pub use models::*;
pub use analysis::{
    analyze_adaptation, analyze_durability, analyze_frontiers, AdaptationEdgesResponse,
    DurabilityAnalysisResponse, TrainingFrontiersResponse,
};
pub use config::AnalyticsConfig;
pub use error::{AnalyticsError, Result};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use series::SampleSeries;
pub use snapshot::{merge_snapshot, AnalyticsRecord, InMemoryRecordStore, RecordStore, Snapshot};
