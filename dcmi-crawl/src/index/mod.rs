//! Whole-dataset stages: aggregation, reference resolution and persistence

pub mod aggregator;
pub mod resolver;
pub mod store;

pub use aggregator::{Aggregation, SeriesAggregator};
pub use resolver::{resolve, FrameIndex, Resolution, ResolutionSummary, ResolvedVia};
pub use store::{CacheStatus, IndexStore, StoreError, INSTANCE_INDEX_FILE, SERIES_INDEX_FILE};
