//! Series forest: construction, modality queries and rendering

pub mod builder;
pub mod query;
pub mod render;

pub use builder::{Forest, NodeId, Orphan, OrphanReason, SeriesNode};
pub use query::{Branch, MatchSummary, QueryEngine, QueryMatch, SeriesSummary};
pub use render::{render_matches, render_tree};
