//! Analysis pipeline: state, nodes and the orchestration graph.

pub mod graph;
pub mod nodes;
pub mod state;

pub use graph::{AnalysisPipeline, Collaborators};
pub use state::AnalysisState;
