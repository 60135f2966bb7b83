//! Event processing engine: classification, enrichment, policy evaluation,
//! behavioral sequence detection, risk scoring, graph building, and the
//! pub/sub broadcaster.

pub mod broadcast;
pub mod classifier;
pub mod graph;
pub mod processor;
pub mod risk;
pub mod seed;
pub mod sequence;

pub use broadcast::Broadcaster;
pub use processor::Engine;
pub use sequence::{SequenceRule, SequenceStep, SequenceTracker};
