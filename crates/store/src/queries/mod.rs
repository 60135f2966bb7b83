pub mod alerts;
pub mod events;
pub mod graph;
pub mod policies;
pub mod sessions;
pub mod stats;
