pub mod graph;
pub mod nodeup;
pub mod plan;
pub mod prune;
pub mod update;
