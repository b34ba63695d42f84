//! Cluster runs: loading a cluster session, planning, converging and
//! emitting, plus how plans and results are shown.

pub mod differ;
pub mod executor;
pub mod planner;
pub mod session;

pub use session::Session;
