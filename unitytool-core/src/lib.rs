//! Orchestration layer: sequences the domain components into the CLI verb
//! pipelines and enforces the fail-fast policy at every stage boundary.

mod apply;
mod orchestrator;

pub use apply::ApplyRequest;
pub use orchestrator::Orchestrator;
