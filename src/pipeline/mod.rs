// Enrichment pipeline: request governance, merge/validation, and durable state

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod state;
pub mod storage;

pub use orchestrator::{Orchestrator, RunSummary};
