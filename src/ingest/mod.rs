//! Bulk catalog-dump ingestion pipeline: streaming decode → entity fan-out →
//! per-kind buffer workers → association workers, coordinated by
//! [`orchestrator::IngestionOrchestrator`].

pub mod association_worker;
pub mod buffer_worker;
pub mod decoder;
pub mod orchestrator;
pub mod processor;
pub mod raw;

pub use orchestrator::IngestionOrchestrator;
