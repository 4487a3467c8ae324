//! Inbox ingestion: scan orchestration and the processed-message audit trail.

mod coordinator;
mod model;
mod repository;

pub use coordinator::{IngestionCoordinator, ScanState, ScanSummary};
pub use model::{NewProcessedMessage, ParseOutcome, ProcessedMessageRecord, SNIPPET_MAX_CHARS};
pub use repository::ProcessedMessageRepository;
