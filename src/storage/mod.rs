//! Storage layer for envelope-exchange
//!
//! JSON file storage with atomic writes for the operation registry, the
//! artifact index and the bundled record store. Every store can also run
//! purely in memory for tests and embedding.

pub mod artifacts;
pub mod file_io;
pub mod operations;
pub mod records;

pub use artifacts::{ArtifactDownload, ArtifactStore, PendingArtifact};
pub use file_io::{read_json, write_bytes_atomic, write_json_atomic};
pub use operations::{ListQuery, OperationPage, OperationRegistry, MAX_PAGE_SIZE};
pub use records::{CommitCandidate, CommitOutcome, RecordAccess, RecordStore};
