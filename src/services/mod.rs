//! Service layer for envelope-exchange
//!
//! The job engine on top of the storage layer: request validation and
//! dispatch, cooperative cancellation, retention and the user-facing facade.

pub mod cancellation;
pub mod dispatcher;
pub mod exchange;
pub mod options;
pub mod retention;

pub use cancellation::CancellationCoordinator;
pub use dispatcher::{validate_shape, ExportRequest, ImportRequest, JobDispatcher, JobRequest};
pub use exchange::ExchangeService;
pub use options::{exchange_options, ExchangeOptions, FormatOption};
pub use retention::{RetentionSweeper, SweepReport};
