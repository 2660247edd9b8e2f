//! Cancellation coordinator
//!
//! Cancellation is cooperative: a request only sets the operation's
//! `cancel_requested` flag. Workers poll [`CancellationCoordinator::should_stop`]
//! at batch boundaries and wind down on their own.

use std::sync::Arc;

use tracing::instrument;

use crate::error::{ExchangeError, ExchangeResult};
use crate::models::{Operation, OperationId, UserId};
use crate::storage::OperationRegistry;

/// Routes cancel requests into running jobs
pub struct CancellationCoordinator {
    registry: Arc<OperationRegistry>,
}

impl CancellationCoordinator {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self { registry }
    }

    /// Ask the worker of `id` to stop.
    ///
    /// Fails with `NotFound` for unknown ids, `Forbidden` when `requester`
    /// is not the owner and `AlreadyTerminal` once the operation finished.
    #[instrument(skip(self), fields(operation_id = %id, requester = %requester))]
    pub fn request_cancel(&self, id: OperationId, requester: &UserId) -> ExchangeResult<Operation> {
        let op = self.registry.get(id)?;
        if !op.is_owned_by(requester) {
            return Err(ExchangeError::operation_forbidden(id.to_string()));
        }
        self.registry.request_cancel(id)
    }

    /// Checked by workers between batches
    pub fn should_stop(&self, id: OperationId) -> ExchangeResult<bool> {
        self.registry.is_cancel_requested(id)
    }
}
