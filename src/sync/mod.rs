//! Replays the pending-operation queue against the backend.
//!
//! One drain pass walks the queue in insertion order, sequentially, so a
//! Create always reaches the server before the Update that follows it.
//! Failures are retried on later drains up to a fixed ceiling; the engine
//! never blocks the caller on a tight retry loop.

pub mod op;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::api::{ApiCall, Transport};
use crate::error::StoreError;
use crate::net::Connectivity;
use crate::store::LocalStore;
use op::{OperationKind, PendingOperation, ReplayOutcome};

/// What one drain pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainReport {
  /// Operations for which a network call was dispatched
  pub attempted: usize,
  /// Acknowledged by the server and removed from the queue
  pub applied: usize,
  /// Failed transiently; left queued with an incremented retry counter
  pub retried: usize,
  /// Unrecognized kinds left queued untouched
  pub skipped: usize,
  /// Removed without success — retry ceiling hit or permanent rejection
  pub dropped: Vec<i64>,
}

pub struct SyncEngine<T: Transport> {
  store: Arc<LocalStore>,
  transport: T,
  connectivity: Connectivity,
  max_retries: u32,
  draining: AtomicBool,
  refresh_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<T: Transport> SyncEngine<T> {
  pub fn new(store: Arc<LocalStore>, transport: T, connectivity: Connectivity) -> Self {
    Self {
      store,
      transport,
      connectivity,
      max_retries: 3,
      draining: AtomicBool::new(false),
      refresh_hook: None,
    }
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  /// Register the UI-layer callback invoked after a drain that attempted at
  /// least one operation, so visible lists get reloaded.
  pub fn with_refresh_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
    self.refresh_hook = Some(Box::new(hook));
    self
  }

  /// Replay every queued operation. Returns immediately when offline or
  /// when another drain is already in flight.
  pub async fn drain_queue(&self) -> Result<DrainReport, StoreError> {
    if !self.connectivity.is_online() {
      debug!("offline, deferring drain");
      return Ok(DrainReport::default());
    }

    // Overlapping drains could both read an operation before either commits
    // its deletion, double-sending it.
    if self
      .draining
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("drain already in flight");
      return Ok(DrainReport::default());
    }

    let result = self.drain_inner().await;
    self.draining.store(false, Ordering::Release);
    result
  }

  async fn drain_inner(&self) -> Result<DrainReport, StoreError> {
    let ops = self.store.pending_operations()?;
    if ops.is_empty() {
      return Ok(DrainReport::default());
    }

    info!(count = ops.len(), "draining pending operations");
    let mut report = DrainReport::default();

    for op in ops {
      let Some(kind) = OperationKind::parse(&op.kind) else {
        // A newer build may have queued kinds this one doesn't know.
        // Leave them for a build that does.
        warn!(id = op.id, kind = %op.kind, "unknown operation kind, leaving queued");
        report.skipped += 1;
        continue;
      };

      report.attempted += 1;
      let result = match ApiCall::for_operation(kind, &op.data) {
        Ok(call) => self.transport.execute(&call).await,
        Err(e) => Err(e),
      };

      match ReplayOutcome::after_attempt(op.retries, self.max_retries, &result) {
        ReplayOutcome::Applied => {
          self.store.delete_operation(op.id)?;
          report.applied += 1;
          info!(id = op.id, kind = kind.as_str(), "operation replayed");
        }
        ReplayOutcome::Retrying(retries) => {
          let updated = PendingOperation { retries, ..op };
          self.store.update_operation(&updated)?;
          report.retried += 1;
        }
        ReplayOutcome::Dropped(reason) => {
          self.store.delete_operation(op.id)?;
          error!(
            id = op.id,
            kind = kind.as_str(),
            ?reason,
            error = %result.unwrap_err(),
            "dropping operation from queue"
          );
          report.dropped.push(op.id);
        }
      }
    }

    if report.attempted > 0 {
      if let Some(hook) = &self.refresh_hook {
        hook();
      }
    }

    Ok(report)
  }
}
