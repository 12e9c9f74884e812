//! Reconciler contract and the ordered reconcile manager.
//!
//! Sub-reconcilers are registered in dependency order (service accounts
//! before the deployments that reference them, TLS before the gateway, the
//! gateway before the exposures pointing at it) and run in that order on
//! every tick. The first step always appends the top-level finalizer so
//! cluster-scoped side effects stay deletable. On CR deletion the manager
//! runs every reconciler's `finalize` independently and clears the residual
//! finalizer list only when all of them report done.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::ReconcileContext;
use crate::status::{StatusReport, REASON_INSTALL_OR_UPDATE_FAILED};
use crate::{Error, DEFAULT_REQUEUE_SECONDS};

/// Result of one sub-reconciler invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; the pipeline continues
    Done,
    /// Not converged yet; stop the pipeline and run again after the delay
    Requeue {
        /// How long to wait before the next tick
        after: Duration,
    },
}

impl Outcome {
    /// The default requeue for stateful waits
    pub fn requeue() -> Self {
        Outcome::Requeue {
            after: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
        }
    }
}

/// A unit of reconciliation owning one concern.
///
/// `reconcile` must be idempotent; `finalize` must be idempotent and
/// tolerate missing objects (`NotFound` is success).
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Stable identifier surfaced in the CR status on failure
    fn id(&self) -> &'static str;

    /// Drive the cluster toward the CR for this concern
    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error>;

    /// Remove cluster-scoped side effects on CR deletion.
    ///
    /// Returns true when cleanup is complete (or there was nothing to do).
    async fn finalize(&self, ctx: &ReconcileContext) -> bool;
}

/// Side effects the manager needs beyond the reconcilers themselves.
///
/// Separated from the pipeline so ordering and short-circuit logic are
/// testable without a cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagerHooks: Send + Sync {
    /// Append the top-level finalizer to the CR
    async fn append_top_finalizer(&self) -> Result<(), Error>;

    /// Clear every remaining finalizer on the CR in one write
    async fn clear_finalizers(&self) -> Result<(), Error>;

    /// Write a status report to the CR
    async fn write_status(&self, report: &StatusReport) -> Result<(), Error>;
}

/// What a tick decided
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickOutcome {
    /// Delay before the next tick; `None` means wait for a CR change
    pub requeue_after: Option<Duration>,
    /// The CR was being deleted and every finalizer completed
    pub finalized: bool,
}

/// Ordered pipeline over sub-reconcilers
pub struct ReconcileManager {
    reconcilers: Vec<Box<dyn Reconciler>>,
}

impl ReconcileManager {
    /// Build a manager over reconcilers in registration order
    pub fn new(reconcilers: Vec<Box<dyn Reconciler>>) -> Self {
        Self { reconcilers }
    }

    /// Execute one tick.
    ///
    /// On deletion, runs finalization; otherwise runs the pipeline in order,
    /// stopping at the first non-done reconciler. A failing reconciler is
    /// recorded in status as `<id>: <cause>`; the record clears when that
    /// same reconciler later succeeds.
    pub async fn tick(
        &self,
        ctx: &ReconcileContext,
        hooks: &dyn ManagerHooks,
    ) -> Result<TickOutcome, Error> {
        if ctx.cr.metadata.deletion_timestamp.is_some() {
            return self.finalize_all(ctx, hooks).await;
        }

        hooks.append_top_finalizer().await?;

        let previously_failing = failing_reconciler(ctx);

        for reconciler in &self.reconcilers {
            match reconciler.reconcile(ctx).await {
                Ok(Outcome::Done) => {
                    if previously_failing.as_deref() == Some(reconciler.id()) {
                        hooks.write_status(&StatusReport::Ok).await?;
                    }
                }
                Ok(Outcome::Requeue { after }) => {
                    info!(reconciler = reconciler.id(), delay = ?after, "requeue requested");
                    return Ok(TickOutcome {
                        requeue_after: Some(after),
                        finalized: false,
                    });
                }
                Err(e) => {
                    warn!(reconciler = reconciler.id(), error = %e, "reconcile failed");
                    hooks
                        .write_status(&StatusReport::Failed {
                            reconciler: reconciler.id().to_string(),
                            cause: e.to_string(),
                        })
                        .await?;
                    return Err(e);
                }
            }
        }

        Ok(TickOutcome {
            requeue_after: None,
            finalized: false,
        })
    }

    /// Run every reconciler's `finalize` in registration order.
    ///
    /// Failure of one does not block the others; the residual finalizer
    /// list clears only when every one reports done.
    async fn finalize_all(
        &self,
        ctx: &ReconcileContext,
        hooks: &dyn ManagerHooks,
    ) -> Result<TickOutcome, Error> {
        let mut all_done = true;
        for reconciler in &self.reconcilers {
            let done = reconciler.finalize(ctx).await;
            if !done {
                warn!(reconciler = reconciler.id(), "finalization incomplete");
                all_done = false;
            }
        }

        if all_done {
            hooks.clear_finalizers().await?;
            info!("finalization complete, finalizers cleared");
            return Ok(TickOutcome {
                requeue_after: None,
                finalized: true,
            });
        }

        Ok(TickOutcome {
            requeue_after: Some(Duration::from_secs(DEFAULT_REQUEUE_SECONDS)),
            finalized: false,
        })
    }
}

/// Identifier of the reconciler recorded as failing in the CR status.
///
/// The status message format is `<id>: <cause>`; the id is everything
/// before the first colon.
pub fn failing_reconciler(ctx: &ReconcileContext) -> Option<String> {
    let status = ctx.cr.status.as_ref()?;
    if status.reason.as_deref() != Some(REASON_INSTALL_OR_UPDATE_FAILED) {
        return None;
    }
    status
        .message
        .as_ref()
        .and_then(|m| m.split(':').next())
        .map(|id| id.trim().to_string())
}
