//! Service account reconciler.
//!
//! One named account per in-cluster component. Idempotent, no finalizer;
//! cleanup rides on the owner reference.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::context::ReconcileContext;
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{Error, COMPONENT_CHE};

/// Reconciles the server's service account
pub struct ServiceAccountReconciler;

/// Build a service account for a component
pub fn build_service_account(
    name: &str,
    namespace: &str,
    flavor: &str,
    component: &str,
) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(flavor, component)),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[async_trait]
impl Reconciler for ServiceAccountReconciler {
    fn id(&self) -> &'static str {
        "ServiceAccountReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let sa = build_service_account(ctx.flavor(), &ctx.namespace, ctx.flavor(), COMPONENT_CHE);
        if let Some(requeue) = converge(ctx, sa, &DiffPolicy::new()).await? {
            return Ok(requeue);
        }
        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        // namespaced, owner-referenced: the garbage collector handles it
        true
    }
}
