//! PVC reconciler.
//!
//! Claims for postgres data and shared workspace data. Growing a live claim
//! mutates `resources.requests.storage` in place; shrinking and storage
//! class changes are rejected as validation errors (the cluster cannot do
//! either), and equal sizes perform no write.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::json;
use tracing::info;

use crate::context::ReconcileContext;
use crate::crd::PvcStrategy;
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::sync::{parse_quantity, set_controller_owner};
use crate::{Error, COMPONENT_CHE, COMPONENT_POSTGRES};

/// Name of the postgres data claim
pub const POSTGRES_DATA_CLAIM: &str = "postgres-data";
/// Name of the shared workspace data claim (`common` strategy)
pub const WORKSPACE_DATA_CLAIM: &str = "che-workspace-data";

/// Default claim size when the CR does not specify one
pub const DEFAULT_CLAIM_SIZE: &str = "1Gi";

/// Reconciles the operator-owned claims
pub struct PvcReconciler;

/// What to do with a live claim given the desired size
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResizeAction {
    /// Sizes match; no write
    Noop,
    /// Patch `resources.requests.storage` to the new size
    Grow(String),
}

/// Decide the resize action for a live claim.
///
/// Shrinking is a validation error; so is changing the storage class of a
/// bound claim.
pub fn resize_action(
    actual: &PersistentVolumeClaim,
    desired_size: &str,
    desired_class: Option<&str>,
) -> Result<ResizeAction, Error> {
    let actual_class = actual
        .spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref());
    if let Some(desired_class) = desired_class {
        if actual_class.is_some_and(|c| c != desired_class) {
            return Err(Error::validation(format!(
                "storage class of claim {} cannot change ({} -> {})",
                actual.metadata.name.as_deref().unwrap_or(""),
                actual_class.unwrap_or(""),
                desired_class
            )));
        }
    }

    let actual_size = actual
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.as_str())
        .unwrap_or(DEFAULT_CLAIM_SIZE);

    let (actual_q, desired_q) = match (parse_quantity(actual_size), parse_quantity(desired_size)) {
        (Some(a), Some(d)) => (a, d),
        _ => {
            return Err(Error::validation(format!(
                "unparseable claim size: {actual_size} or {desired_size}"
            )))
        }
    };

    if desired_q < actual_q {
        return Err(Error::validation(format!(
            "claim {} cannot shrink from {actual_size} to {desired_size}",
            actual.metadata.name.as_deref().unwrap_or("")
        )));
    }
    if desired_q == actual_q {
        return Ok(ResizeAction::Noop);
    }
    Ok(ResizeAction::Grow(desired_size.to_string()))
}

/// Build a claim with the requested size, class and access mode
pub fn build_claim(
    name: &str,
    namespace: &str,
    flavor: &str,
    component: &str,
    size: &str,
    storage_class: Option<&str>,
) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(size.to_string()));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(flavor, component)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage_class.map(String::from),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn converge_claim(
    ctx: &ReconcileContext,
    name: &str,
    component: &str,
    size: &str,
    storage_class: Option<&str>,
) -> Result<(), Error> {
    let actual: Option<PersistentVolumeClaim> = ctx.client.get_cached(&ctx.namespace, name).await?;

    match actual {
        None => {
            let mut claim =
                build_claim(name, &ctx.namespace, ctx.flavor(), component, size, storage_class);
            set_controller_owner(&mut claim.metadata, &ctx.owner_reference());
            ctx.client.create(&ctx.namespace, &claim).await?;
            info!(claim = %name, size = %size, "claim created");
        }
        Some(actual) => match resize_action(&actual, size, storage_class)? {
            ResizeAction::Noop => {}
            ResizeAction::Grow(new_size) => {
                let patch = json!({"spec": {"resources": {"requests": {"storage": new_size}}}});
                ctx.client
                    .patch::<PersistentVolumeClaim, _>(&ctx.namespace, name, &patch)
                    .await?;
                info!(claim = %name, size = %size, "claim grown");
            }
        },
    }
    Ok(())
}

#[async_trait]
impl Reconciler for PvcReconciler {
    fn id(&self) -> &'static str {
        "PvcReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let storage = &ctx.cr.spec.storage;
        let size = storage.pvc_claim_size.as_deref().unwrap_or(DEFAULT_CLAIM_SIZE);
        let class = storage.workspace_pvc_storage_class_name.as_deref();

        if !ctx.cr.spec.database.external_db {
            converge_claim(ctx, POSTGRES_DATA_CLAIM, COMPONENT_POSTGRES, size, None).await?;
        }

        if storage.pvc_strategy == PvcStrategy::Common {
            converge_claim(ctx, WORKSPACE_DATA_CLAIM, COMPONENT_CHE, size, class).await?;
        }

        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_claim(size: &str, class: Option<&str>) -> PersistentVolumeClaim {
        build_claim("postgres-data", "eclipse-che", "che", COMPONENT_POSTGRES, size, class)
    }

    #[test]
    fn growing_a_claim_patches_the_request() {
        // 1Gi live, 2Gi requested: one patch
        let action = resize_action(&live_claim("1Gi", None), "2Gi", None).unwrap();
        assert_eq!(action, ResizeAction::Grow("2Gi".to_string()));
    }

    #[test]
    fn same_size_performs_no_write() {
        // a second reconcile with the same input is a noop
        let action = resize_action(&live_claim("2Gi", None), "2Gi", None).unwrap();
        assert_eq!(action, ResizeAction::Noop);
        // semantically equal spellings count as the same size
        let action = resize_action(&live_claim("2048Mi", None), "2Gi", None).unwrap();
        assert_eq!(action, ResizeAction::Noop);
    }

    #[test]
    fn shrinking_is_rejected() {
        let err = resize_action(&live_claim("2Gi", None), "1Gi", None).unwrap_err();
        assert!(err.to_string().contains("cannot shrink"));
    }

    #[test]
    fn storage_class_change_is_rejected() {
        let err = resize_action(&live_claim("1Gi", Some("standard")), "1Gi", Some("fast")).unwrap_err();
        assert!(err.to_string().contains("storage class"));
        // same class is fine
        assert!(resize_action(&live_claim("1Gi", Some("standard")), "1Gi", Some("standard")).is_ok());
    }

    #[test]
    fn claim_requests_read_write_once() {
        let claim = live_claim("1Gi", Some("standard"));
        let spec = claim.spec.unwrap();
        assert_eq!(spec.access_modes.unwrap(), vec!["ReadWriteOnce"]);
        assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
    }
}
