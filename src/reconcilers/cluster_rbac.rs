//! Cluster-scoped RBAC reconciler.
//!
//! ClusterRole and ClusterRoleBinding for gateway token reviews. No owner
//! reference is possible on cluster-scoped objects, so a finalizer named
//! after the CR (`<name>.crb.finalizers.che.eclipse.org`) protects cleanup;
//! legacy spellings are stripped on removal.

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::warn;

use crate::context::ReconcileContext;
use crate::finalizers::{append_finalizer, delete_finalizer};
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::rbac::rbac_diff_policy;
use crate::sync::sync_cluster_object;
use crate::{Error, COMPONENT_CHE};

/// Reconciles cluster-scoped RBAC for token reviews
pub struct ClusterRbacReconciler;

/// Name of the cluster role/binding pair for a CR instance.
///
/// Namespaced by construction: two installations in different namespaces
/// must not collide on cluster-scoped names.
pub fn cluster_rbac_name(namespace: &str, flavor: &str) -> String {
    format!("{namespace}-{flavor}-token-review")
}

/// Build the cluster role allowing token and access reviews
pub fn build_cluster_role(name: &str, flavor: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["authentication.k8s.io".to_string(), "authorization.k8s.io".to_string()]),
            resources: Some(vec![
                "tokenreviews".to_string(),
                "subjectaccessreviews".to_string(),
            ]),
            verbs: vec!["create".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Build the binding of the cluster role to the server service account
pub fn build_cluster_role_binding(
    name: &str,
    flavor: &str,
    service_account: &str,
    namespace: &str,
    cluster_role: &str,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

#[async_trait]
impl Reconciler for ClusterRbacReconciler {
    fn id(&self) -> &'static str {
        "ClusterRbacReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let flavor = ctx.flavor();
        let name = cluster_rbac_name(&ctx.namespace, flavor);
        let policy = rbac_diff_policy();

        let role = build_cluster_role(&name, flavor);
        if sync_cluster_object(&ctx.client, role, &policy).await?.needs_requeue() {
            return Ok(Outcome::requeue());
        }

        let binding = build_cluster_role_binding(&name, flavor, flavor, &ctx.namespace, &name);
        if sync_cluster_object(&ctx.client, binding, &policy).await?.needs_requeue() {
            return Ok(Outcome::requeue());
        }

        // cluster-scoped side effects exist: the finalizer must too
        append_finalizer(
            &ctx.client,
            &ctx.namespace,
            &ctx.cr.name_any(),
            &ctx.cluster_rbac_finalizer(),
        )
        .await?;

        Ok(Outcome::Done)
    }

    async fn finalize(&self, ctx: &ReconcileContext) -> bool {
        let name = cluster_rbac_name(&ctx.namespace, ctx.flavor());

        if let Err(e) = ctx.client.delete_cluster::<ClusterRoleBinding>(&name).await {
            warn!(error = %e, "failed to delete cluster role binding");
            return false;
        }
        if let Err(e) = ctx.client.delete_cluster::<ClusterRole>(&name).await {
            warn!(error = %e, "failed to delete cluster role");
            return false;
        }
        if let Err(e) = delete_finalizer(
            &ctx.client,
            &ctx.namespace,
            &ctx.cr.name_any(),
            &ctx.cluster_rbac_finalizer(),
        )
        .await
        {
            warn!(error = %e, "failed to remove cluster RBAC finalizer");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{differs, kind_policy};

    #[test]
    fn name_is_scoped_by_namespace_and_flavor() {
        assert_eq!(
            cluster_rbac_name("eclipse-che", "che"),
            "eclipse-che-che-token-review"
        );
    }

    #[test]
    fn cluster_role_allows_token_reviews_only() {
        let role = build_cluster_role("n", "che");
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].verbs, vec!["create"]);
        assert!(rules[0]
            .resources
            .as_ref()
            .unwrap()
            .contains(&"tokenreviews".to_string()));
    }

    #[test]
    fn cluster_scoped_kinds_never_get_owner_refs() {
        assert!(!kind_policy("ClusterRole").owner_ref_eligible);
        assert!(!kind_policy("ClusterRoleBinding").owner_ref_eligible);
        let role = build_cluster_role("n", "che");
        assert!(role.metadata.owner_references.is_none());
    }

    #[test]
    fn binding_drift_to_new_role_is_detected() {
        // role binding drift: bound role changes from clusterrole-1 to clusterrole-2
        let bound_to_one = build_cluster_role_binding("b", "che", "che", "ns", "clusterrole-1");
        let bound_to_two = build_cluster_role_binding("b", "che", "che", "ns", "clusterrole-2");
        let actual = serde_json::to_value(&bound_to_one).unwrap();
        let desired = serde_json::to_value(&bound_to_two).unwrap();
        assert!(differs(&actual, &desired, &rbac_diff_policy()));

        // and the converged state shows no drift
        let converged = serde_json::to_value(&bound_to_two).unwrap();
        assert!(!differs(&converged, &desired, &rbac_diff_policy()));
    }
}
