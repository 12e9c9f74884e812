//! Workspace RBAC reconciler.
//!
//! Cluster role granting the server's service account the verbs needed to
//! provision per-user workspace namespaces and their objects. Cleanup rides
//! on the cluster RBAC finalizer: both reconcilers share the CR-named
//! finalizer and `finalize` tolerates the other having already removed it.

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::warn;

use crate::context::ReconcileContext;
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::rbac::rbac_diff_policy;
use crate::sync::sync_cluster_object;
use crate::{Error, COMPONENT_CHE};

/// Reconciles the workspace-provisioning cluster role
pub struct WorkspaceRbacReconciler;

/// Cluster role/binding name for workspace provisioning
pub fn workspace_rbac_name(namespace: &str, flavor: &str) -> String {
    format!("{namespace}-{flavor}-workspace-admin")
}

/// Build the cluster role for per-user workspace provisioning
pub fn build_workspace_cluster_role(name: &str, flavor: &str) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["namespaces".to_string()]),
                verbs: vec!["get".to_string(), "create".to_string(), "update".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec![
                    "pods".to_string(),
                    "services".to_string(),
                    "configmaps".to_string(),
                    "secrets".to_string(),
                    "persistentvolumeclaims".to_string(),
                    "serviceaccounts".to_string(),
                ]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["apps".to_string()]),
                resources: Some(vec!["deployments".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["networking.k8s.io".to_string()]),
                resources: Some(vec!["ingresses".to_string()]),
                verbs: vec!["*".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["rbac.authorization.k8s.io".to_string()]),
                resources: Some(vec!["roles".to_string(), "rolebindings".to_string()]),
                verbs: vec!["get".to_string(), "create".to_string(), "update".to_string()],
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

#[async_trait]
impl Reconciler for WorkspaceRbacReconciler {
    fn id(&self) -> &'static str {
        "WorkspaceRbacReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let flavor = ctx.flavor();
        let name = workspace_rbac_name(&ctx.namespace, flavor);
        let policy = rbac_diff_policy();

        let role = build_workspace_cluster_role(&name, flavor);
        if sync_cluster_object(&ctx.client, role, &policy).await?.needs_requeue() {
            return Ok(Outcome::requeue());
        }

        let binding = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(managed_labels(flavor, COMPONENT_CHE)),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: name.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: flavor.to_string(),
                namespace: Some(ctx.namespace.clone()),
                ..Default::default()
            }]),
        };
        if sync_cluster_object(&ctx.client, binding, &policy).await?.needs_requeue() {
            return Ok(Outcome::requeue());
        }

        Ok(Outcome::Done)
    }

    async fn finalize(&self, ctx: &ReconcileContext) -> bool {
        let name = workspace_rbac_name(&ctx.namespace, ctx.flavor());
        if let Err(e) = ctx.client.delete_cluster::<ClusterRoleBinding>(&name).await {
            warn!(error = %e, "failed to delete workspace cluster role binding");
            return false;
        }
        if let Err(e) = ctx.client.delete_cluster::<ClusterRole>(&name).await {
            warn!(error = %e, "failed to delete workspace cluster role");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_role_covers_namespaces_and_workloads() {
        let role = build_workspace_cluster_role("n", "che");
        let rules = role.rules.unwrap();

        let namespaces = rules
            .iter()
            .find(|r| r.resources.as_ref().unwrap().contains(&"namespaces".to_string()))
            .unwrap();
        assert!(namespaces.verbs.contains(&"create".to_string()));
        // no blanket wildcard on namespaces
        assert!(!namespaces.verbs.contains(&"*".to_string()));

        assert!(rules.iter().any(|r| r
            .api_groups
            .as_ref()
            .unwrap()
            .contains(&"networking.k8s.io".to_string())));
    }
}
