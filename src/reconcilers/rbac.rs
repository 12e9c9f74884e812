//! Namespaced RBAC reconciler.
//!
//! Role and RoleBinding granting the server account the verbs it needs for
//! inter-component calls (exec into workspace pods, read workspace objects).
//! The diff ignores `resourceNames` and `nonResourceURLs`: other controllers
//! append entries there and the operator does not own them.

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::context::ReconcileContext;
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{Error, COMPONENT_CHE};

/// Reconciles the namespaced Role and RoleBinding
pub struct RbacReconciler;

/// Diff policy for RBAC kinds
pub fn rbac_diff_policy() -> DiffPolicy {
    DiffPolicy::new()
        .ignore("rules.*.resourceNames")
        .ignore("rules.*.nonResourceURLs")
}

/// Build the namespaced role for the server account
pub fn build_role(name: &str, namespace: &str, flavor: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        rules: Some(vec![
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec![
                    "pods/exec".to_string(),
                    "pods/log".to_string(),
                    "pods".to_string(),
                ]),
                verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string(), "create".to_string()],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec![
                    "configmaps".to_string(),
                    "secrets".to_string(),
                    "services".to_string(),
                ]),
                verbs: vec![
                    "get".to_string(),
                    "list".to_string(),
                    "watch".to_string(),
                    "create".to_string(),
                    "update".to_string(),
                    "delete".to_string(),
                ],
                ..Default::default()
            },
            PolicyRule {
                api_groups: Some(vec!["apps".to_string()]),
                resources: Some(vec!["deployments".to_string(), "replicasets".to_string()]),
                verbs: vec![
                    "get".to_string(),
                    "list".to_string(),
                    "watch".to_string(),
                    "create".to_string(),
                    "patch".to_string(),
                    "delete".to_string(),
                ],
                ..Default::default()
            },
        ]),
    }
}

/// Build the binding of a role to a service account
pub fn build_role_binding(
    name: &str,
    namespace: &str,
    flavor: &str,
    service_account: &str,
    role_name: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role_name.to_string(),
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
impl Reconciler for RbacReconciler {
    fn id(&self) -> &'static str {
        "RbacReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let flavor = ctx.flavor();
        let role_name = format!("{flavor}-workspace-exec");
        let policy = rbac_diff_policy();

        let role = build_role(&role_name, &ctx.namespace, flavor);
        if let Some(requeue) = converge(ctx, role, &policy).await? {
            return Ok(requeue);
        }

        let binding = build_role_binding(&role_name, &ctx.namespace, flavor, flavor, &role_name);
        if let Some(requeue) = converge(ctx, binding, &policy).await? {
            return Ok(requeue);
        }

        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}
