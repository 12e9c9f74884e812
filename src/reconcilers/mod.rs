//! Sub-reconciler catalog.
//!
//! Registration order is execution order and encodes the dependency flow:
//! identities before RBAC, RBAC before workloads that use it, TLS before the
//! gateway, the gateway before the exposures that point at it, cluster-scoped
//! extras (OAuth client, console link) last.

mod cluster_rbac;
mod console_link;
mod deployment;
mod exposure;
mod oauth_client;
mod pvc;
mod rbac;
mod registries;
mod secret;
mod server_configmap;
mod service;
mod service_account;
mod tls;
mod workspace_rbac;

pub use cluster_rbac::ClusterRbacReconciler;
pub use console_link::ConsoleLinkReconciler;
pub use deployment::{DeploymentReconciler, MountError};
pub use exposure::ExposureReconciler;
pub use oauth_client::OAuthClientReconciler;
pub use pvc::PvcReconciler;
pub use rbac::RbacReconciler;
pub use registries::{wanted_workloads, ComponentWorkload, RegistriesReconciler};
pub use secret::SecretReconciler;
pub use server_configmap::{identity_provider_url, ServerConfigMapReconciler};
pub use service::ServiceReconciler;
pub use service_account::ServiceAccountReconciler;
pub use tls::TlsSecretReconciler;
pub use workspace_rbac::WorkspaceRbacReconciler;

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::ReconcileContext;
use crate::gateway::GatewayReconciler;
use crate::reconcile::{Outcome, Reconciler};
use crate::sync::{sync_object, DiffPolicy};
use crate::Error;

/// Converge one owner-referenced namespaced object for the current CR.
///
/// Returns a requeue outcome when the write lost a race; the caller
/// propagates it and the next tick retries from a fresh read.
pub(crate) async fn converge<K>(
    ctx: &ReconcileContext,
    object: K,
    policy: &DiffPolicy,
) -> Result<Option<Outcome>, Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let outcome = sync_object(
        &ctx.client,
        &ctx.namespace,
        object,
        Some(&ctx.owner_reference()),
        policy,
    )
    .await?;
    Ok(outcome.needs_requeue().then(Outcome::requeue))
}

/// The full pipeline in registration order
pub fn registered() -> Vec<Box<dyn Reconciler>> {
    vec![
        Box::new(ServiceAccountReconciler),
        Box::new(RbacReconciler),
        Box::new(ClusterRbacReconciler),
        Box::new(WorkspaceRbacReconciler),
        Box::new(TlsSecretReconciler),
        Box::new(ServerConfigMapReconciler),
        Box::new(PvcReconciler),
        Box::new(SecretReconciler),
        Box::new(DeploymentReconciler),
        Box::new(ServiceReconciler),
        Box::new(RegistriesReconciler),
        Box::new(GatewayReconciler),
        Box::new(ExposureReconciler),
        Box::new(OAuthClientReconciler),
        Box::new(ConsoleLinkReconciler),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_order_puts_dependencies_first() {
        let ids: Vec<&str> = registered().iter().map(|r| r.id()).collect();

        let pos = |id: &str| ids.iter().position(|x| *x == id).unwrap();

        // service accounts before the deployments that reference them
        assert!(pos("ServiceAccountReconciler") < pos("DeploymentReconciler"));
        // TLS before the gateway
        assert!(pos("TlsSecretReconciler") < pos("GatewayReconciler"));
        // gateway before the exposures that point at it
        assert!(pos("GatewayReconciler") < pos("ExposureReconciler"));
        // cluster-scoped extras last
        assert!(pos("ExposureReconciler") < pos("OAuthClientReconciler"));
        assert!(pos("OAuthClientReconciler") < pos("ConsoleLinkReconciler"));
    }
}
