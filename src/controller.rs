//! Root controller.
//!
//! Invoked by the kube runtime per CheCluster event: enforces the
//! single-CR invariant, validates the spec, resolves the infrastructure
//! flavor and proxy settings, then delegates to the reconcile manager and
//! translates its outcome into a runtime [`Action`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use crate::client::ClusterClient;
use crate::context::{InfraFlavor, ProxyConfig, ReconcileContext};
use crate::crd::CheCluster;
use crate::defaults::DefaultsConfig;
use crate::error::ApiErrorKind;
use crate::finalizers;
use crate::reconcile::{ManagerHooks, ReconcileManager};
use crate::reconcilers::registered;
use crate::status::{StatusReport, StatusWriter};
use crate::{Error, CLUSTER_RESOURCES_FINALIZER};

/// Interval between steady-state reconciles
const RESYNC_INTERVAL: Duration = Duration::from_secs(120);

/// Shared state handed to every reconcile invocation
pub struct Context {
    /// Client facade
    pub client: ClusterClient,
    /// Immutable startup defaults
    pub defaults: DefaultsConfig,
    /// The ordered pipeline
    pub manager: ReconcileManager,
}

impl Context {
    /// Build the context with the full registered pipeline
    pub fn new(client: ClusterClient, defaults: DefaultsConfig) -> Self {
        Self {
            client,
            defaults,
            manager: ReconcileManager::new(registered()),
        }
    }
}

/// Manager hooks bound to one CR instance
struct ClusterHooks {
    client: ClusterClient,
    namespace: String,
    name: String,
    cr: CheCluster,
    status: StatusWriter,
}

#[async_trait]
impl ManagerHooks for ClusterHooks {
    async fn append_top_finalizer(&self) -> Result<(), Error> {
        finalizers::append_finalizer(
            &self.client,
            &self.namespace,
            &self.name,
            CLUSTER_RESOURCES_FINALIZER,
        )
        .await
    }

    async fn clear_finalizers(&self) -> Result<(), Error> {
        finalizers::clear_finalizers(&self.client, &self.namespace, &self.name).await
    }

    async fn write_status(&self, report: &StatusReport) -> Result<(), Error> {
        self.status.write(&self.cr, report).await
    }
}

/// Registry URL as surfaced in the CR status
fn registry_url(ctx: &ReconcileContext, component: &str, external_url: Option<&str>) -> Option<String> {
    if let Some(url) = external_url {
        if !url.is_empty() {
            return Some(url.to_string());
        }
    }
    match ctx.cr.spec.server.server_exposure_strategy {
        crate::crd::ExposureStrategy::SingleHost => {
            ctx.che_url().map(|url| format!("{url}/{component}"))
        }
        crate::crd::ExposureStrategy::MultiHost => {
            let domain = ctx.cr.spec.k8s.ingress_domain.as_ref()?;
            Some(format!(
                "{}://{component}-{}.{domain}",
                ctx.scheme(),
                ctx.namespace
            ))
        }
    }
}

/// True when the server deployment reports an available replica
async fn server_available(ctx: &ReconcileContext) -> bool {
    use k8s_openapi::api::apps::v1::Deployment;

    match ctx
        .client
        .get_cached::<Deployment>(&ctx.namespace, ctx.flavor())
        .await
    {
        Ok(Some(deployment)) => deployment
            .status
            .and_then(|s| s.available_replicas)
            .map(|n| n > 0)
            .unwrap_or(false),
        _ => false,
    }
}

/// Reconcile one CheCluster event
#[instrument(skip(cr, ctx), fields(cr = %cr.name_any()))]
pub async fn reconcile(cr: Arc<CheCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let namespace = cr
        .namespace()
        .ok_or_else(|| Error::validation("CheCluster has no namespace"))?;
    let name = cr.name_any();
    let status = StatusWriter::new(ctx.client.clone(), &namespace);

    // exactly one CheCluster per watched scope; anything else is reported
    // and nothing is mutated
    let all: Vec<CheCluster> = ctx.client.list(&namespace, "").await?;
    if all.len() != 1 {
        let cause = format!("expected exactly one CheCluster in {namespace}, found {}", all.len());
        error!(count = all.len(), "refusing to reconcile");
        status
            .write(
                &cr,
                &StatusReport::Failed {
                    reconciler: "CheClusterController".to_string(),
                    cause: cause.clone(),
                },
            )
            .await?;
        return Err(Error::validation(cause));
    }

    if let Err(e) = cr.spec.validate() {
        status
            .write(
                &cr,
                &StatusReport::Failed {
                    reconciler: "CheClusterController".to_string(),
                    cause: e.to_string(),
                },
            )
            .await?;
        return Err(e);
    }

    let infra = InfraFlavor::detect(&ctx.client).await?;
    let cluster_proxy = if infra == InfraFlavor::OpenShiftV4 {
        ProxyConfig::from_cluster(&ctx.client).await?
    } else {
        ProxyConfig::default()
    };
    let proxy = ProxyConfig::merge(cluster_proxy, &cr);

    let rctx = ReconcileContext {
        client: ctx.client.clone(),
        cr: (*cr).clone(),
        namespace: namespace.clone(),
        defaults: ctx.defaults.clone(),
        infra,
        proxy,
    };
    let hooks = ClusterHooks {
        client: ctx.client.clone(),
        namespace: namespace.clone(),
        name,
        cr: (*cr).clone(),
        status: StatusWriter::new(ctx.client.clone(), &namespace),
    };

    let outcome = ctx.manager.tick(&rctx, &hooks).await?;

    if outcome.finalized {
        info!("finalization complete");
        return Ok(Action::await_change());
    }
    if let Some(delay) = outcome.requeue_after {
        return Ok(Action::requeue(delay));
    }

    // converged: surface the known URLs
    let components = &rctx.cr.spec.components;
    let devfile_url = registry_url(
        &rctx,
        crate::COMPONENT_DEVFILE_REGISTRY,
        components
            .devfile_registry
            .as_ref()
            .and_then(|r| r.external_url.as_deref()),
    );
    let plugin_url = registry_url(
        &rctx,
        crate::COMPONENT_PLUGIN_REGISTRY,
        components
            .plugin_registry
            .as_ref()
            .and_then(|r| r.external_url.as_deref()),
    );
    let keycloak_url = crate::reconcilers::identity_provider_url(&rctx);
    let available = server_available(&rctx).await;
    status
        .write_urls(
            &rctx.cr,
            rctx.che_url().as_deref(),
            keycloak_url.as_deref(),
            devfile_url.as_deref(),
            plugin_url.as_deref(),
            &ctx.defaults.che_version,
            available,
        )
        .await?;

    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Decide the retry behavior for a failed reconcile
pub fn error_policy(cr: Arc<CheCluster>, err: &Error, _ctx: Arc<Context>) -> Action {
    match err.api_kind() {
        // a validation failure only clears when the CR changes
        ApiErrorKind::Fatal => {
            error!(cr = %cr.name_any(), error = %err, "reconcile failed; waiting for CR change");
            Action::await_change()
        }
        ApiErrorKind::Conflict | ApiErrorKind::AlreadyExists => {
            Action::requeue(Duration::from_secs(1))
        }
        _ => {
            warn!(cr = %cr.name_any(), error = %err, "reconcile failed; backing off");
            Action::requeue(Duration::from_secs(5))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ExposureStrategy, RegistrySpec};
    use crate::testutil::test_context;

    #[test]
    fn registry_url_prefers_external() {
        let mut ctx = test_context();
        ctx.cr.spec.k8s.ingress_domain = Some("example.org".to_string());
        ctx.cr.spec.components.devfile_registry = Some(RegistrySpec {
            external: true,
            external_url: Some("https://external.example.org".to_string()),
            ..Default::default()
        });
        assert_eq!(
            registry_url(&ctx, "devfile-registry", Some("https://external.example.org")).as_deref(),
            Some("https://external.example.org")
        );
    }

    #[test]
    fn multi_host_registry_url_uses_component_host() {
        let mut ctx = test_context();
        ctx.cr.spec.k8s.ingress_domain = Some("example.org".to_string());
        assert_eq!(
            registry_url(&ctx, "plugin-registry", None).as_deref(),
            Some("http://plugin-registry-eclipse-che.example.org")
        );
    }

    #[test]
    fn single_host_registry_url_is_path_based() {
        let mut ctx = test_context();
        ctx.cr.spec.server.che_host = Some("che.example.org".to_string());
        ctx.cr.spec.server.server_exposure_strategy = ExposureStrategy::SingleHost;
        assert_eq!(
            registry_url(&ctx, "plugin-registry", None).as_deref(),
            Some("http://che.example.org/plugin-registry")
        );
    }
}
