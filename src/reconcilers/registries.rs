//! Registry and dashboard workload reconciler.
//!
//! The devfile registry, plugin registry and dashboard are optional
//! components sharing one workload shape: a single-container deployment and
//! a ClusterIP service on port 8080. A component marked external is not
//! deployed; a component that stops being wanted is deleted best-effort.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::warn;

use crate::context::ReconcileContext;
use crate::crd::RegistrySpec;
use crate::labels::{managed_labels, selector_labels};
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{Error, COMPONENT_DASHBOARD, COMPONENT_DEVFILE_REGISTRY, COMPONENT_PLUGIN_REGISTRY};

/// Reconciles the optional registry and dashboard workloads
pub struct RegistriesReconciler;

/// One deployable component resolved from the CR
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentWorkload {
    /// Component tag and object name
    pub component: String,
    /// Container image
    pub image: String,
}

fn resolve(
    component: &str,
    spec: Option<&RegistrySpec>,
    default_image: &str,
) -> Option<ComponentWorkload> {
    let spec = spec?;
    if spec.external {
        return None;
    }
    Some(ComponentWorkload {
        component: component.to_string(),
        image: spec
            .image
            .clone()
            .filter(|i| !i.is_empty())
            .unwrap_or_else(|| default_image.to_string()),
    })
}

/// Components to deploy for the current CR.
///
/// Absent sections and external components deploy nothing.
pub fn wanted_workloads(ctx: &ReconcileContext) -> Vec<ComponentWorkload> {
    let components = &ctx.cr.spec.components;
    [
        resolve(
            COMPONENT_DEVFILE_REGISTRY,
            components.devfile_registry.as_ref(),
            &ctx.defaults.devfile_registry_image,
        ),
        resolve(
            COMPONENT_PLUGIN_REGISTRY,
            components.plugin_registry.as_ref(),
            &ctx.defaults.plugin_registry_image,
        ),
        resolve(
            COMPONENT_DASHBOARD,
            components.dashboard.as_ref(),
            &ctx.defaults.dashboard_image,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Build one component deployment
pub fn build_component_deployment(
    ctx: &ReconcileContext,
    workload: &ComponentWorkload,
) -> Deployment {
    let flavor = ctx.flavor();
    let labels = managed_labels(flavor, &workload.component);

    let container = Container {
        name: workload.component.clone(),
        image: Some(workload.image.clone()),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: 8080,
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/".to_string()),
                port: IntOrString::Int(8080),
                ..Default::default()
            }),
            initial_delay_seconds: Some(10),
            timeout_seconds: Some(5),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            requests: Some(
                [
                    ("memory".to_string(), Quantity("32Mi".to_string())),
                    ("cpu".to_string(), Quantity("50m".to_string())),
                ]
                .into(),
            ),
            limits: Some([("memory".to_string(), Quantity("256Mi".to_string()))].into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(workload.component.clone()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(flavor, &workload.component)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build one component service
pub fn build_component_service(ctx: &ReconcileContext, workload: &ComponentWorkload) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(workload.component.clone()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), &workload.component)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(ctx.flavor(), &workload.component)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 8080,
                target_port: Some(IntOrString::Int(8080)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl Reconciler for RegistriesReconciler {
    fn id(&self) -> &'static str {
        "RegistriesReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let policy = DiffPolicy::new();
        let wanted = wanted_workloads(ctx);

        for workload in &wanted {
            let deployment = build_component_deployment(ctx, workload);
            if let Some(requeue) = converge(ctx, deployment, &policy).await? {
                return Ok(requeue);
            }
            let service = build_component_service(ctx, workload);
            if let Some(requeue) = converge(ctx, service, &policy).await? {
                return Ok(requeue);
            }
        }

        // components that dropped out (went external, removed from spec)
        for component in [
            COMPONENT_DEVFILE_REGISTRY,
            COMPONENT_PLUGIN_REGISTRY,
            COMPONENT_DASHBOARD,
        ] {
            if wanted.iter().any(|w| w.component == component) {
                continue;
            }
            if let Err(e) = ctx.client.delete::<Deployment>(&ctx.namespace, component).await {
                warn!(component = %component, error = %e, "failed to delete stale deployment");
            }
            if let Err(e) = ctx.client.delete::<Service>(&ctx.namespace, component).await {
                warn!(component = %component, error = %e, "failed to delete stale service");
            }
        }

        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}
