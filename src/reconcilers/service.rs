//! Service reconciler.
//!
//! The `che-host` service fronting the server deployment: port 8080 always,
//! the metrics port only when the CR enables metrics. Services are in the
//! replace-set: drift is repaired by delete-and-recreate.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::context::ReconcileContext;
use crate::labels::{managed_labels, selector_labels};
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{Error, CHE_HOST_SERVICE, COMPONENT_CHE};

/// Port the server listens on
pub const SERVER_PORT: i32 = 8080;
/// Port the server exposes metrics on
pub const METRICS_PORT: i32 = 8087;

/// Reconciles the `che-host` service
pub struct ServiceReconciler;

/// Build the `che-host` service; the metrics port follows the CR toggle
pub fn build_che_service(ctx: &ReconcileContext) -> Service {
    let flavor = ctx.flavor();

    let mut ports = vec![ServicePort {
        name: Some("http".to_string()),
        port: SERVER_PORT,
        target_port: Some(IntOrString::Int(SERVER_PORT)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if ctx.cr.spec.metrics.enable {
        ports.push(ServicePort {
            name: Some("metrics".to_string()),
            port: METRICS_PORT,
            target_port: Some(IntOrString::Int(METRICS_PORT)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    Service {
        metadata: ObjectMeta {
            name: Some(CHE_HOST_SERVICE.to_string()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(flavor, COMPONENT_CHE)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl Reconciler for ServiceReconciler {
    fn id(&self) -> &'static str {
        "ServiceReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let service = build_che_service(ctx);
        if let Some(requeue) = converge(ctx, service, &DiffPolicy::new()).await? {
            return Ok(requeue);
        }
        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}
