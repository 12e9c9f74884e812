//! Exposure reconciler: one Ingress or Route per externally reachable
//! service.
//!
//! On OpenShift the exposure is a `Route`, elsewhere an `Ingress`. Host
//! assignment follows the exposure strategy: `multi-host` gives every
//! component `<component>-<namespace>.<domain>`, `single-host` reuses the
//! primary hostname and routes by path through the gateway. Generated
//! objects stamp the managed-annotations digest so user-added annotations
//! never count as drift.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::json;
use tracing::warn;

use crate::client::route_resource;
use crate::context::ReconcileContext;
use crate::crd::ExposureStrategy;
use crate::labels::{managed_labels, stamp_digest};
use crate::reconcile::{Outcome, Reconciler};
use crate::sync::{sync_dynamic, sync_object, DiffPolicy};
use crate::{
    Error, CHE_HOST_SERVICE, COMPONENT_CHE, COMPONENT_DEVFILE_REGISTRY, COMPONENT_PLUGIN_REGISTRY,
};

/// Reconciles ingresses/routes for exposed services
pub struct ExposureReconciler;

/// One externally exposed endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exposure {
    /// Object name
    pub name: String,
    /// Component tag
    pub component: String,
    /// Public host
    pub host: String,
    /// Path prefix (`/` unless single-host routes by path)
    pub path: String,
    /// Backing service name
    pub service: String,
    /// Backing service port
    pub port: i32,
}

/// Compute the exposure set for the current CR.
///
/// `multi-host` exposes the server and each internal registry on its own
/// host. `single-host` exposes exactly one host pointing at the gateway
/// (or the server service when the gateway is off); the per-component
/// routing moves into the gateway configuration.
pub fn exposures(ctx: &ReconcileContext) -> Vec<Exposure> {
    let Some(che_host) = ctx.che_host() else {
        return Vec::new();
    };
    let flavor = ctx.flavor();

    match ctx.cr.spec.server.server_exposure_strategy {
        ExposureStrategy::SingleHost => {
            let service = if ctx.cr.spec.gateway_enabled(ctx.is_openshift()) {
                ctx.gateway_name()
            } else {
                CHE_HOST_SERVICE.to_string()
            };
            vec![Exposure {
                name: flavor.to_string(),
                component: COMPONENT_CHE.to_string(),
                host: che_host,
                path: "/".to_string(),
                service,
                port: 8080,
            }]
        }
        ExposureStrategy::MultiHost => {
            let mut list = vec![Exposure {
                name: flavor.to_string(),
                component: COMPONENT_CHE.to_string(),
                host: che_host,
                path: "/".to_string(),
                service: CHE_HOST_SERVICE.to_string(),
                port: 8080,
            }];
            let domain = ctx.cr.spec.k8s.ingress_domain.clone().unwrap_or_default();
            let registry = |component: &str, external: bool| -> Option<Exposure> {
                if external || domain.is_empty() {
                    return None;
                }
                Some(Exposure {
                    name: component.to_string(),
                    component: component.to_string(),
                    host: format!("{component}-{}.{domain}", ctx.namespace),
                    path: "/".to_string(),
                    service: component.to_string(),
                    port: 8080,
                })
            };
            let components = &ctx.cr.spec.components;
            if let Some(e) = registry(
                COMPONENT_DEVFILE_REGISTRY,
                components
                    .devfile_registry
                    .as_ref()
                    .map(|r| r.external)
                    .unwrap_or(false),
            ) {
                list.push(e);
            }
            if let Some(e) = registry(
                COMPONENT_PLUGIN_REGISTRY,
                components
                    .plugin_registry
                    .as_ref()
                    .map(|r| r.external)
                    .unwrap_or(false),
            ) {
                list.push(e);
            }
            list
        }
    }
}

/// Operator-owned annotations for an exposure, digest stamped
pub fn exposure_annotations(ctx: &ReconcileContext) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    if !ctx.is_openshift() {
        if let Some(class) = &ctx.cr.spec.k8s.ingress_class {
            annotations.insert("kubernetes.io/ingress.class".to_string(), class.clone());
        }
        annotations.insert(
            "nginx.ingress.kubernetes.io/ssl-redirect".to_string(),
            ctx.cr.spec.server.tls_support.to_string(),
        );
        annotations.insert(
            "nginx.ingress.kubernetes.io/proxy-read-timeout".to_string(),
            "3600".to_string(),
        );
    }
    if let Some(custom) = &ctx.cr.spec.server.che_server_ingress {
        for (k, v) in &custom.annotations {
            annotations.insert(k.clone(), v.clone());
        }
    }
    stamp_digest(&mut annotations);
    annotations
}

/// Build the Ingress for an exposure (plain Kubernetes)
pub fn build_ingress(ctx: &ReconcileContext, exposure: &Exposure) -> Ingress {
    let mut labels = managed_labels(ctx.flavor(), &exposure.component);
    if let Some(custom) = &ctx.cr.spec.server.che_server_ingress {
        labels.extend(custom.labels.clone());
    }

    let tls = if ctx.cr.spec.server.tls_support {
        Some(vec![IngressTLS {
            hosts: Some(vec![exposure.host.clone()]),
            secret_name: Some(ctx.tls_secret_name()),
        }])
    } else {
        None
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(exposure.name.clone()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels),
            annotations: Some(exposure_annotations(ctx)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: ctx.cr.spec.k8s.ingress_class.clone(),
            rules: Some(vec![IngressRule {
                host: Some(exposure.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some(exposure.path.clone()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: exposure.service.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(exposure.port),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Route for an exposure (OpenShift)
pub fn build_route(ctx: &ReconcileContext, exposure: &Exposure) -> DynamicObject {
    let resource = route_resource();
    let mut labels = managed_labels(ctx.flavor(), &exposure.component);
    if let Some(custom) = &ctx.cr.spec.server.che_server_ingress {
        labels.extend(custom.labels.clone());
    }

    let mut spec = json!({
        "to": {"kind": "Service", "name": exposure.service, "weight": 100},
        "port": {"targetPort": "http"},
    });
    // an empty host lets the router assign one
    if !exposure.host.is_empty() {
        spec["host"] = json!(exposure.host);
    }
    if ctx.cr.spec.server.tls_support {
        spec["tls"] = json!({
            "termination": "edge",
            "insecureEdgeTerminationPolicy": "Redirect",
        });
    }

    let mut obj = DynamicObject::new(&exposure.name, &resource).within(&ctx.namespace);
    obj.metadata.labels = Some(labels);
    obj.metadata.annotations = Some(exposure_annotations(ctx));
    obj.data = json!({ "spec": spec });
    obj
}

impl ExposureReconciler {
    /// No hostname declared on OpenShift: create a hostless route and poll
    /// until the router assigns one, then record it on the CR.
    async fn await_route_host(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let resource = route_resource();
        let name = ctx.flavor().to_string();

        let existing = ctx
            .client
            .get_dynamic(&resource, Some(&ctx.namespace), &name)
            .await?;
        let route = match existing {
            Some(route) => route,
            None => {
                let exposure = Exposure {
                    name: name.clone(),
                    component: COMPONENT_CHE.to_string(),
                    host: String::new(),
                    path: "/".to_string(),
                    service: CHE_HOST_SERVICE.to_string(),
                    port: 8080,
                };
                let mut desired = build_route(ctx, &exposure);
                crate::sync::set_controller_owner(&mut desired.metadata, &ctx.owner_reference());
                ctx.client
                    .create_dynamic(&resource, Some(&ctx.namespace), &desired)
                    .await?;
                return Ok(Outcome::requeue());
            }
        };

        let assigned = route
            .data
            .pointer("/spec/host")
            .and_then(|h| h.as_str())
            .filter(|h| !h.is_empty());
        match assigned {
            Some(host) => {
                // record the router-assigned host; the next tick renders
                // every URL from it
                let patch = serde_json::json!({"spec": {"server": {"cheHost": host}}});
                ctx.client
                    .patch::<crate::crd::CheCluster, _>(
                        &ctx.namespace,
                        &kube::ResourceExt::name_any(&ctx.cr),
                        &patch,
                    )
                    .await?;
                Ok(Outcome::requeue())
            }
            None => Ok(Outcome::requeue()),
        }
    }
}

#[async_trait]
impl Reconciler for ExposureReconciler {
    fn id(&self) -> &'static str {
        "ExposureReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let owner = ctx.owner_reference();
        let policy = DiffPolicy::new();
        let wanted = exposures(ctx);

        if wanted.is_empty() {
            if ctx.is_openshift() {
                return self.await_route_host(ctx).await;
            }
            return Err(Error::validation(
                "no cheHost and no ingressDomain: nothing can be exposed",
            ));
        }

        for exposure in &wanted {
            let outcome = if ctx.is_openshift() {
                let route = build_route(ctx, exposure);
                sync_dynamic(
                    &ctx.client,
                    &route_resource(),
                    Some(&ctx.namespace),
                    route,
                    Some(&owner),
                    &policy,
                )
                .await?
            } else {
                let ingress = build_ingress(ctx, exposure);
                sync_object(&ctx.client, &ctx.namespace, ingress, Some(&owner), &policy).await?
            };
            if outcome.needs_requeue() {
                return Ok(Outcome::requeue());
            }
        }

        // exposures that fell out of the set (strategy switched to
        // single-host, registry went external) are deleted best-effort
        for name in [COMPONENT_DEVFILE_REGISTRY, COMPONENT_PLUGIN_REGISTRY] {
            if wanted.iter().any(|e| e.name == name) {
                continue;
            }
            let result = if ctx.is_openshift() {
                ctx.client
                    .delete_dynamic(&route_resource(), Some(&ctx.namespace), name)
                    .await
            } else {
                ctx.client.delete::<Ingress>(&ctx.namespace, name).await
            };
            if let Err(e) = result {
                warn!(exposure = %name, error = %e, "failed to delete stale exposure");
            }
        }

        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}
