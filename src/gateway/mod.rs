//! Gateway reconciler.
//!
//! The gateway is an embedded reverse proxy fronted by a config-watching
//! sidecar. When the CR requests single-host exposure (always through the
//! gateway on OpenShift, via the `gateway` exposure type on Kubernetes),
//! the full stack is materialized: service account, Role/RoleBinding for
//! config map watching, the static proxy config, the two-container
//! deployment sharing an `emptyDir`, the service, and the default server
//! route. Otherwise the same objects are deleted; every deletion is
//! attempted, `NotFound` counts as success, and remaining errors aggregate.

pub mod config;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    PodSpec, PodTemplateSpec, Service, ServiceAccount, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use crate::context::ReconcileContext;
use crate::labels::{managed_labels, selector_labels, selector_string, selectors_disjoint};
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{
    Error, CHE_HOST_SERVICE, COMPONENT_GATEWAY, COMPONENT_GATEWAY_CONFIG, LEGACY_LABEL_APP,
    LEGACY_LABEL_COMPONENT,
};
use config::RouteBuilder;

/// Directory the sidecar writes aggregated dynamic config into
const DYNAMIC_CONFIG_DIR: &str = "/dynamic-config";

/// Reconciles the gateway stack
pub struct GatewayReconciler;

/// Name of the default server route config map
pub fn server_route_configmap_name(flavor: &str) -> String {
    format!("{flavor}-gateway-route-server")
}

/// Labels the sidecar watches on route config maps.
///
/// The CR may override the selector; the default is
/// `{app: <flavor>, component: gateway-config}`.
pub fn sidecar_watch_labels(ctx: &ReconcileContext) -> BTreeMap<String, String> {
    let overrides = &ctx.cr.spec.server.single_host_gateway_config_map_labels;
    if overrides.is_empty() {
        let mut labels = BTreeMap::new();
        labels.insert(LEGACY_LABEL_APP.to_string(), ctx.flavor().to_string());
        labels.insert(
            LEGACY_LABEL_COMPONENT.to_string(),
            COMPONENT_GATEWAY_CONFIG.to_string(),
        );
        labels
    } else {
        overrides.clone()
    }
}

/// Labels on a route config map: the canonical set plus the watch selector.
///
/// Fails when the operator's own labels and the watch selector can never
/// select the same object; the sidecar would silently ignore every route.
pub fn route_configmap_labels(ctx: &ReconcileContext) -> Result<BTreeMap<String, String>, Error> {
    let mut labels = managed_labels(ctx.flavor(), COMPONENT_GATEWAY_CONFIG);
    let watch = sidecar_watch_labels(ctx);
    if selectors_disjoint(&labels, &watch) {
        return Err(Error::validation(format!(
            "gateway config selector {:?} can never match operator-managed config maps",
            watch
        )));
    }
    labels.extend(watch);
    Ok(labels)
}

/// The static proxy configuration (`traefik.yml`)
pub fn static_traefik_config() -> serde_json::Value {
    json!({
        "entryPoints": {
            "http": {
                "address": ":8080",
                "forwardedHeaders": {"insecure": true},
            },
            "https": {
                "address": ":8443",
                "forwardedHeaders": {"insecure": true},
            },
        },
        "providers": {
            "file": {
                "directory": DYNAMIC_CONFIG_DIR,
                "watch": true,
            },
        },
        "log": {"level": "INFO"},
    })
}

fn build_static_configmap(ctx: &ReconcileContext) -> Result<ConfigMap, Error> {
    let body = serde_yaml::to_string(&static_traefik_config())
        .map_err(|e| Error::serialization(e.to_string()))?;
    let mut data = BTreeMap::new();
    data.insert("traefik.yml".to_string(), body);

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("{}-config", ctx.gateway_name())),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), COMPONENT_GATEWAY)),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// The default route: everything under `/` forwards to the server service
fn build_server_route_configmap(ctx: &ReconcileContext) -> Result<ConfigMap, Error> {
    let route = RouteBuilder::new(
        "server",
        "/",
        &format!("http://{CHE_HOST_SERVICE}.{}.svc:8080", ctx.namespace),
    )
    .priority(1)
    .build();

    let mut data = BTreeMap::new();
    data.insert("server.yml".to_string(), route.to_yaml()?);

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(server_route_configmap_name(ctx.flavor())),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(route_configmap_labels(ctx)?),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Name of a per-component route config map
pub fn component_route_configmap_name(flavor: &str, component: &str) -> String {
    format!("{flavor}-gateway-route-{component}")
}

/// A component route: `/<component>` is stripped before forwarding, and the
/// forwarded access token moves into the Authorization header.
///
/// Longer prefixes outrank the server's catch-all route.
pub fn build_component_route_configmap(
    ctx: &ReconcileContext,
    component: &str,
) -> Result<ConfigMap, Error> {
    let prefix = format!("/{component}");
    let route = RouteBuilder::new(
        component,
        &prefix,
        &format!("http://{component}.{}.svc:8080", ctx.namespace),
    )
    .priority(10)
    .strip_prefix(&[prefix.as_str()])
    .header_rewrite()
    .build();

    let mut data = BTreeMap::new();
    data.insert(format!("{component}.yml"), route.to_yaml()?);

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(component_route_configmap_name(ctx.flavor(), component)),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(route_configmap_labels(ctx)?),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

fn build_gateway_deployment(ctx: &ReconcileContext) -> Deployment {
    let name = ctx.gateway_name();
    let labels = managed_labels(ctx.flavor(), COMPONENT_GATEWAY);
    let watch_selector = selector_string(&sidecar_watch_labels(ctx));

    let gateway_container = Container {
        name: "gateway".to_string(),
        image: Some(ctx.defaults.gateway_image.clone()),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: 8080,
                ..Default::default()
            },
            ContainerPort {
                name: Some("https".to_string()),
                container_port: 8443,
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "static-config".to_string(),
                mount_path: "/etc/traefik".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: "dynamic-config".to_string(),
                mount_path: DYNAMIC_CONFIG_DIR.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let sidecar_container = Container {
        name: "configbump".to_string(),
        image: Some(ctx.defaults.gateway_config_sidecar_image.clone()),
        env: Some(vec![
            EnvVar {
                name: "CONFIG_BUMP_DIR".to_string(),
                value: Some(DYNAMIC_CONFIG_DIR.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: "CONFIG_BUMP_LABELS".to_string(),
                value: Some(watch_selector),
                ..Default::default()
            },
            EnvVar {
                name: "CONFIG_BUMP_NAMESPACE".to_string(),
                value: Some(ctx.namespace.clone()),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "dynamic-config".to_string(),
            mount_path: DYNAMIC_CONFIG_DIR.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(ctx.flavor(), COMPONENT_GATEWAY)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name.clone()),
                    containers: vec![gateway_container, sidecar_container],
                    volumes: Some(vec![
                        Volume {
                            name: "static-config".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: format!("{name}-config"),
                                ..Default::default()
                            }),
                            ..Default::default()
                        },
                        // shared by the proxy and the sidecar
                        Volume {
                            name: "dynamic-config".to_string(),
                            empty_dir: Some(EmptyDirVolumeSource::default()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_gateway_service(ctx: &ReconcileContext) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(ctx.gateway_name()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), COMPONENT_GATEWAY)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(ctx.flavor(), COMPONENT_GATEWAY)),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 8080,
                    target_port: Some(IntOrString::Int(8080)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 8443,
                    target_port: Some(IntOrString::Int(8443)),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_gateway_sa(ctx: &ReconcileContext) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(ctx.gateway_name()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), COMPONENT_GATEWAY)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build_gateway_role(ctx: &ReconcileContext) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(ctx.gateway_name()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), COMPONENT_GATEWAY)),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["configmaps".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
    }
}

fn build_gateway_role_binding(ctx: &ReconcileContext) -> RoleBinding {
    let name = ctx.gateway_name();
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), COMPONENT_GATEWAY)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name,
            namespace: Some(ctx.namespace.clone()),
            ..Default::default()
        }]),
    }
}

impl GatewayReconciler {
    async fn materialize(&self, ctx: &ReconcileContext) -> Result<Option<Outcome>, Error> {
        let policy = DiffPolicy::new();
        let ns = &ctx.namespace;

        if let Some(requeue) = converge(ctx, build_gateway_sa(ctx), &policy).await? {
            return Ok(Some(requeue));
        }
        if let Some(requeue) = converge(ctx, build_gateway_role(ctx), &policy).await? {
            return Ok(Some(requeue));
        }
        if let Some(requeue) = converge(ctx, build_gateway_role_binding(ctx), &policy).await? {
            return Ok(Some(requeue));
        }
        if let Some(requeue) = converge(ctx, build_static_configmap(ctx)?, &policy).await? {
            return Ok(Some(requeue));
        }
        if let Some(requeue) = converge(ctx, build_gateway_deployment(ctx), &policy).await? {
            return Ok(Some(requeue));
        }
        if let Some(requeue) = converge(ctx, build_gateway_service(ctx), &policy).await? {
            return Ok(Some(requeue));
        }
        if let Some(requeue) = converge(ctx, build_server_route_configmap(ctx)?, &policy).await? {
            return Ok(Some(requeue));
        }

        // one route config per deployed component; a deleted logical route
        // deletes its config map and the sidecar garbage-collects it from
        // the live proxy
        let wanted = crate::reconcilers::wanted_workloads(ctx);
        for workload in &wanted {
            let cm = build_component_route_configmap(ctx, &workload.component)?;
            if let Some(requeue) = converge(ctx, cm, &policy).await? {
                return Ok(Some(requeue));
            }
        }
        for component in [
            crate::COMPONENT_DEVFILE_REGISTRY,
            crate::COMPONENT_PLUGIN_REGISTRY,
            crate::COMPONENT_DASHBOARD,
        ] {
            if wanted.iter().any(|w| w.component == component) {
                continue;
            }
            let name = component_route_configmap_name(ctx.flavor(), component);
            if let Err(e) = ctx.client.delete::<ConfigMap>(ns, &name).await {
                tracing::warn!(route = %name, error = %e, "failed to delete stale route config");
            }
        }
        Ok(None)
    }

    /// Tear down the whole stack.
    ///
    /// Every deletion is attempted; `NotFound` is success; remaining
    /// failures aggregate into one error.
    async fn delete_all(&self, ctx: &ReconcileContext) -> Result<(), Error> {
        let name = ctx.gateway_name();
        let ns = &ctx.namespace;
        let mut failures = Vec::new();

        let mut results: Vec<(String, Result<(), Error>)> = Vec::new();
        for component in [
            crate::COMPONENT_DEVFILE_REGISTRY,
            crate::COMPONENT_PLUGIN_REGISTRY,
            crate::COMPONENT_DASHBOARD,
        ] {
            let cm_name = component_route_configmap_name(ctx.flavor(), component);
            results.push((
                format!("route config {component}"),
                ctx.client.delete::<ConfigMap>(ns, &cm_name).await,
            ));
        }
        let fixed: Vec<(&str, Result<(), Error>)> = vec![
            (
                "route config server",
                ctx.client
                    .delete::<ConfigMap>(ns, &server_route_configmap_name(ctx.flavor()))
                    .await,
            ),
            ("service", ctx.client.delete::<Service>(ns, &name).await),
            ("deployment", ctx.client.delete::<Deployment>(ns, &name).await),
            (
                "static config",
                ctx.client.delete::<ConfigMap>(ns, &format!("{name}-config")).await,
            ),
            ("role binding", ctx.client.delete::<RoleBinding>(ns, &name).await),
            ("role", ctx.client.delete::<Role>(ns, &name).await),
            (
                "service account",
                ctx.client.delete::<ServiceAccount>(ns, &name).await,
            ),
        ];
        results.extend(
            fixed
                .into_iter()
                .map(|(what, result)| (what.to_string(), result)),
        );
        for (what, result) in results {
            if let Err(e) = result {
                failures.push(format!("delete gateway {what}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(failures))
        }
    }
}

#[async_trait]
impl Reconciler for GatewayReconciler {
    fn id(&self) -> &'static str {
        "GatewayReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        if ctx.cr.spec.gateway_enabled(ctx.is_openshift()) {
            if let Some(requeue) = self.materialize(ctx).await? {
                return Ok(requeue);
            }
        } else {
            self.delete_all(ctx).await?;
        }
        Ok(Outcome::Done)
    }

    async fn finalize(&self, ctx: &ReconcileContext) -> bool {
        self.delete_all(ctx).await.is_ok()
    }
}
