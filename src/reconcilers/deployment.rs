//! Deployment reconciler.
//!
//! Owns the server pod template. Before sync, every secret and config map
//! labeled `part-of=che.eclipse.org, component=<deploy>-secret|-configmap`
//! is mounted according to its `mount-as` annotation: `file` becomes a
//! volume and mount at `mount-path`, `env` becomes env vars, through the
//! shared `env-name` annotation when the object has exactly one key or
//! per-key `<key>_env-name` annotations otherwise. Pod security is forced
//! to restricted values on plain Kubernetes, and CPU limits are elided when
//! the namespace carries no LimitRange.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, ConfigMapKeySelector, ConfigMapVolumeSource, Container,
    ContainerPort, EnvFromSource, EnvVar, EnvVarSource, LimitRange, PodSecurityContext, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Secret, SecretKeySelector, SecretVolumeSource,
    SecurityContext, Volume, VolumeMount, HTTPGetAction,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use thiserror::Error as ThisError;

use crate::context::ReconcileContext;
use crate::labels::{managed_labels, selector_labels, selector_string};
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{
    Error, ANNOTATION_ENV_NAME, ANNOTATION_ENV_NAME_SUFFIX, ANNOTATION_MOUNT_AS,
    ANNOTATION_MOUNT_PATH, CHE_PART_OF, COMPONENT_CHE, LABEL_COMPONENT, LABEL_PART_OF,
};

/// Default memory request for the server container
const DEFAULT_MEMORY_REQUEST: &str = "512Mi";
/// Default memory limit for the server container
const DEFAULT_MEMORY_LIMIT: &str = "1Gi";
/// Default CPU request for the server container
const DEFAULT_CPU_REQUEST: &str = "100m";
/// Default CPU limit for the server container
const DEFAULT_CPU_LIMIT: &str = "2";

/// Reconciles the server deployment
pub struct DeploymentReconciler;

/// Fan-out mounting errors; surfaced as validation failures
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum MountError {
    /// `mount-as: env` with several keys but no per-key name mapping
    #[error("object {0} has {1} keys but no per-key env name annotations")]
    AmbiguousEnvNames(String, usize),
    /// `mount-as: file` without a mount path
    #[error("object {0} is mounted as a file but has no mount-path annotation")]
    MissingMountPath(String),
    /// Unknown `mount-as` value
    #[error("object {0} has unsupported mount-as value {1}")]
    UnsupportedMountAs(String, String),
}

/// The mounting additions computed from labeled secrets and config maps
#[derive(Debug, Default)]
pub struct MountPlan {
    /// Env vars added to the server container
    pub env: Vec<EnvVar>,
    /// Volumes added to the pod
    pub volumes: Vec<Volume>,
    /// Mounts added to the server container
    pub mounts: Vec<VolumeMount>,
}

enum MountSource {
    Secret,
    ConfigMap,
}

fn env_var_for_key(source: &MountSource, object_name: &str, key: &str, env_name: &str) -> EnvVar {
    let value_from = match source {
        MountSource::Secret => EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: object_name.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        },
        MountSource::ConfigMap => EnvVarSource {
            config_map_key_ref: Some(ConfigMapKeySelector {
                name: object_name.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        },
    };
    EnvVar {
        name: env_name.to_string(),
        value_from: Some(value_from),
        ..Default::default()
    }
}

fn plan_one(
    plan: &mut MountPlan,
    source: MountSource,
    name: &str,
    annotations: &BTreeMap<String, String>,
    keys: Vec<String>,
) -> Result<(), MountError> {
    let Some(mount_as) = annotations.get(ANNOTATION_MOUNT_AS) else {
        return Ok(());
    };
    match mount_as.as_str() {
        "file" => {
            let path = annotations
                .get(ANNOTATION_MOUNT_PATH)
                .ok_or_else(|| MountError::MissingMountPath(name.to_string()))?;
            let volume = match source {
                MountSource::Secret => Volume {
                    name: name.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(name.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                MountSource::ConfigMap => Volume {
                    name: name.to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: name.to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            };
            plan.volumes.push(volume);
            plan.mounts.push(VolumeMount {
                name: name.to_string(),
                mount_path: path.clone(),
                ..Default::default()
            });
        }
        "env" => {
            let shared_name = annotations.get(ANNOTATION_ENV_NAME);
            match (keys.len(), shared_name) {
                (0, _) => {}
                (1, Some(env_name)) => {
                    plan.env.push(env_var_for_key(&source, name, &keys[0], env_name));
                }
                (n, _) => {
                    // each key needs its own mapping annotation
                    let mut mapped = Vec::new();
                    for key in &keys {
                        let annotation =
                            format!("che.eclipse.org/{key}{ANNOTATION_ENV_NAME_SUFFIX}");
                        match annotations.get(&annotation) {
                            Some(env_name) => {
                                mapped.push(env_var_for_key(&source, name, key, env_name))
                            }
                            None => {
                                return Err(MountError::AmbiguousEnvNames(name.to_string(), n))
                            }
                        }
                    }
                    plan.env.extend(mapped);
                }
            }
        }
        other => {
            return Err(MountError::UnsupportedMountAs(
                name.to_string(),
                other.to_string(),
            ))
        }
    }
    Ok(())
}

/// Compute the mount plan from labeled secrets and config maps
pub fn compute_mounts(
    secrets: &[Secret],
    configmaps: &[ConfigMap],
) -> Result<MountPlan, MountError> {
    let mut plan = MountPlan::default();
    for secret in secrets {
        let keys: Vec<String> = secret
            .data
            .as_ref()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        plan_one(
            &mut plan,
            MountSource::Secret,
            &secret.name_any(),
            &secret.metadata.annotations.clone().unwrap_or_default(),
            keys,
        )?;
    }
    for cm in configmaps {
        let keys: Vec<String> = cm
            .data
            .as_ref()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default();
        plan_one(
            &mut plan,
            MountSource::ConfigMap,
            &cm.name_any(),
            &cm.metadata.annotations.clone().unwrap_or_default(),
            keys,
        )?;
    }
    Ok(plan)
}

fn quantity_map(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

/// Resource requirements for the server container.
///
/// CR-level request/limit fields override the defaults; `with_cpu_limits`
/// is false when the namespace has no LimitRange, eliding CPU limits so the
/// container can burst.
pub fn server_resources(ctx: &ReconcileContext, with_cpu_limits: bool) -> ResourceRequirements {
    let server = &ctx.cr.spec.server;
    let mut requests = quantity_map(&[
        (
            "memory",
            server
                .server_memory_request
                .as_deref()
                .unwrap_or(DEFAULT_MEMORY_REQUEST),
        ),
        (
            "cpu",
            server
                .server_cpu_request
                .as_deref()
                .unwrap_or(DEFAULT_CPU_REQUEST),
        ),
    ]);
    let mut limits = quantity_map(&[(
        "memory",
        server
            .server_memory_limit
            .as_deref()
            .unwrap_or(DEFAULT_MEMORY_LIMIT),
    )]);
    if with_cpu_limits {
        limits.insert(
            "cpu".to_string(),
            Quantity(
                server
                    .server_cpu_limit
                    .as_deref()
                    .unwrap_or(DEFAULT_CPU_LIMIT)
                    .to_string(),
            ),
        );
    }

    // per-container overrides win over both defaults and CR shortcuts
    if let Some(ov) = server
        .resource_overrides
        .iter()
        .find(|o| o.container == ctx.flavor())
    {
        if let Some(v) = &ov.memory_request {
            requests.insert("memory".to_string(), Quantity(v.clone()));
        }
        if let Some(v) = &ov.cpu_request {
            requests.insert("cpu".to_string(), Quantity(v.clone()));
        }
        if let Some(v) = &ov.memory_limit {
            limits.insert("memory".to_string(), Quantity(v.clone()));
        }
        if let Some(v) = &ov.cpu_limit {
            if with_cpu_limits {
                limits.insert("cpu".to_string(), Quantity(v.clone()));
            }
        }
    }

    ResourceRequirements {
        requests: Some(requests),
        limits: Some(limits),
        ..Default::default()
    }
}

/// Pod security context meeting restricted standards on plain Kubernetes.
///
/// OpenShift injects its own SCC-driven values; writing ours there would
/// fight the admission controller.
pub fn pod_security_context(ctx: &ReconcileContext) -> Option<PodSecurityContext> {
    if ctx.is_openshift() {
        return None;
    }
    let k8s = &ctx.cr.spec.k8s;
    Some(PodSecurityContext {
        run_as_user: Some(k8s.security_context_run_as_user.unwrap_or(1724)),
        fs_group: Some(k8s.security_context_fs_group.unwrap_or(1724)),
        run_as_non_root: Some(true),
        ..Default::default()
    })
}

fn container_security_context(ctx: &ReconcileContext) -> Option<SecurityContext> {
    if ctx.is_openshift() {
        return None;
    }
    Some(SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(k8s_openapi::api::core::v1::Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn http_probe(path: &str, port: i32, initial_delay: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        timeout_seconds: Some(10),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

/// Build the server deployment
pub fn build_che_deployment(
    ctx: &ReconcileContext,
    plan: &MountPlan,
    with_cpu_limits: bool,
) -> Deployment {
    let flavor = ctx.flavor();
    let image = ctx
        .cr
        .spec
        .server
        .che_image
        .clone()
        .filter(|i| !i.is_empty())
        .map(|image| match &ctx.cr.spec.server.che_image_tag {
            Some(tag) if !tag.is_empty() => format!("{image}:{tag}"),
            _ => image,
        })
        .unwrap_or_else(|| ctx.defaults.che_server_image.clone());

    let container = Container {
        name: flavor.to_string(),
        image: Some(image),
        ports: Some(vec![
            ContainerPort {
                name: Some("http".to_string()),
                container_port: 8080,
                ..Default::default()
            },
            ContainerPort {
                name: Some("http-debug".to_string()),
                container_port: 8000,
                ..Default::default()
            },
        ]),
        env: if plan.env.is_empty() {
            None
        } else {
            Some(plan.env.clone())
        },
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: flavor.to_string(),
                optional: None,
            }),
            ..Default::default()
        }]),
        volume_mounts: if plan.mounts.is_empty() {
            None
        } else {
            Some(plan.mounts.clone())
        },
        resources: Some(server_resources(ctx, with_cpu_limits)),
        readiness_probe: Some(http_probe("/api/system/state", 8080, 25)),
        liveness_probe: Some(http_probe("/api/system/state", 8080, 50)),
        security_context: container_security_context(ctx),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(flavor.to_string()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(flavor, COMPONENT_CHE)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            // legacy subset: selectors are immutable on live deployments
            selector: LabelSelector {
                match_labels: Some(selector_labels(flavor, COMPONENT_CHE)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(managed_labels(flavor, COMPONENT_CHE)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(flavor.to_string()),
                    security_context: pod_security_context(ctx),
                    containers: vec![container],
                    volumes: if plan.volumes.is_empty() {
                        None
                    } else {
                        Some(plan.volumes.clone())
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Selector matching fan-out objects for a deployment
fn fanout_selector(component_suffix: &str, deploy: &str) -> String {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PART_OF.to_string(), CHE_PART_OF.to_string());
    labels.insert(
        LABEL_COMPONENT.to_string(),
        format!("{deploy}-{component_suffix}"),
    );
    selector_string(&labels)
}

#[async_trait]
impl Reconciler for DeploymentReconciler {
    fn id(&self) -> &'static str {
        "DeploymentReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let flavor = ctx.flavor();

        let secrets: Vec<Secret> = ctx
            .client
            .list(&ctx.namespace, &fanout_selector("secret", flavor))
            .await?;
        let configmaps: Vec<ConfigMap> = ctx
            .client
            .list(&ctx.namespace, &fanout_selector("configmap", flavor))
            .await?;
        let plan =
            compute_mounts(&secrets, &configmaps).map_err(|e| Error::validation(e.to_string()))?;

        let limit_ranges: Vec<LimitRange> = ctx.client.list(&ctx.namespace, "").await?;
        let with_cpu_limits = !limit_ranges.is_empty();

        let deployment = build_che_deployment(ctx, &plan, with_cpu_limits);
        if let Some(requeue) = converge(ctx, deployment, &DiffPolicy::new()).await? {
            return Ok(requeue);
        }
        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}
