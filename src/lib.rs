//! Che operator - Kubernetes/OpenShift lifecycle management for the Che platform
//!
//! The operator watches a single `CheCluster` custom resource and drives the
//! cluster toward its declared state: deployments, services, ingresses/routes,
//! config maps, secrets, RBAC, PVCs, TLS material, OAuth clients and console
//! links. Reconciliation runs as an ordered pipeline of idempotent
//! sub-reconcilers; cluster-scoped side effects are protected by finalizers.

#![deny(missing_docs)]

/// Cluster client facade over the Kubernetes API
pub mod client;
/// Root controller wired into the kube runtime
pub mod controller;
/// ReconcileContext carried through one tick
pub mod context;
/// CheCluster custom resource definition
pub mod crd;
/// Image and flavor defaults read once from the environment
pub mod defaults;
/// Error types for operator operations
pub mod error;
/// Finalizer protocol on the root CR
pub mod finalizers;
/// Gateway deployment and dynamic proxy configuration
pub mod gateway;
/// Canonical label set and managed-annotations digest
pub mod labels;
/// Reconciler contract and the ordered reconcile manager
pub mod reconcile;
/// Sub-reconciler catalog
pub mod reconcilers;
/// Retry utilities with exponential backoff and jitter
pub mod retry;
/// Status subresource writer
pub mod status;
/// Object sync primitive: create-or-update-or-replace with semantic diffs
pub mod sync;

#[cfg(test)]
mod testutil;

pub use error::Error;

/// API group of the CheCluster custom resource
pub const CHE_GROUP: &str = "org.eclipse.che";

/// Default flavor identifier when `CHE_FLAVOR` is unset
pub const DEFAULT_CHE_FLAVOR: &str = "che";

/// Organizational `part-of` label value stamped on every managed object
pub const CHE_PART_OF: &str = "che.eclipse.org";

/// Label key: object name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";
/// Label key: flavor instance
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
/// Label key: organizational grouping
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";
/// Label key: per-object role tag
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
/// Label key: managing controller
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Legacy label key kept in deployment selectors (selectors are immutable)
pub const LEGACY_LABEL_APP: &str = "app";
/// Legacy label key kept in deployment selectors
pub const LEGACY_LABEL_COMPONENT: &str = "component";

/// Annotation: stable digest over operator-owned annotations
pub const ANNOTATION_MANAGED_DIGEST: &str = "che.eclipse.org/managed-annotations-digest";
/// Annotation: how a labeled secret/config map is mounted (`file` or `env`)
pub const ANNOTATION_MOUNT_AS: &str = "che.eclipse.org/mount-as";
/// Annotation: mount path for `mount-as: file`
pub const ANNOTATION_MOUNT_PATH: &str = "che.eclipse.org/mount-path";
/// Annotation: shared env var name for single-key `mount-as: env`
pub const ANNOTATION_ENV_NAME: &str = "che.eclipse.org/env-name";
/// Annotation prefix for per-key env var names: `che.eclipse.org/<key>_env-name`
pub const ANNOTATION_ENV_NAME_SUFFIX: &str = "_env-name";
/// Annotation on the merged CA bundle listing aggregated config map versions
pub const ANNOTATION_INCLUDED_CONFIGMAPS: &str = "che.eclipse.org/included-configmaps";

/// Top-level finalizer guaranteeing orderly cleanup of cluster-scoped objects
pub const CLUSTER_RESOURCES_FINALIZER: &str = "cluster-resources.finalizers.che.eclipse.org";
/// Finalizer owned by the OAuth client reconciler
pub const OAUTH_FINALIZER: &str = "oauthclients.finalizers.che.eclipse.org";
/// Finalizer owned by the console link reconciler
pub const CONSOLE_LINK_FINALIZER: &str = "consolelink.finalizers.che.eclipse.org";

/// Component tag for the server workload
pub const COMPONENT_CHE: &str = "che";
/// Component tag for the gateway workload
pub const COMPONENT_GATEWAY: &str = "gateway";
/// Component tag for gateway route config maps watched by the sidecar
pub const COMPONENT_GATEWAY_CONFIG: &str = "gateway-config";
/// Component tag for the postgres workload
pub const COMPONENT_POSTGRES: &str = "postgres";
/// Component tag for the devfile registry
pub const COMPONENT_DEVFILE_REGISTRY: &str = "devfile-registry";
/// Component tag for the plugin registry
pub const COMPONENT_PLUGIN_REGISTRY: &str = "plugin-registry";
/// Component tag for the user dashboard
pub const COMPONENT_DASHBOARD: &str = "dashboard";
/// Component tag for the user-provided CA bundle config maps
pub const COMPONENT_CA_BUNDLE: &str = "ca-bundle";

/// Name of the `che-host` service fronting the server deployment
pub const CHE_HOST_SERVICE: &str = "che-host";
/// Name of the merged CA certificates config map
pub const CA_CERTS_MERGED_CONFIGMAP: &str = "ca-certs";
/// Name of the secret carrying the self-signed CA used for TLS generation
pub const SELF_SIGNED_CA_SECRET: &str = "self-signed-certificate";

/// Default requeue interval for stateful waits (job completion, host assignment)
pub const DEFAULT_REQUEUE_SECONDS: u64 = 1;
