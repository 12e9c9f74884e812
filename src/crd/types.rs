//! Nested specification types for the CheCluster CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How externally reachable services are exposed
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ExposureStrategy {
    /// One hostname per component via distinct ingress/route objects
    #[default]
    #[serde(rename = "multi-host")]
    MultiHost,
    /// One hostname with path-based routing through the gateway
    #[serde(rename = "single-host")]
    SingleHost,
}

/// How single-host exposure is realized on plain Kubernetes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SingleHostExposureType {
    /// The embedded reverse-proxy gateway routes by path
    #[default]
    Gateway,
    /// A single native ingress carries every path rule
    Native,
}

/// Workspace PVC provisioning strategy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PvcStrategy {
    /// One claim shared by every workspace
    #[default]
    Common,
    /// One claim per workspace
    PerWorkspace,
    /// Claims are declared by the workspace itself
    Unique,
}

/// User-supplied metadata merged onto generated ingresses/routes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressCustomization {
    /// Extra annotations placed on every generated ingress/route
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Extra labels placed on every generated ingress/route
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Per-container resource request/limit override keyed by container name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOverride {
    /// Container the override applies to
    pub container: String,
    /// Memory request, e.g. `512Mi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    /// Memory limit, e.g. `1Gi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    /// CPU request, e.g. `100m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    /// CPU limit, e.g. `1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
}

/// Server section: hostname, TLS, exposure, images, resources, proxy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerSpec {
    /// Public hostname of the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_host: Option<String>,

    /// Serve the platform over TLS
    #[serde(default)]
    pub tls_support: bool,

    /// Exposure strategy for externally reachable services
    #[serde(default)]
    pub server_exposure_strategy: ExposureStrategy,

    /// Single-host realization on plain Kubernetes
    #[serde(default)]
    pub single_host_exposure_type: SingleHostExposureType,

    /// Server image override (defaults come from the environment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_image: Option<String>,

    /// Server image tag override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_image_tag: Option<String>,

    /// Flavor identifier override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_flavor: Option<String>,

    /// Server container memory request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_memory_request: Option<String>,

    /// Server container memory limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_memory_limit: Option<String>,

    /// Server container CPU request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cpu_request: Option<String>,

    /// Server container CPU limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cpu_limit: Option<String>,

    /// Per-container resource overrides
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_overrides: Vec<ResourceOverride>,

    /// HTTP(S) proxy URL workspaces and the server route traffic through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,

    /// Proxy port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_port: Option<String>,

    /// Proxy user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_user: Option<String>,

    /// Name of the secret holding the proxy password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_password_secret: Option<String>,

    /// Hosts reached directly, bypassing the proxy (`|`-separated)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_proxy_hosts: Option<String>,

    /// Extra metadata for generated ingresses/routes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_server_ingress: Option<IngressCustomization>,

    /// Free-form `CHE_*` properties merged into the server config map last
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_che_properties: BTreeMap<String, String>,

    /// Label selector the gateway config sidecar watches.
    ///
    /// Defaults to `app=<flavor>, component=gateway-config`; every gateway
    /// route config map carries these labels in addition to the canonical
    /// set.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub single_host_gateway_config_map_labels: BTreeMap<String, String>,

    /// Address components through internal cluster service names
    #[serde(default)]
    pub use_internal_cluster_svc_names: bool,
}

/// Authentication section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Identity provider (Keycloak) URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_url: Option<String>,

    /// Identity provider realm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_realm: Option<String>,

    /// Identity provider client id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_client_id: Option<String>,

    /// Name of the secret with identity provider credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_provider_secret: Option<String>,

    /// OAuth client name registered with the cluster OAuth server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o_auth_client_name: Option<String>,

    /// OAuth client secret (generated when empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub o_auth_secret: Option<String>,

    /// Log users in through the OpenShift OAuth server
    #[serde(default)]
    pub open_shift_oauth: bool,

    /// Authenticate users natively against the cluster
    #[serde(default)]
    pub native_user_mode: bool,

    /// The identity provider is managed outside this operator
    #[serde(default)]
    pub external_identity_provider: bool,
}

/// Kubernetes networking section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct K8sSpec {
    /// Domain generated ingress hosts are placed under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_domain: Option<String>,

    /// Ingress class generated ingresses request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class: Option<String>,

    /// Name of the TLS secret generated ingresses reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// UID pods run as on plain Kubernetes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context_run_as_user: Option<i64>,

    /// FS group pods run with on plain Kubernetes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context_fs_group: Option<i64>,
}

/// Storage section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Workspace PVC provisioning strategy
    #[serde(default)]
    pub pvc_strategy: PvcStrategy,

    /// Requested claim size, e.g. `1Gi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_claim_size: Option<String>,

    /// Storage class for workspace claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_pvc_storage_class_name: Option<String>,

    /// Image of the pre-create jobs that prepare claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc_jobs_image: Option<String>,
}

/// Database section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// The database is managed outside this operator
    #[serde(default)]
    pub external_db: bool,

    /// Postgres host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_postgres_host: Option<String>,

    /// Postgres port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_postgres_port: Option<String>,

    /// Postgres user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_postgres_user: Option<String>,

    /// Postgres password (generated when empty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_postgres_password: Option<String>,

    /// Postgres database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_postgres_db: Option<String>,

    /// Postgres image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_image: Option<String>,
}

/// Metrics section
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    /// Expose the server metrics port
    #[serde(default)]
    pub enable: bool,
}

/// One optionally-external registry component (devfile or plugin)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySpec {
    /// Image override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// The registry is managed outside this operator
    #[serde(default)]
    pub external: bool,

    /// URL of the external registry when `external` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

/// Optional platform components
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentsSpec {
    /// Devfile registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devfile_registry: Option<RegistrySpec>,

    /// Plugin registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_registry: Option<RegistrySpec>,

    /// User dashboard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<RegistrySpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_strategy_serializes_with_dashes() {
        assert_eq!(
            serde_json::to_string(&ExposureStrategy::MultiHost).unwrap(),
            "\"multi-host\""
        );
        assert_eq!(
            serde_json::to_string(&ExposureStrategy::SingleHost).unwrap(),
            "\"single-host\""
        );
    }

    #[test]
    fn defaults_are_multi_host_gateway_common() {
        assert_eq!(ExposureStrategy::default(), ExposureStrategy::MultiHost);
        assert_eq!(
            SingleHostExposureType::default(),
            SingleHostExposureType::Gateway
        );
        assert_eq!(PvcStrategy::default(), PvcStrategy::Common);
    }

    #[test]
    fn server_spec_deserializes_camel_case() {
        let spec: ServerSpec = serde_json::from_value(serde_json::json!({
            "cheHost": "che.example.org",
            "tlsSupport": true,
            "serverExposureStrategy": "single-host",
            "nonProxyHosts": "localhost|127.0.0.1",
        }))
        .unwrap();

        assert_eq!(spec.che_host.as_deref(), Some("che.example.org"));
        assert!(spec.tls_support);
        assert_eq!(spec.server_exposure_strategy, ExposureStrategy::SingleHost);
        assert_eq!(spec.non_proxy_hosts.as_deref(), Some("localhost|127.0.0.1"));
    }

    #[test]
    fn omitted_sections_default_cleanly() {
        let spec: ServerSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(!spec.tls_support);
        assert!(spec.custom_che_properties.is_empty());
        assert!(spec.che_server_ingress.is_none());
    }
}
