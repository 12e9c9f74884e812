//! CheCluster Custom Resource
//!
//! The CheCluster CRD is the single declared state the operator reconciles.
//! Exactly one instance exists per watched scope; the operator never creates
//! or deletes it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AuthSpec, ComponentsSpec, DatabaseSpec, ExposureStrategy, K8sSpec, MetricsSpec, ServerSpec,
    SingleHostExposureType, StorageSpec,
};
use crate::Error;

/// Specification for a CheCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "org.eclipse.che",
    version = "v1",
    kind = "CheCluster",
    plural = "checlusters",
    shortname = "checluster",
    status = "CheClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Running","type":"string","jsonPath":".status.cheClusterRunning"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.cheURL"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CheClusterSpec {
    /// Server configuration: hostname, TLS, exposure, images, proxy
    #[serde(default)]
    pub server: ServerSpec,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthSpec,

    /// Kubernetes networking configuration
    #[serde(default)]
    pub k8s: K8sSpec,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageSpec,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseSpec,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsSpec,

    /// Optional platform components
    #[serde(default)]
    pub components: ComponentsSpec,
}

impl CheClusterSpec {
    /// Validate field combinations that cannot be expressed in the schema
    pub fn validate(&self) -> Result<(), Error> {
        if self.server.tls_support
            && self.k8s.tls_secret_name.as_deref().is_none_or(str::is_empty)
            && self.k8s.ingress_domain.is_some()
        {
            return Err(Error::validation(
                "tlsSupport requires k8s.tlsSecretName on Kubernetes installations",
            ));
        }

        if let Some(ref registry) = self.components.devfile_registry {
            if registry.external && registry.external_url.as_deref().is_none_or(str::is_empty) {
                return Err(Error::validation(
                    "external devfile registry requires externalUrl",
                ));
            }
        }
        if let Some(ref registry) = self.components.plugin_registry {
            if registry.external && registry.external_url.as_deref().is_none_or(str::is_empty) {
                return Err(Error::validation(
                    "external plugin registry requires externalUrl",
                ));
            }
        }

        if self.auth.external_identity_provider
            && self
                .auth
                .identity_provider_url
                .as_deref()
                .is_none_or(str::is_empty)
        {
            return Err(Error::validation(
                "externalIdentityProvider requires identityProviderUrl",
            ));
        }

        Ok(())
    }

    /// Effective flavor identifier, spec override first
    pub fn flavor<'a>(&'a self, default_flavor: &'a str) -> &'a str {
        self.server.che_flavor.as_deref().unwrap_or(default_flavor)
    }

    /// True when the gateway stack must be materialized
    pub fn gateway_enabled(&self, is_openshift: bool) -> bool {
        match self.server.server_exposure_strategy {
            ExposureStrategy::SingleHost => {
                is_openshift
                    || self.server.single_host_exposure_type == SingleHostExposureType::Gateway
            }
            ExposureStrategy::MultiHost => false,
        }
    }
}

/// Status for a CheCluster, written through the status subresource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheClusterStatus {
    /// Aggregate availability indicator rendered for humans
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_cluster_running: Option<String>,

    /// Public URL of the server
    #[serde(default, rename = "cheURL", skip_serializing_if = "Option::is_none")]
    pub che_url: Option<String>,

    /// Deployed server version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub che_version: Option<String>,

    /// Short machine-readable failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable failure message (`<reconciler>: <cause>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Pointer to remediation documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_link: Option<String>,

    /// URL of the devfile registry
    #[serde(
        default,
        rename = "devfileRegistryURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub devfile_registry_url: Option<String>,

    /// URL of the plugin registry
    #[serde(
        default,
        rename = "pluginRegistryURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub plugin_registry_url: Option<String>,

    /// URL of the identity provider
    #[serde(
        default,
        rename = "keycloakURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub keycloak_url: Option<String>,

    /// The database schema has been provisioned
    #[serde(default)]
    pub db_provisioned: bool,

    /// The identity provider realm/client have been provisioned
    #[serde(default)]
    pub keycloak_provisioned: bool,

    /// The OpenShift OAuth identity provider user has been created
    #[serde(default)]
    pub open_shift_oauth_user_created: bool,

    /// GitHub OAuth has been provisioned
    #[serde(default)]
    pub git_hub_o_auth_provisioned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::RegistrySpec;

    fn minimal_spec() -> CheClusterSpec {
        CheClusterSpec::default()
    }

    #[test]
    fn minimal_spec_is_valid() {
        assert!(minimal_spec().validate().is_ok());
    }

    #[test]
    fn tls_on_kubernetes_requires_secret_name() {
        let mut spec = minimal_spec();
        spec.server.tls_support = true;
        spec.k8s.ingress_domain = Some("192.168.99.101.nip.io".to_string());
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("tlsSecretName"));

        spec.k8s.tls_secret_name = Some("che-tls".to_string());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn external_registry_requires_url() {
        let mut spec = minimal_spec();
        spec.components.devfile_registry = Some(RegistrySpec {
            external: true,
            ..Default::default()
        });
        assert!(spec.validate().is_err());

        spec.components.devfile_registry = Some(RegistrySpec {
            external: true,
            external_url: Some("https://registry.example.org".to_string()),
            ..Default::default()
        });
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn flavor_prefers_spec_override() {
        let mut spec = minimal_spec();
        assert_eq!(spec.flavor("che"), "che");
        spec.server.che_flavor = Some("codeready".to_string());
        assert_eq!(spec.flavor("che"), "codeready");
    }

    #[test]
    fn gateway_enabled_only_for_single_host() {
        let mut spec = minimal_spec();
        // multi-host never uses the gateway
        assert!(!spec.gateway_enabled(true));
        assert!(!spec.gateway_enabled(false));

        spec.server.server_exposure_strategy = ExposureStrategy::SingleHost;
        // single-host on OpenShift always goes through the gateway
        assert!(spec.gateway_enabled(true));
        // on Kubernetes only with the gateway exposure type
        assert!(spec.gateway_enabled(false));
        spec.server.single_host_exposure_type = SingleHostExposureType::Native;
        assert!(!spec.gateway_enabled(false));
    }

    #[test]
    fn full_manifest_deserializes() {
        let manifest = r#"
apiVersion: org.eclipse.che/v1
kind: CheCluster
metadata:
  name: eclipse-che
  namespace: eclipse-che
spec:
  server:
    cheHost: che.apps.example.org
    tlsSupport: true
    serverExposureStrategy: single-host
    singleHostExposureType: gateway
    serverMemoryLimit: 2Gi
    nonProxyHosts: localhost|127.0.0.1
    customCheProperties:
      CHE_LIMITS_USER_WORKSPACES_COUNT: "10"
  auth:
    openShiftOauth: true
    identityProviderRealm: che
  k8s:
    ingressDomain: 192.168.99.101.nip.io
    tlsSecretName: che-tls
  storage:
    pvcStrategy: common
    pvcClaimSize: 2Gi
  database:
    externalDb: false
    chePostgresPort: "5432"
  metrics:
    enable: true
  components:
    devfileRegistry:
      external: false
    pluginRegistry:
      external: true
      externalUrl: https://plugins.example.org
"#;
        let cr: CheCluster = serde_yaml::from_str(manifest).unwrap();
        assert_eq!(cr.spec.server.che_host.as_deref(), Some("che.apps.example.org"));
        assert!(cr.spec.server.tls_support);
        assert_eq!(
            cr.spec.server.server_exposure_strategy,
            ExposureStrategy::SingleHost
        );
        assert_eq!(cr.spec.server.server_memory_limit.as_deref(), Some("2Gi"));
        assert_eq!(
            cr.spec
                .server
                .custom_che_properties
                .get("CHE_LIMITS_USER_WORKSPACES_COUNT")
                .map(String::as_str),
            Some("10")
        );
        assert!(cr.spec.auth.open_shift_oauth);
        assert_eq!(cr.spec.storage.pvc_claim_size.as_deref(), Some("2Gi"));
        assert!(cr.spec.metrics.enable);
        let plugins = cr.spec.components.plugin_registry.as_ref().unwrap();
        assert!(plugins.external);
        assert!(cr.spec.validate().is_ok());
    }

    #[test]
    fn status_serializes_url_fields_with_upper_case_url() {
        let status = CheClusterStatus {
            che_url: Some("https://che.example.org".to_string()),
            keycloak_url: Some("https://keycloak.example.org".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["cheURL"], "https://che.example.org");
        assert_eq!(value["keycloakURL"], "https://keycloak.example.org");
    }
}
