//! ReconcileContext: everything one tick needs.
//!
//! Built by the root controller per event: the CR as read, the client
//! facade, the immutable defaults, the detected infrastructure flavor and
//! the resolved proxy settings. Sub-reconcilers receive it by reference and
//! never mutate it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use kube::ResourceExt;

use crate::client::{cluster_proxy_resource, ClusterClient};
use crate::crd::CheCluster;
use crate::defaults::DefaultsConfig;
use crate::Error;

/// The infrastructure the operator runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InfraFlavor {
    /// Plain Kubernetes
    Kubernetes,
    /// OpenShift 3.x
    OpenShiftV3,
    /// OpenShift 4.x
    OpenShiftV4,
}

impl InfraFlavor {
    /// True on either OpenShift generation
    pub fn is_openshift(&self) -> bool {
        matches!(self, InfraFlavor::OpenShiftV3 | InfraFlavor::OpenShiftV4)
    }

    /// Detect the flavor through discovery probes.
    ///
    /// Routes present means OpenShift; the cluster `Proxy` config API only
    /// exists on OpenShift 4.
    pub async fn detect(client: &ClusterClient) -> Result<Self, Error> {
        if !client.supports_kind("route.openshift.io", "Route").await? {
            return Ok(InfraFlavor::Kubernetes);
        }
        if client.supports_kind("config.openshift.io", "Proxy").await? {
            Ok(InfraFlavor::OpenShiftV4)
        } else {
            Ok(InfraFlavor::OpenShiftV3)
        }
    }
}

/// Resolved proxy settings threaded into deployments and server properties
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    /// HTTP proxy URL (scheme, host, port)
    pub http_proxy: Option<String>,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Comma-separated hosts reached directly
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// True when any proxy is configured
    pub fn is_configured(&self) -> bool {
        self.http_proxy.is_some() || self.https_proxy.is_some()
    }

    /// Merge CR-level proxy fields over cluster-wide settings.
    ///
    /// CR fields win; `no_proxy` is the union of both lists. The CR uses
    /// `|` separators, the merged result uses commas.
    pub fn merge(cluster: ProxyConfig, cr: &CheCluster) -> ProxyConfig {
        let server = &cr.spec.server;
        let cr_proxy = server.proxy_url.as_ref().map(|url| {
            match server.proxy_port.as_deref() {
                Some(port) if !port.is_empty() => format!("{url}:{port}"),
                _ => url.clone(),
            }
        });

        let mut no_proxy_parts: Vec<String> = cluster
            .no_proxy
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if let Some(hosts) = &server.non_proxy_hosts {
            for host in hosts.split('|').map(str::trim).filter(|s| !s.is_empty()) {
                if !no_proxy_parts.iter().any(|p| p == host) {
                    no_proxy_parts.push(host.to_string());
                }
            }
        }

        ProxyConfig {
            http_proxy: cr_proxy.clone().or(cluster.http_proxy),
            https_proxy: cr_proxy.or(cluster.https_proxy),
            no_proxy: if no_proxy_parts.is_empty() {
                None
            } else {
                Some(no_proxy_parts.join(","))
            },
        }
    }

    /// Read the cluster-wide proxy settings (OpenShift 4 `Proxy/cluster`)
    pub async fn from_cluster(client: &ClusterClient) -> Result<ProxyConfig, Error> {
        let resource = cluster_proxy_resource();
        let Some(proxy) = client.get_dynamic(&resource, None, "cluster").await? else {
            return Ok(ProxyConfig::default());
        };
        Ok(parse_cluster_proxy(&proxy))
    }
}

fn parse_cluster_proxy(proxy: &DynamicObject) -> ProxyConfig {
    let field = |name: &str| {
        proxy
            .data
            .pointer(&format!("/status/{name}"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    ProxyConfig {
        http_proxy: field("httpProxy"),
        https_proxy: field("httpsProxy"),
        no_proxy: field("noProxy"),
    }
}

/// Context carried through one reconcile tick
#[derive(Clone)]
pub struct ReconcileContext {
    /// Client facade
    pub client: ClusterClient,
    /// The CR as read at the start of the tick
    pub cr: CheCluster,
    /// Namespace the CR (and every namespaced child) lives in
    pub namespace: String,
    /// Immutable startup defaults
    pub defaults: DefaultsConfig,
    /// Detected infrastructure flavor
    pub infra: InfraFlavor,
    /// Resolved proxy settings
    pub proxy: ProxyConfig,
}

impl ReconcileContext {
    /// Effective flavor identifier
    pub fn flavor(&self) -> &str {
        self.cr.spec.flavor(&self.defaults.flavor)
    }

    /// Owner reference pointing at the root CR, `controller: true`
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "org.eclipse.che/v1".to_string(),
            kind: "CheCluster".to_string(),
            name: self.cr.name_any(),
            uid: self.cr.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// True on either OpenShift generation
    pub fn is_openshift(&self) -> bool {
        self.infra.is_openshift()
    }

    /// Name of the managed TLS secret
    pub fn tls_secret_name(&self) -> String {
        self.cr
            .spec
            .k8s
            .tls_secret_name
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "che-tls".to_string())
    }

    /// Public host of the server: spec override or `<flavor>-<ns>.<domain>`
    pub fn che_host(&self) -> Option<String> {
        if let Some(host) = &self.cr.spec.server.che_host {
            if !host.is_empty() {
                return Some(host.clone());
            }
        }
        self.cr
            .spec
            .k8s
            .ingress_domain
            .as_ref()
            .map(|domain| format!("{}-{}.{}", self.flavor(), self.namespace, domain))
    }

    /// Scheme matching the TLS toggle
    pub fn scheme(&self) -> &'static str {
        if self.cr.spec.server.tls_support {
            "https"
        } else {
            "http"
        }
    }

    /// Public URL of the server
    pub fn che_url(&self) -> Option<String> {
        self.che_host().map(|host| format!("{}://{host}", self.scheme()))
    }

    /// Gateway workload name
    pub fn gateway_name(&self) -> String {
        format!("{}-gateway", self.flavor())
    }

    /// Finalizer owned by the cluster RBAC reconciler
    pub fn cluster_rbac_finalizer(&self) -> String {
        format!("{}.crb.finalizers.che.eclipse.org", self.cr.name_any())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flavor_detection_requires_routes_for_openshift() {
        assert!(!InfraFlavor::Kubernetes.is_openshift());
        assert!(InfraFlavor::OpenShiftV3.is_openshift());
        assert!(InfraFlavor::OpenShiftV4.is_openshift());
    }

    #[test]
    fn cr_proxy_fields_win_over_cluster_proxy() {
        let cluster = ProxyConfig {
            http_proxy: Some("http://cluster-proxy:3128".to_string()),
            https_proxy: Some("http://cluster-proxy:3128".to_string()),
            no_proxy: Some(".cluster.local,.svc".to_string()),
        };
        let mut cr = CheCluster::new("eclipse-che", Default::default());
        cr.spec.server.proxy_url = Some("http://cr-proxy".to_string());
        cr.spec.server.proxy_port = Some("8888".to_string());
        cr.spec.server.non_proxy_hosts = Some("localhost|127.0.0.1|.svc".to_string());

        let merged = ProxyConfig::merge(cluster, &cr);
        assert_eq!(merged.http_proxy.as_deref(), Some("http://cr-proxy:8888"));
        assert_eq!(merged.https_proxy.as_deref(), Some("http://cr-proxy:8888"));
        // union, deduplicated, comma-separated
        assert_eq!(
            merged.no_proxy.as_deref(),
            Some(".cluster.local,.svc,localhost,127.0.0.1")
        );
    }

    #[test]
    fn empty_merge_is_unconfigured() {
        let cr = CheCluster::new("eclipse-che", Default::default());
        let merged = ProxyConfig::merge(ProxyConfig::default(), &cr);
        assert!(!merged.is_configured());
        assert!(merged.no_proxy.is_none());
    }

    #[test]
    fn cluster_proxy_parses_status_fields() {
        let obj = DynamicObject {
            types: None,
            metadata: Default::default(),
            data: json!({
                "status": {
                    "httpProxy": "http://proxy:3128",
                    "httpsProxy": "",
                    "noProxy": ".cluster.local"
                }
            }),
        };
        let cfg = parse_cluster_proxy(&obj);
        assert_eq!(cfg.http_proxy.as_deref(), Some("http://proxy:3128"));
        // empty strings are treated as unset
        assert!(cfg.https_proxy.is_none());
        assert_eq!(cfg.no_proxy.as_deref(), Some(".cluster.local"));
    }
}
