//! Status subresource writer.
//!
//! Status is modeled as a tagged report and only rendered into the CR's
//! string fields at write time. Writes compare against the status the tick
//! started from and are skipped when nothing would change, so a healthy
//! steady state produces no API traffic.

use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::crd::{CheCluster, CheClusterStatus};
use crate::Error;

/// Reason string surfaced while any reconciler is failing
pub const REASON_INSTALL_OR_UPDATE_FAILED: &str = "InstallOrUpdateFailed";

/// Outcome of a tick as far as status is concerned
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusReport {
    /// Everything converged
    Ok,
    /// A reconciler failed; rendered as `InstallOrUpdateFailed`
    Failed {
        /// Identifier of the failing reconciler
        reconciler: String,
        /// Failure cause
        cause: String,
    },
    /// A transient wait is in progress; reason/message untouched
    Transient {
        /// What the operator is waiting on
        cause: String,
    },
}

impl StatusReport {
    /// Render into `(reason, message)` as stored on the CR.
    ///
    /// `None` means "leave the current value alone".
    fn render(&self) -> Option<(Option<String>, Option<String>)> {
        match self {
            StatusReport::Ok => Some((None, None)),
            StatusReport::Failed { reconciler, cause } => Some((
                Some(REASON_INSTALL_OR_UPDATE_FAILED.to_string()),
                Some(format!("{reconciler}: {cause}")),
            )),
            StatusReport::Transient { .. } => None,
        }
    }
}

/// Writes reason/message and known URLs to the CR status subresource
pub struct StatusWriter {
    client: ClusterClient,
    namespace: String,
}

impl StatusWriter {
    /// Writer for CRs in `namespace`
    pub fn new(client: ClusterClient, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api(&self) -> Api<CheCluster> {
        Api::namespaced(self.client.kube().clone(), &self.namespace)
    }

    /// Write the report; collapses the write when nothing changes
    pub async fn write(&self, cr: &CheCluster, report: &StatusReport) -> Result<(), Error> {
        let Some((reason, message)) = report.render() else {
            return Ok(());
        };
        let current = cr.status.clone().unwrap_or_default();
        if current.reason == reason && current.message == message {
            debug!(cr = %cr.name_any(), "status unchanged, skipping write");
            return Ok(());
        }

        let patch = json!({"status": {
            "reason": reason,
            "message": message,
        }});
        self.api()
            .patch_status(&cr.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(cr = %cr.name_any(), reason = ?report, "status written");
        Ok(())
    }

    /// Write known URL fields; collapses the write when nothing changes
    pub async fn write_urls(
        &self,
        cr: &CheCluster,
        che_url: Option<&str>,
        keycloak_url: Option<&str>,
        devfile_registry_url: Option<&str>,
        plugin_registry_url: Option<&str>,
        version: &str,
        available: bool,
    ) -> Result<(), Error> {
        let current = cr.status.clone().unwrap_or_default();
        let desired = CheClusterStatus {
            che_url: che_url.map(String::from).or(current.che_url.clone()),
            keycloak_url: keycloak_url.map(String::from).or(current.keycloak_url.clone()),
            devfile_registry_url: devfile_registry_url
                .map(String::from)
                .or(current.devfile_registry_url.clone()),
            plugin_registry_url: plugin_registry_url
                .map(String::from)
                .or(current.plugin_registry_url.clone()),
            che_version: Some(version.to_string()),
            che_cluster_running: Some(
                if available { "Available" } else { "Unavailable" }.to_string(),
            ),
            ..current.clone()
        };
        if desired == current {
            return Ok(());
        }

        let patch = json!({"status": {
            "cheURL": desired.che_url,
            "keycloakURL": desired.keycloak_url,
            "devfileRegistryURL": desired.devfile_registry_url,
            "pluginRegistryURL": desired.plugin_registry_url,
            "cheVersion": desired.che_version,
            "cheClusterRunning": desired.che_cluster_running,
        }});
        self.api()
            .patch_status(&cr.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_report_clears_reason_and_message() {
        assert_eq!(StatusReport::Ok.render(), Some((None, None)));
    }

    #[test]
    fn failed_report_renders_reconciler_and_cause() {
        let report = StatusReport::Failed {
            reconciler: "TlsSecretReconciler".to_string(),
            cause: "job failed after 3 attempts".to_string(),
        };
        let (reason, message) = report.render().unwrap();
        assert_eq!(reason.as_deref(), Some("InstallOrUpdateFailed"));
        assert_eq!(
            message.as_deref(),
            Some("TlsSecretReconciler: job failed after 3 attempts")
        );
    }

    #[test]
    fn transient_report_leaves_status_alone() {
        let report = StatusReport::Transient {
            cause: "waiting for route host".to_string(),
        };
        assert!(report.render().is_none());
    }
}
