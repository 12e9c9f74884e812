//! Operator defaults read once from the environment at startup.
//!
//! Image coordinates arrive through `RELATED_IMAGE_*` variables (with an
//! optional architecture-suffixed override), the flavor through `CHE_FLAVOR`.
//! The resulting [`DefaultsConfig`] is immutable and threaded through the
//! reconcile context; nothing writes to it after construction.

use crate::{Error, DEFAULT_CHE_FLAVOR};

/// Environment variable prefix for image defaults
const RELATED_IMAGE_PREFIX: &str = "RELATED_IMAGE_";

/// Immutable defaults constructed once at startup
#[derive(Clone, Debug)]
pub struct DefaultsConfig {
    /// Flavor identifier (`che` unless overridden)
    pub flavor: String,
    /// Version the operator installs, surfaced in the CR status
    pub che_version: String,
    /// Server image
    pub che_server_image: String,
    /// Postgres image
    pub postgres_image: String,
    /// Devfile registry image
    pub devfile_registry_image: String,
    /// Plugin registry image
    pub plugin_registry_image: String,
    /// Dashboard image
    pub dashboard_image: String,
    /// Image of the PVC preparation jobs
    pub pvc_jobs_image: String,
    /// Image of the one-shot TLS secret generation job
    pub tls_jobs_image: String,
    /// Gateway (reverse proxy) image
    pub gateway_image: String,
    /// Gateway config-watching sidecar image
    pub gateway_config_sidecar_image: String,
    /// Console link display name
    pub console_link_display_name: String,
    /// Console link section
    pub console_link_section: String,
    /// Console link icon image (data URL or location)
    pub console_link_image: String,
    /// Test mode: skip slow external probes
    pub test_mode: bool,
}

impl DefaultsConfig {
    /// Read defaults from the process environment.
    ///
    /// Missing required images are fatal; the caller exits non-zero.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read defaults through an arbitrary lookup (tests inject maps here)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let image = |name: &str| -> Result<String, Error> {
            related_image(&lookup, name)
                .ok_or_else(|| Error::config(format!("{RELATED_IMAGE_PREFIX}{name} is not set")))
        };

        Ok(Self {
            flavor: lookup("CHE_FLAVOR").unwrap_or_else(|| DEFAULT_CHE_FLAVOR.to_string()),
            che_version: lookup("CHE_VERSION").unwrap_or_else(|| "next".to_string()),
            che_server_image: image("che_server")?,
            postgres_image: image("postgres")?,
            devfile_registry_image: image("devfile_registry")?,
            plugin_registry_image: image("plugin_registry")?,
            dashboard_image: image("dashboard")?,
            pvc_jobs_image: image("pvc_jobs")?,
            tls_jobs_image: image("tls_secret_creation_job")?,
            gateway_image: image("gateway")?,
            gateway_config_sidecar_image: image("gateway_config_sidecar")?,
            console_link_display_name: lookup("CONSOLE_LINK_DISPLAY_NAME")
                .unwrap_or_else(|| "Eclipse Che".to_string()),
            console_link_section: lookup("CONSOLE_LINK_SECTION")
                .unwrap_or_else(|| "Red Hat Applications".to_string()),
            console_link_image: lookup("CONSOLE_LINK_IMAGE").unwrap_or_default(),
            test_mode: lookup("MOCK_TESTING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        })
    }

    /// Fixed defaults for unit tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::from_lookup(|name| {
            name.strip_prefix(RELATED_IMAGE_PREFIX)
                .map(|suffix| format!("quay.io/eclipse/{}:next", suffix.replace('_', "-")))
        })
        .expect("test defaults")
    }
}

/// Resolve `RELATED_IMAGE_<name>`, preferring an architecture-suffixed
/// variant (`RELATED_IMAGE_<name>_<arch>`) when one is defined.
fn related_image(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    let arch_specific = format!("{RELATED_IMAGE_PREFIX}{name}_{}", kubernetes_arch());
    lookup(&arch_specific).or_else(|| lookup(&format!("{RELATED_IMAGE_PREFIX}{name}")))
}

/// Map the compile-time architecture to the Kubernetes node architecture name
fn kubernetes_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other, // s390x and friends match already
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<String, String> {
        let images = [
            "che_server",
            "postgres",
            "devfile_registry",
            "plugin_registry",
            "dashboard",
            "pvc_jobs",
            "tls_secret_creation_job",
            "gateway",
            "gateway_config_sidecar",
        ];
        images
            .iter()
            .map(|name| {
                (
                    format!("RELATED_IMAGE_{name}"),
                    format!("quay.io/eclipse/{name}:7.30"),
                )
            })
            .collect()
    }

    #[test]
    fn reads_all_images_and_flavor_default() {
        let env = base_env();
        let cfg = DefaultsConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.flavor, "che");
        assert_eq!(cfg.che_server_image, "quay.io/eclipse/che_server:7.30");
        assert!(!cfg.test_mode);
    }

    #[test]
    fn missing_required_image_is_fatal() {
        let mut env = base_env();
        env.remove("RELATED_IMAGE_postgres");
        let err = DefaultsConfig::from_lookup(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("RELATED_IMAGE_postgres"));
    }

    #[test]
    fn architecture_suffixed_image_wins() {
        let mut env = base_env();
        env.insert(
            format!("RELATED_IMAGE_postgres_{}", kubernetes_arch()),
            "quay.io/eclipse/postgres:arch".to_string(),
        );
        let cfg = DefaultsConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.postgres_image, "quay.io/eclipse/postgres:arch");
    }

    #[test]
    fn flavor_override_applies() {
        let mut env = base_env();
        env.insert("CHE_FLAVOR".to_string(), "codeready".to_string());
        env.insert("MOCK_TESTING".to_string(), "true".to_string());
        let cfg = DefaultsConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(cfg.flavor, "codeready");
        assert!(cfg.test_mode);
    }
}
