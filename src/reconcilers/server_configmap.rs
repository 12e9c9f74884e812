//! Server config map reconciler.
//!
//! Renders the `CHE_*` property map the server consumes from the CR,
//! resolved context (infra flavor, proxy) and registry URLs. User-supplied
//! `customCheProperties` merge last and win over generated values.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::context::{InfraFlavor, ReconcileContext};
use crate::crd::ExposureStrategy;
use crate::labels::managed_labels;
use crate::reconcile::{Outcome, Reconciler};
use crate::reconcilers::converge;
use crate::sync::DiffPolicy;
use crate::{Error, COMPONENT_CHE};

/// Reconciles the server property config map
pub struct ServerConfigMapReconciler;

/// Identity provider flavor string the server passes to its OAuth plumbing
fn oauth_identity_provider(infra: InfraFlavor) -> &'static str {
    match infra {
        InfraFlavor::OpenShiftV3 => "openshift-v3",
        InfraFlavor::OpenShiftV4 => "openshift-v4",
        InfraFlavor::Kubernetes => "",
    }
}

/// The identity provider URL: external takes precedence, otherwise derived
/// from the exposure strategy
pub fn identity_provider_url(ctx: &ReconcileContext) -> Option<String> {
    let auth = &ctx.cr.spec.auth;
    if let Some(url) = &auth.identity_provider_url {
        if !url.is_empty() {
            return Some(url.trim_end_matches('/').to_string());
        }
    }
    match ctx.cr.spec.server.server_exposure_strategy {
        ExposureStrategy::SingleHost => ctx.che_url().map(|url| format!("{url}/auth")),
        ExposureStrategy::MultiHost => {
            let domain = ctx.cr.spec.k8s.ingress_domain.as_ref()?;
            Some(format!(
                "{}://keycloak-{}.{}/auth",
                ctx.scheme(),
                ctx.namespace,
                domain
            ))
        }
    }
}

/// Render the full property map
pub fn render_server_properties(ctx: &ReconcileContext) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    let spec = &ctx.cr.spec;
    let scheme = ctx.scheme();

    if let Some(host) = ctx.che_host() {
        let url = format!("{scheme}://{host}");
        props.insert("CHE_HOST".to_string(), host.clone());
        props.insert("CHE_API".to_string(), format!("{url}/api"));
        props.insert(
            "CHE_WEBSOCKET_ENDPOINT".to_string(),
            format!(
                "{}://{host}/api/websocket",
                if spec.server.tls_support { "wss" } else { "ws" }
            ),
        );
        props.insert(
            "CHE_INFRA_KUBERNETES_BOOTSTRAPPER_BINARY__URL".to_string(),
            format!("{url}/agent-binaries/linux_amd64/bootstrapper/bootstrapper"),
        );
    }

    props.insert(
        "CHE_INFRASTRUCTURE_ACTIVE".to_string(),
        if ctx.is_openshift() {
            "openshift".to_string()
        } else {
            "kubernetes".to_string()
        },
    );
    props.insert(
        "CHE_INFRA_KUBERNETES_TLS__ENABLED".to_string(),
        spec.server.tls_support.to_string(),
    );
    if spec.server.tls_support && !ctx.is_openshift() {
        props.insert(
            "CHE_INFRA_KUBERNETES_TLS__SECRET".to_string(),
            ctx.tls_secret_name(),
        );
    }
    props.insert(
        "CHE_METRICS_ENABLED".to_string(),
        ctx.cr.spec.metrics.enable.to_string(),
    );
    props.insert(
        "CHE_INFRA_KUBERNETES_SERVER__STRATEGY".to_string(),
        match spec.server.server_exposure_strategy {
            ExposureStrategy::MultiHost => "multi-host".to_string(),
            ExposureStrategy::SingleHost => "single-host".to_string(),
        },
    );
    if let Some(domain) = &spec.k8s.ingress_domain {
        props.insert(
            "CHE_INFRA_KUBERNETES_INGRESS_DOMAIN".to_string(),
            domain.clone(),
        );
    }

    // storage
    props.insert(
        "CHE_INFRA_KUBERNETES_PVC_STRATEGY".to_string(),
        serde_json::to_value(&spec.storage.pvc_strategy)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| "common".to_string()),
    );
    if let Some(size) = &spec.storage.pvc_claim_size {
        props.insert(
            "CHE_INFRA_KUBERNETES_PVC_QUANTITY".to_string(),
            size.clone(),
        );
    }

    // database
    let db = &spec.database;
    props.insert(
        "CHE_JDBC_URL".to_string(),
        format!(
            "jdbc:postgresql://{}:{}/{}",
            db.che_postgres_host.as_deref().unwrap_or("postgres"),
            db.che_postgres_port.as_deref().unwrap_or("5432"),
            db.che_postgres_db.as_deref().unwrap_or("dbche"),
        ),
    );

    // authentication
    if let Some(url) = identity_provider_url(ctx) {
        props.insert("CHE_KEYCLOAK_AUTH__SERVER__URL".to_string(), url);
    }
    if let Some(realm) = &spec.auth.identity_provider_realm {
        props.insert("CHE_KEYCLOAK_REALM".to_string(), realm.clone());
    }
    if let Some(client_id) = &spec.auth.identity_provider_client_id {
        props.insert("CHE_KEYCLOAK_CLIENT__ID".to_string(), client_id.clone());
    }
    if spec.auth.open_shift_oauth && ctx.is_openshift() {
        props.insert(
            "CHE_INFRA_OPENSHIFT_OAUTH__IDENTITY__PROVIDER".to_string(),
            oauth_identity_provider(ctx.infra).to_string(),
        );
    }
    props.insert(
        "CHE_API_INTERNAL".to_string(),
        format!(
            "http://{}.{}.svc:8080/api",
            crate::CHE_HOST_SERVICE,
            ctx.namespace
        ),
    );

    // proxy
    if let Some(http_proxy) = &ctx.proxy.http_proxy {
        props.insert("CHE_WORKSPACE_HTTP__PROXY".to_string(), http_proxy.clone());
    }
    if let Some(https_proxy) = &ctx.proxy.https_proxy {
        props.insert("CHE_WORKSPACE_HTTPS__PROXY".to_string(), https_proxy.clone());
    }
    if let Some(no_proxy) = &ctx.proxy.no_proxy {
        props.insert("CHE_WORKSPACE_NO__PROXY".to_string(), no_proxy.clone());
    }

    // user-supplied properties win
    for (key, value) in &spec.server.custom_che_properties {
        props.insert(key.clone(), value.clone());
    }

    props
}

/// Build the server config map (named after the flavor)
pub fn build_server_configmap(ctx: &ReconcileContext) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(ctx.flavor().to_string()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(managed_labels(ctx.flavor(), COMPONENT_CHE)),
            ..Default::default()
        },
        data: Some(render_server_properties(ctx)),
        ..Default::default()
    }
}

#[async_trait]
impl Reconciler for ServerConfigMapReconciler {
    fn id(&self) -> &'static str {
        "ServerConfigMapReconciler"
    }

    async fn reconcile(&self, ctx: &ReconcileContext) -> Result<Outcome, Error> {
        let cm = build_server_configmap(ctx);
        if let Some(requeue) = converge(ctx, cm, &DiffPolicy::new()).await? {
            return Ok(requeue);
        }
        Ok(Outcome::Done)
    }

    async fn finalize(&self, _ctx: &ReconcileContext) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InfraFlavor;
    use crate::testutil::{test_context, test_context_openshift};

    #[test]
    fn tls_host_renders_https_urls_and_v3_identity_provider() {
        let mut ctx = test_context_openshift();
        ctx.infra = InfraFlavor::OpenShiftV3;
        ctx.cr.spec.server.che_host = Some("myhostname.com".to_string());
        ctx.cr.spec.server.tls_support = true;
        ctx.cr.spec.auth.open_shift_oauth = true;

        let props = render_server_properties(&ctx);
        assert!(props["CHE_INFRA_KUBERNETES_BOOTSTRAPPER_BINARY__URL"].starts_with("https://"));
        assert_eq!(
            props["CHE_INFRA_OPENSHIFT_OAUTH__IDENTITY__PROVIDER"],
            "openshift-v3"
        );
    }

    #[test]
    fn openshift4_uses_v4_identity_provider() {
        let mut ctx = test_context_openshift();
        ctx.cr.spec.server.che_host = Some("myhostname.com".to_string());
        ctx.cr.spec.auth.open_shift_oauth = true;

        let props = render_server_properties(&ctx);
        assert_eq!(
            props["CHE_INFRA_OPENSHIFT_OAUTH__IDENTITY__PROVIDER"],
            "openshift-v4"
        );
        // no TLS: plain scheme
        assert!(props["CHE_INFRA_KUBERNETES_BOOTSTRAPPER_BINARY__URL"].starts_with("http://"));
    }

    #[test]
    fn kubernetes_renders_no_oauth_provider() {
        let mut ctx = test_context();
        ctx.cr.spec.auth.open_shift_oauth = true;
        let props = render_server_properties(&ctx);
        assert!(!props.contains_key("CHE_INFRA_OPENSHIFT_OAUTH__IDENTITY__PROVIDER"));
        assert_eq!(props["CHE_INFRASTRUCTURE_ACTIVE"], "kubernetes");
    }

    #[test]
    fn custom_properties_win_over_generated() {
        let mut ctx = test_context();
        ctx.cr.spec.server.che_host = Some("che.example.org".to_string());
        ctx.cr
            .spec
            .server
            .custom_che_properties
            .insert("CHE_API".to_string(), "https://override/api".to_string());

        let props = render_server_properties(&ctx);
        assert_eq!(props["CHE_API"], "https://override/api");
    }

    #[test]
    fn single_host_identity_provider_is_path_based() {
        let mut ctx = test_context();
        ctx.cr.spec.server.che_host = Some("che.example.org".to_string());
        ctx.cr.spec.server.server_exposure_strategy = ExposureStrategy::SingleHost;
        assert_eq!(
            identity_provider_url(&ctx).as_deref(),
            Some("http://che.example.org/auth")
        );
    }

    #[test]
    fn multi_host_identity_provider_gets_its_own_host() {
        let mut ctx = test_context();
        ctx.cr.spec.k8s.ingress_domain = Some("192.168.99.101.nip.io".to_string());
        assert_eq!(
            identity_provider_url(&ctx).as_deref(),
            Some("http://keycloak-eclipse-che.192.168.99.101.nip.io/auth")
        );
    }

    #[test]
    fn external_identity_provider_url_wins_and_is_normalized() {
        let mut ctx = test_context();
        ctx.cr.spec.auth.identity_provider_url = Some("https://sso.example.org/auth/".to_string());
        assert_eq!(
            identity_provider_url(&ctx).as_deref(),
            Some("https://sso.example.org/auth")
        );
    }

    #[test]
    fn proxy_settings_reach_workspace_properties() {
        let mut ctx = test_context();
        ctx.proxy.http_proxy = Some("http://proxy:3128".to_string());
        ctx.proxy.no_proxy = Some("localhost,.svc".to_string());
        let props = render_server_properties(&ctx);
        assert_eq!(props["CHE_WORKSPACE_HTTP__PROXY"], "http://proxy:3128");
        assert_eq!(props["CHE_WORKSPACE_NO__PROXY"], "localhost,.svc");
    }
}
