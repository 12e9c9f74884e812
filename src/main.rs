//! Che operator - Kubernetes/OpenShift lifecycle management for the Che platform

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, CustomResourceExt};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use che_operator::client::{api_resource, CacheRegistry, ClusterClient};
use che_operator::controller::{error_policy, reconcile, Context};
use che_operator::crd::CheCluster;
use che_operator::defaults::DefaultsConfig;

/// Che operator - reconciles a CheCluster custom resource
#[derive(Parser, Debug)]
#[command(name = "che-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if cli.crd {
        let crd = serde_yaml::to_string(&CheCluster::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller().await
}

/// Install the CheCluster CRD with server-side apply.
///
/// The operator installs its own CRD on startup so the schema always
/// matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("che-operator").force();

    info!("installing CheCluster CRD...");
    crds.patch(
        "checlusters.org.eclipse.che",
        &params,
        &Patch::Apply(&CheCluster::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("failed to install CheCluster CRD: {e}"))?;
    Ok(())
}

/// Start informer-backed caches for the kinds the operator owns.
///
/// Cached reads tolerate staleness; anything that must observe its own
/// writes goes through the direct client instead.
fn spawn_caches(client: &Client, namespace: &str) -> Arc<CacheRegistry> {
    let registry = Arc::new(CacheRegistry::default());
    let watched = [
        ("v1", "ConfigMap", "configmaps"),
        ("v1", "Secret", "secrets"),
        ("v1", "Service", "services"),
        ("v1", "ServiceAccount", "serviceaccounts"),
        ("v1", "PersistentVolumeClaim", "persistentvolumeclaims"),
        ("apps/v1", "Deployment", "deployments"),
        ("batch/v1", "Job", "jobs"),
        ("rbac.authorization.k8s.io/v1", "Role", "roles"),
        ("rbac.authorization.k8s.io/v1", "RoleBinding", "rolebindings"),
        ("networking.k8s.io/v1", "Ingress", "ingresses"),
    ];
    for (api_version, kind, plural) in watched {
        registry.spawn_watch(client, api_resource(api_version, kind, plural), namespace);
    }
    registry
}

/// Grace period of the operator's own deployment, for shutdown sleep
async fn own_termination_grace(client: &Client, namespace: &str) -> Duration {
    use k8s_openapi::api::apps::v1::Deployment;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let seconds = match deployments.get_opt("che-operator").await {
        Ok(Some(deployment)) => deployment
            .spec
            .and_then(|s| s.template.spec)
            .and_then(|s| s.termination_grace_period_seconds)
            .unwrap_or(20),
        _ => 20,
    };
    Duration::from_secs(seconds as u64)
}

async fn run_controller() -> anyhow::Result<()> {
    info!("che operator starting...");

    let defaults = match DefaultsConfig::from_env() {
        Ok(defaults) => defaults,
        Err(e) => {
            // unparseable defaults are fatal
            eprintln!("CRITICAL: {e}");
            std::process::exit(1);
        }
    };

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create Kubernetes client: {e}"))?;

    ensure_crd_installed(&client).await?;

    let namespace = std::env::var("WATCH_NAMESPACE")
        .unwrap_or_else(|_| client.default_namespace().to_string());
    info!(namespace = %namespace, flavor = %defaults.flavor, "watching");

    let caches = spawn_caches(&client, &namespace);
    let cluster_client = ClusterClient::with_caches(client.clone(), caches);
    let ctx = Arc::new(Context::new(cluster_client, defaults));

    let clusters: Api<CheCluster> = Api::namespaced(client.clone(), &namespace);
    let grace = own_termination_grace(&client, &namespace).await;

    Controller::new(clusters, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(_) => {}
                Err(e) => warn!(error = ?e, "reconciliation error"),
            }
        })
        .await;

    // let in-flight finalizers complete before the pod goes away
    info!(grace = ?grace, "shutting down");
    tokio::time::sleep(grace).await;

    info!("che operator stopped");
    Ok(())
}
