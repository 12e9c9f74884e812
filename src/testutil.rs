//! Shared test fixtures.
//!
//! Builds a [`ReconcileContext`] around a tower mock service so pipeline
//! and builder logic can run without a cluster. Tests that exercise the
//! mock service itself hold onto the handle; everything else forgets it.

use crate::client::ClusterClient;
use crate::context::{InfraFlavor, ProxyConfig, ReconcileContext};
use crate::crd::{CheCluster, CheClusterSpec};
use crate::defaults::DefaultsConfig;

/// A kube client backed by a mock service that is never driven.
///
/// Suitable for code paths that carry a client but do not call it.
pub fn test_client() -> kube::Client {
    let (mock_service, handle) = tower_test::mock::pair::<
        http::Request<kube::client::Body>,
        http::Response<kube::client::Body>,
    >();
    std::mem::forget(handle);
    // kube::Client::new spawns a Buffer worker task, which requires a Tokio
    // runtime in context. Sync `#[test]` fixtures have none, so provide a
    // leaked runtime and enter it for the duration of construction.
    let rt = Box::leak(Box::new(
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("build test runtime"),
    ));
    let _guard = rt.enter();
    kube::Client::new(mock_service, "eclipse-che")
}

/// A CheCluster fixture named `eclipse-che` in namespace `eclipse-che`
pub fn test_cr() -> CheCluster {
    let mut cr = CheCluster::new("eclipse-che", CheClusterSpec::default());
    cr.metadata.namespace = Some("eclipse-che".to_string());
    cr.metadata.uid = Some("che-uid-1234".to_string());
    cr
}

/// A full context on plain Kubernetes with test defaults
pub fn test_context() -> ReconcileContext {
    ReconcileContext {
        client: ClusterClient::new(test_client()),
        cr: test_cr(),
        namespace: "eclipse-che".to_string(),
        defaults: DefaultsConfig::for_tests(),
        infra: InfraFlavor::Kubernetes,
        proxy: ProxyConfig::default(),
    }
}

/// A context on OpenShift 4
pub fn test_context_openshift() -> ReconcileContext {
    ReconcileContext {
        infra: InfraFlavor::OpenShiftV4,
        ..test_context()
    }
}
