//! CheCluster Custom Resource Definition

mod cluster;
mod types;

pub use cluster::{CheCluster, CheClusterSpec, CheClusterStatus};
pub use types::{
    AuthSpec, ComponentsSpec, DatabaseSpec, ExposureStrategy, IngressCustomization, K8sSpec,
    MetricsSpec, PvcStrategy, RegistrySpec, ResourceOverride, ServerSpec, SingleHostExposureType,
    StorageSpec,
};
