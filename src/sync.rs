//! Object sync primitive: converge one desired object to the cluster.
//!
//! Create if absent, update if semantically different, delete-and-recreate
//! for kinds whose API servers reject updates to core fields. Comparison is
//! a structural subset diff under a [`DiffPolicy`]: fields the server
//! assigns or defaults never count as drift, user-added labels and
//! annotations are preserved, and quantities compare semantically
//! (`1Gi == 1024Mi`).

use std::fmt::Debug;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::NamespaceResourceScope;
use kube::api::DynamicObject;
use kube::core::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::error::{classify, is_immutable_field_error, ApiErrorKind};
use crate::{Error, ANNOTATION_MANAGED_DIGEST};

/// How drift on a kind is repaired
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// In-place update carrying the read resourceVersion
    Update,
    /// Delete and recreate: the kind has immutable sub-fields
    Replace,
}

/// Per-kind sync policy
#[derive(Clone, Copy, Debug)]
pub struct KindPolicy {
    /// Update or replace on drift
    pub strategy: UpdateStrategy,
    /// The kind has no namespace
    pub cluster_scoped: bool,
    /// The kind may carry an owner reference to the root CR
    pub owner_ref_eligible: bool,
}

/// Central registry of per-kind policies.
///
/// The replace-set is fixed: `Service`, `Ingress` and `Route` reject updates
/// to core fields. Cluster-scoped kinds cannot carry an owner reference and
/// are cleaned up through finalizers instead.
pub fn kind_policy(kind: &str) -> KindPolicy {
    match kind {
        "Service" | "Ingress" | "Route" => KindPolicy {
            strategy: UpdateStrategy::Replace,
            cluster_scoped: false,
            owner_ref_eligible: true,
        },
        "ClusterRole" | "ClusterRoleBinding" | "OAuthClient" | "ConsoleLink" => KindPolicy {
            strategy: UpdateStrategy::Update,
            cluster_scoped: true,
            owner_ref_eligible: false,
        },
        _ => KindPolicy {
            strategy: UpdateStrategy::Update,
            cluster_scoped: false,
            owner_ref_eligible: true,
        },
    }
}

/// Fields ignored when comparing actual against desired.
///
/// Paths are dotted, `*` matches any array index or map key
/// (`rules.*.resourceNames`). Metadata and status are always handled
/// separately and never participate in the structural diff.
#[derive(Clone, Debug, Default)]
pub struct DiffPolicy {
    ignored: Vec<String>,
}

impl DiffPolicy {
    /// Policy with no extra ignored paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore an additional path during comparison
    pub fn ignore(mut self, path: &str) -> Self {
        self.ignored.push(path.to_string());
        self
    }
}

/// Result of converging one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Actual already matched desired
    Unchanged,
    /// Object was absent and has been created
    Created,
    /// Object drifted and was updated in place
    Updated,
    /// Object drifted and was deleted and recreated
    Replaced,
    /// A write conflicted with a concurrent writer; requeue
    Conflict,
}

impl SyncOutcome {
    /// True when the cluster was mutated
    pub fn changed(&self) -> bool {
        !matches!(self, SyncOutcome::Unchanged)
    }

    /// True when the write lost a race and the tick must run again
    pub fn needs_requeue(&self) -> bool {
        matches!(self, SyncOutcome::Conflict)
    }
}

/// Converge a namespaced object to its desired state
pub async fn sync_object<K>(
    client: &ClusterClient,
    namespace: &str,
    mut desired: K,
    owner: Option<&OwnerReference>,
    policy: &DiffPolicy,
) -> Result<SyncOutcome, Error>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug,
{
    let kind = K::kind(&());
    let name = desired.name_any();
    let kp = kind_policy(&kind);

    if kp.owner_ref_eligible {
        if let Some(owner) = owner {
            set_controller_owner(desired.meta_mut(), owner);
        }
    }

    let actual: Option<K> = client.get_cached(namespace, &name).await?;
    let actual = match actual {
        Some(actual) => actual,
        None => match client.create(namespace, &desired).await {
            Ok(_) => {
                info!(kind = %kind, name = %name, "created");
                return Ok(SyncOutcome::Created);
            }
            Err(Error::Kube(e)) if classify(&e) == ApiErrorKind::AlreadyExists => {
                // Lost a create race; the direct read observes the winner.
                client
                    .get::<K>(namespace, &name)
                    .await?
                    .ok_or_else(|| Error::Kube(e))?
            }
            Err(e) => return Err(e),
        },
    };

    let desired_v = serde_json::to_value(&desired)
        .map_err(|e| Error::serialization(format!("{kind}/{name} encode: {e}")))?;
    let actual_v = serde_json::to_value(&actual)
        .map_err(|e| Error::serialization(format!("{kind}/{name} encode: {e}")))?;

    if !differs(&actual_v, &desired_v, policy) {
        return Ok(SyncOutcome::Unchanged);
    }
    debug!(kind = %kind, name = %name, "drift detected");

    if kp.strategy == UpdateStrategy::Replace {
        client.delete::<K>(namespace, &name).await?;
        desired.meta_mut().resource_version = None;
        client.create(namespace, &desired).await?;
        info!(kind = %kind, name = %name, "replaced");
        return Ok(SyncOutcome::Replaced);
    }

    merge_foreign_metadata(desired.meta_mut(), actual.meta());
    desired.meta_mut().resource_version = actual.resource_version();

    match client.update(namespace, &name, &desired).await {
        Ok(_) => {
            info!(kind = %kind, name = %name, "updated");
            Ok(SyncOutcome::Updated)
        }
        Err(Error::Kube(e)) if classify(&e) == ApiErrorKind::Conflict => {
            debug!(kind = %kind, name = %name, "update conflict, requeueing");
            Ok(SyncOutcome::Conflict)
        }
        Err(Error::Kube(e)) if is_immutable_field_error(&e) => {
            // The kind was not in the replace-set but the server says this
            // field cannot change. Recreate, then surface the original error
            // so the caller observes the write on the next tick.
            client.delete::<K>(namespace, &name).await?;
            desired.meta_mut().resource_version = None;
            client.create(namespace, &desired).await?;
            Err(Error::Kube(e))
        }
        Err(e) => Err(e),
    }
}

/// Converge a cluster-scoped object.
///
/// Cluster-scoped kinds never carry owner references; their diffs are
/// restricted to operator-owned fields and writes carry the read
/// resourceVersion so external modifications surface as conflicts.
pub async fn sync_cluster_object<K>(
    client: &ClusterClient,
    mut desired: K,
    policy: &DiffPolicy,
) -> Result<SyncOutcome, Error>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&());
    let name = desired.name_any();

    let actual = match client.get_cluster::<K>(&name).await? {
        Some(actual) => actual,
        None => match client.create_cluster(&desired).await {
            Ok(_) => {
                info!(kind = %kind, name = %name, "created");
                return Ok(SyncOutcome::Created);
            }
            Err(Error::Kube(e)) if classify(&e) == ApiErrorKind::AlreadyExists => client
                .get_cluster::<K>(&name)
                .await?
                .ok_or_else(|| Error::Kube(e))?,
            Err(e) => return Err(e),
        },
    };

    let desired_v = serde_json::to_value(&desired)
        .map_err(|e| Error::serialization(format!("{kind}/{name} encode: {e}")))?;
    let actual_v = serde_json::to_value(&actual)
        .map_err(|e| Error::serialization(format!("{kind}/{name} encode: {e}")))?;

    if !differs(&actual_v, &desired_v, policy) {
        return Ok(SyncOutcome::Unchanged);
    }
    debug!(kind = %kind, name = %name, "drift detected");

    merge_foreign_metadata(desired.meta_mut(), actual.meta());
    desired.meta_mut().resource_version = actual.resource_version();

    match client.update_cluster(&name, &desired).await {
        Ok(_) => {
            info!(kind = %kind, name = %name, "updated");
            Ok(SyncOutcome::Updated)
        }
        Err(Error::Kube(e)) if classify(&e) == ApiErrorKind::Conflict => Ok(SyncOutcome::Conflict),
        Err(e) => Err(e),
    }
}

/// Converge a dynamic (discovered-kind) object; `namespace: None` for
/// cluster-scoped kinds
pub async fn sync_dynamic(
    client: &ClusterClient,
    resource: &ApiResource,
    namespace: Option<&str>,
    mut desired: DynamicObject,
    owner: Option<&OwnerReference>,
    policy: &DiffPolicy,
) -> Result<SyncOutcome, Error> {
    let kind = resource.kind.clone();
    let name = desired.name_any();
    let kp = kind_policy(&kind);

    if kp.owner_ref_eligible {
        if let Some(owner) = owner {
            set_controller_owner(&mut desired.metadata, owner);
        }
    }

    let actual = match client.get_dynamic(resource, namespace, &name).await? {
        Some(actual) => actual,
        None => match client.create_dynamic(resource, namespace, &desired).await {
            Ok(_) => {
                info!(kind = %kind, name = %name, "created");
                return Ok(SyncOutcome::Created);
            }
            Err(Error::Kube(e)) if classify(&e) == ApiErrorKind::AlreadyExists => client
                .get_dynamic(resource, namespace, &name)
                .await?
                .ok_or_else(|| Error::Kube(e))?,
            Err(e) => return Err(e),
        },
    };

    let desired_v = serde_json::to_value(&desired)
        .map_err(|e| Error::serialization(format!("{kind}/{name} encode: {e}")))?;
    let actual_v = serde_json::to_value(&actual)
        .map_err(|e| Error::serialization(format!("{kind}/{name} encode: {e}")))?;

    if !differs(&actual_v, &desired_v, policy) {
        return Ok(SyncOutcome::Unchanged);
    }

    if kp.strategy == UpdateStrategy::Replace {
        client.delete_dynamic(resource, namespace, &name).await?;
        desired.metadata.resource_version = None;
        client.create_dynamic(resource, namespace, &desired).await?;
        info!(kind = %kind, name = %name, "replaced");
        return Ok(SyncOutcome::Replaced);
    }

    merge_foreign_metadata(&mut desired.metadata, &actual.metadata);
    desired.metadata.resource_version = actual.metadata.resource_version.clone();

    match client
        .update_dynamic(resource, namespace, &name, &desired)
        .await
    {
        Ok(_) => {
            info!(kind = %kind, name = %name, "updated");
            Ok(SyncOutcome::Updated)
        }
        Err(Error::Kube(e)) if classify(&e) == ApiErrorKind::Conflict => Ok(SyncOutcome::Conflict),
        Err(e) => Err(e),
    }
}

/// Point exactly one controller owner reference at the root CR.
///
/// Any stale reference with the same apiVersion/kind is dropped first so
/// repeated reconciles never accumulate references.
pub fn set_controller_owner(meta: &mut ObjectMeta, owner: &OwnerReference) {
    let mut refs = meta.owner_references.take().unwrap_or_default();
    refs.retain(|r| !(r.api_version == owner.api_version && r.kind == owner.kind));
    refs.push(OwnerReference {
        controller: Some(true),
        block_owner_deletion: Some(true),
        ..owner.clone()
    });
    meta.owner_references = Some(refs);
}

/// Carry user-added labels and annotations from actual onto desired so an
/// update never erases foreign keys; operator-owned keys win on collision.
fn merge_foreign_metadata(desired: &mut ObjectMeta, actual: &ObjectMeta) {
    if let Some(actual_labels) = &actual.labels {
        let mut merged = actual_labels.clone();
        if let Some(ours) = desired.labels.take() {
            merged.extend(ours);
        }
        desired.labels = Some(merged);
    }
    if let Some(actual_annotations) = &actual.annotations {
        let mut merged = actual_annotations.clone();
        if let Some(ours) = desired.annotations.take() {
            merged.extend(ours);
        }
        desired.annotations = Some(merged);
    }
}

/// True when actual drifted from desired under the diff policy.
///
/// The comparison is a subset check: every field desired sets must be
/// present and equal in actual. Fields only the server writes (assigned
/// IPs, defaulted pull policies, volume default modes, status, timestamps)
/// are absent from desired and therefore never drift. Metadata compares
/// specially: labels as subset, annotations by managed digest only.
pub fn differs(actual: &Value, desired: &Value, policy: &DiffPolicy) -> bool {
    let mut actual = actual.clone();
    let mut desired = desired.clone();

    for path in &policy.ignored {
        let segments: Vec<&str> = path.split('.').collect();
        prune(&mut actual, &segments);
        prune(&mut desired, &segments);
    }

    if metadata_differs(actual.get("metadata"), desired.get("metadata")) {
        return true;
    }

    // Everything outside metadata/status participates in the subset diff.
    let (Value::Object(actual_map), Value::Object(desired_map)) = (&actual, &desired) else {
        return actual != desired;
    };
    for (key, desired_value) in desired_map {
        if key == "metadata" || key == "status" {
            continue;
        }
        match actual_map.get(key) {
            Some(actual_value) => {
                if !subset_eq(desired_value, actual_value, false) {
                    return true;
                }
            }
            None => {
                if !desired_value.is_null() {
                    return true;
                }
            }
        }
    }
    false
}

fn metadata_differs(actual: Option<&Value>, desired: Option<&Value>) -> bool {
    let empty = Value::Object(serde_json::Map::new());
    let actual = actual.unwrap_or(&empty);
    let desired = desired.unwrap_or(&empty);

    // Labels: operator keys must be present with the right values.
    if let Some(Value::Object(desired_labels)) = desired.get("labels") {
        let actual_labels = actual.get("labels").and_then(Value::as_object);
        for (key, value) in desired_labels {
            if actual_labels.and_then(|m| m.get(key)) != Some(value) {
                return true;
            }
        }
    }

    // Annotations: only the managed digest is compared; everything else is
    // user territory.
    let desired_digest = desired
        .get("annotations")
        .and_then(|a| a.get(ANNOTATION_MANAGED_DIGEST));
    if let Some(desired_digest) = desired_digest {
        let actual_digest = actual
            .get("annotations")
            .and_then(|a| a.get(ANNOTATION_MANAGED_DIGEST));
        if actual_digest != Some(desired_digest) {
            return true;
        }
    }

    false
}

/// Subset equality: every field in `desired` exists and matches in `actual`.
///
/// `quantity_ctx` is set while descending below `requests`/`limits`/
/// `capacity` maps, where string leaves compare as Kubernetes quantities.
fn subset_eq(desired: &Value, actual: &Value, quantity_ctx: bool) -> bool {
    match (desired, actual) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(a)) => d.iter().all(|(key, dv)| {
            let ctx = matches!(key.as_str(), "requests" | "limits" | "capacity");
            match a.get(key) {
                Some(av) => subset_eq(dv, av, quantity_ctx || ctx),
                None => dv.is_null(),
            }
        }),
        (Value::Array(d), Value::Array(a)) => {
            d.len() == a.len()
                && d.iter()
                    .zip(a.iter())
                    .all(|(dv, av)| subset_eq(dv, av, quantity_ctx))
        }
        (Value::String(d), Value::String(a)) if quantity_ctx => match (parse_quantity(d), parse_quantity(a)) {
            (Some(dq), Some(aq)) => dq == aq,
            _ => d == a,
        },
        _ => desired == actual,
    }
}

/// Remove a dotted path (with `*` wildcards) from a JSON tree
fn prune(value: &mut Value, path: &[&str]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    match value {
        Value::Object(map) => {
            if *head == "*" {
                for child in map.values_mut() {
                    if rest.is_empty() {
                        *child = Value::Null;
                    } else {
                        prune(child, rest);
                    }
                }
            } else if rest.is_empty() {
                map.remove(*head);
            } else if let Some(child) = map.get_mut(*head) {
                prune(child, rest);
            }
        }
        Value::Array(items) if *head == "*" => {
            for child in items.iter_mut() {
                if rest.is_empty() {
                    *child = Value::Null;
                } else {
                    prune(child, rest);
                }
            }
        }
        _ => {}
    }
}

/// Parse a Kubernetes quantity into milli-units for semantic comparison.
///
/// `1Gi == 1024Mi`, `500m == 0.5`. Returns `None` for strings that are not
/// quantities.
pub fn parse_quantity(s: &str) -> Option<i128> {
    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1024.0 * 1024.0),
        ("Gi", 1024.0 * 1024.0 * 1024.0),
        ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (number, factor) = SUFFIXES
        .iter()
        .find_map(|(suffix, factor)| s.strip_suffix(suffix).map(|n| (n, *factor)))
        .unwrap_or((s, 1.0));

    let parsed: f64 = number.parse().ok()?;
    Some((parsed * factor * 1000.0).round() as i128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_set_is_service_ingress_route() {
        for kind in ["Service", "Ingress", "Route"] {
            assert_eq!(kind_policy(kind).strategy, UpdateStrategy::Replace, "{kind}");
        }
        for kind in ["Deployment", "ConfigMap", "Secret", "PersistentVolumeClaim"] {
            assert_eq!(kind_policy(kind).strategy, UpdateStrategy::Update, "{kind}");
        }
    }

    #[test]
    fn cluster_scoped_kinds_are_not_owner_ref_eligible() {
        for kind in ["ClusterRole", "ClusterRoleBinding", "OAuthClient", "ConsoleLink"] {
            let policy = kind_policy(kind);
            assert!(policy.cluster_scoped, "{kind}");
            assert!(!policy.owner_ref_eligible, "{kind}");
        }
        assert!(kind_policy("ConfigMap").owner_ref_eligible);
    }

    #[test]
    fn quantities_compare_semantically() {
        assert_eq!(parse_quantity("1Gi"), parse_quantity("1024Mi"));
        assert_eq!(parse_quantity("0.5"), parse_quantity("500m"));
        assert_eq!(parse_quantity("1"), parse_quantity("1000m"));
        assert_ne!(parse_quantity("1Gi"), parse_quantity("1G"));
        assert_eq!(parse_quantity("not-a-quantity"), None);
    }

    #[test]
    fn server_defaulted_fields_do_not_drift() {
        // desired omits clusterIP and nodePort; the live object has them
        let desired = json!({
            "metadata": {"name": "che-host", "namespace": "che"},
            "spec": {"ports": [{"name": "http", "port": 8080}]}
        });
        let actual = json!({
            "metadata": {"name": "che-host", "namespace": "che",
                          "creationTimestamp": "2021-01-01T00:00:00Z",
                          "resourceVersion": "12345"},
            "spec": {"clusterIP": "10.0.0.1",
                      "ports": [{"name": "http", "port": 8080, "nodePort": 30123}]},
            "status": {"loadBalancer": {}}
        });
        assert!(!differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn changed_port_drifts() {
        let desired = json!({
            "metadata": {"name": "che-host"},
            "spec": {"ports": [{"name": "http", "port": 8080}]}
        });
        let actual = json!({
            "metadata": {"name": "che-host"},
            "spec": {"ports": [{"name": "http", "port": 9090}]}
        });
        assert!(differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn added_port_drifts() {
        // metrics port toggled on: one port live, two desired
        let desired = json!({
            "metadata": {"name": "che-host"},
            "spec": {"ports": [{"name": "http", "port": 8080},
                                {"name": "metrics", "port": 8087}]}
        });
        let actual = json!({
            "metadata": {"name": "che-host"},
            "spec": {"ports": [{"name": "http", "port": 8080}]}
        });
        assert!(differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn quantity_in_requests_compares_semantically() {
        let desired = json!({
            "metadata": {"name": "postgres-data"},
            "spec": {"resources": {"requests": {"storage": "1Gi"}}}
        });
        let actual = json!({
            "metadata": {"name": "postgres-data"},
            "spec": {"resources": {"requests": {"storage": "1024Mi"}}}
        });
        assert!(!differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn user_annotations_are_invisible_to_the_diff() {
        let desired = json!({
            "metadata": {"name": "che", "annotations":
                {"che.eclipse.org/managed-annotations-digest": "abc"}},
            "spec": {}
        });
        let actual = json!({
            "metadata": {"name": "che", "annotations": {
                "che.eclipse.org/managed-annotations-digest": "abc",
                "user-added": "kept"
            }},
            "spec": {}
        });
        assert!(!differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn digest_mismatch_drifts() {
        let desired = json!({
            "metadata": {"name": "che", "annotations":
                {"che.eclipse.org/managed-annotations-digest": "new"}},
            "spec": {}
        });
        let actual = json!({
            "metadata": {"name": "che", "annotations":
                {"che.eclipse.org/managed-annotations-digest": "old"}},
            "spec": {}
        });
        assert!(differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn missing_operator_label_drifts() {
        let desired = json!({
            "metadata": {"name": "che", "labels": {"app": "che"}},
            "spec": {}
        });
        let actual = json!({
            "metadata": {"name": "che", "labels": {"app": "other"}},
            "spec": {}
        });
        assert!(differs(&actual, &desired, &DiffPolicy::new()));
    }

    #[test]
    fn ignored_paths_suppress_drift() {
        let policy = DiffPolicy::new().ignore("rules.*.resourceNames");
        let desired = json!({
            "metadata": {"name": "che"},
            "rules": [{"apiGroups": [""], "resources": ["pods"],
                        "verbs": ["get"], "resourceNames": ["a"]}]
        });
        let actual = json!({
            "metadata": {"name": "che"},
            "rules": [{"apiGroups": [""], "resources": ["pods"],
                        "verbs": ["get"], "resourceNames": ["b"]}]
        });
        assert!(!differs(&actual, &desired, &policy));
    }

    #[test]
    fn updates_preserve_foreign_labels_and_annotations() {
        let mut desired = ObjectMeta {
            labels: Some([("app".to_string(), "che".to_string())].into()),
            annotations: Some(
                [(ANNOTATION_MANAGED_DIGEST.to_string(), "new".to_string())].into(),
            ),
            ..Default::default()
        };
        let actual = ObjectMeta {
            labels: Some(
                [
                    ("app".to_string(), "stale".to_string()),
                    ("team".to_string(), "platform".to_string()),
                ]
                .into(),
            ),
            annotations: Some(
                [
                    (ANNOTATION_MANAGED_DIGEST.to_string(), "old".to_string()),
                    ("user-note".to_string(), "kept".to_string()),
                ]
                .into(),
            ),
            ..Default::default()
        };

        merge_foreign_metadata(&mut desired, &actual);

        let labels = desired.labels.unwrap();
        // operator keys win, foreign keys survive
        assert_eq!(labels.get("app").unwrap(), "che");
        assert_eq!(labels.get("team").unwrap(), "platform");

        let annotations = desired.annotations.unwrap();
        assert_eq!(annotations.get(ANNOTATION_MANAGED_DIGEST).unwrap(), "new");
        assert_eq!(annotations.get("user-note").unwrap(), "kept");
    }

    #[test]
    fn set_controller_owner_is_idempotent() {
        let owner = OwnerReference {
            api_version: "org.eclipse.che/v1".to_string(),
            kind: "CheCluster".to_string(),
            name: "eclipse-che".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        };
        let mut meta = ObjectMeta::default();
        set_controller_owner(&mut meta, &owner);
        set_controller_owner(&mut meta, &owner);

        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].controller, Some(true));
        assert_eq!(refs[0].name, "eclipse-che");
    }

    #[test]
    fn stale_owner_uid_is_replaced() {
        let old = OwnerReference {
            api_version: "org.eclipse.che/v1".to_string(),
            kind: "CheCluster".to_string(),
            name: "eclipse-che".to_string(),
            uid: "old-uid".to_string(),
            ..Default::default()
        };
        let new = OwnerReference {
            uid: "new-uid".to_string(),
            ..old.clone()
        };
        let mut meta = ObjectMeta::default();
        set_controller_owner(&mut meta, &old);
        set_controller_owner(&mut meta, &new);

        let refs = meta.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "new-uid");
    }
}
