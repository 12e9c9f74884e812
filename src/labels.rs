//! Canonical label set and managed-annotations digest.
//!
//! Every managed object carries the same five labels; deployment selectors
//! additionally keep the legacy `{app, component}` subset because selectors
//! are immutable on live objects. The managed-annotations digest is a stable
//! hash over operator-owned annotations so user-added annotations never cause
//! reconciliation thrash.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::{
    ANNOTATION_MANAGED_DIGEST, CHE_PART_OF, LABEL_COMPONENT, LABEL_INSTANCE, LABEL_MANAGED_BY,
    LABEL_NAME, LABEL_PART_OF, LEGACY_LABEL_APP, LEGACY_LABEL_COMPONENT,
};

/// Canonical label set for a managed object
pub fn managed_labels(flavor: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(flavor, component);
    labels.insert(LABEL_NAME.to_string(), flavor.to_string());
    labels.insert(LABEL_INSTANCE.to_string(), flavor.to_string());
    labels.insert(LABEL_PART_OF.to_string(), CHE_PART_OF.to_string());
    labels.insert(LABEL_COMPONENT.to_string(), component.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), format!("{flavor}-operator"));
    labels
}

/// Legacy selector subset (`app`, `component`).
///
/// Deployment selectors were created from these two keys before the
/// canonical set existed; selectors are immutable, so they stay.
pub fn selector_labels(flavor: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LEGACY_LABEL_APP.to_string(), flavor.to_string());
    labels.insert(LEGACY_LABEL_COMPONENT.to_string(), component.to_string());
    labels
}

/// Label selector string for list calls, `k=v,k=v` form
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Compute the stable digest over operator-owned annotations.
///
/// Input is every annotation the operator itself intends to write, excluding
/// the digest annotation. Keys are hashed in sorted order so the digest is
/// independent of construction order.
pub fn managed_annotations_digest<'a>(
    annotations: impl IntoIterator<Item = (&'a String, &'a String)>,
) -> String {
    let mut sorted: Vec<(&String, &String)> = annotations
        .into_iter()
        .filter(|(k, _)| k.as_str() != ANNOTATION_MANAGED_DIGEST)
        .collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for (key, value) in sorted {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex_encode(&hasher.finalize())
}

/// Stamp the digest annotation onto an annotation map in place
pub fn stamp_digest(annotations: &mut BTreeMap<String, String>) {
    let digest = managed_annotations_digest(annotations.iter());
    annotations.insert(ANNOTATION_MANAGED_DIGEST.to_string(), digest);
}

/// True when two equality-based label selectors can never match one object.
///
/// Disjoint means some key is present in both maps with different values;
/// the gateway refuses to start in that configuration because the sidecar
/// would never see the operator's route config maps.
pub fn selectors_disjoint(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> bool {
    a.iter()
        .any(|(k, v)| b.get(k).map(|other| other != v).unwrap_or(false))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_labels_carry_all_five_keys_plus_legacy() {
        let labels = managed_labels("che", "gateway");
        assert_eq!(labels.get(LABEL_NAME).unwrap(), "che");
        assert_eq!(labels.get(LABEL_INSTANCE).unwrap(), "che");
        assert_eq!(labels.get(LABEL_PART_OF).unwrap(), "che.eclipse.org");
        assert_eq!(labels.get(LABEL_COMPONENT).unwrap(), "gateway");
        assert_eq!(labels.get(LABEL_MANAGED_BY).unwrap(), "che-operator");
        // legacy selector subset rides along on the full set
        assert_eq!(labels.get("app").unwrap(), "che");
        assert_eq!(labels.get("component").unwrap(), "gateway");
    }

    #[test]
    fn selector_labels_are_only_the_legacy_subset() {
        let labels = selector_labels("che", "che");
        assert_eq!(labels.len(), 2);
        assert_eq!(selector_string(&labels), "app=che,component=che");
    }

    #[test]
    fn digest_is_stable_across_ordering() {
        let mut a = BTreeMap::new();
        a.insert("kubernetes.io/ingress.class".to_string(), "nginx".to_string());
        a.insert("nginx.ingress.kubernetes.io/ssl-redirect".to_string(), "true".to_string());

        let mut b = BTreeMap::new();
        b.insert("nginx.ingress.kubernetes.io/ssl-redirect".to_string(), "true".to_string());
        b.insert("kubernetes.io/ingress.class".to_string(), "nginx".to_string());

        assert_eq!(
            managed_annotations_digest(a.iter()),
            managed_annotations_digest(b.iter())
        );
    }

    #[test]
    fn digest_changes_when_a_value_changes() {
        let mut a = BTreeMap::new();
        a.insert("kubernetes.io/ingress.class".to_string(), "nginx".to_string());
        let before = managed_annotations_digest(a.iter());
        a.insert("kubernetes.io/ingress.class".to_string(), "traefik".to_string());
        assert_ne!(before, managed_annotations_digest(a.iter()));
    }

    #[test]
    fn digest_ignores_itself() {
        let mut a = BTreeMap::new();
        a.insert("kubernetes.io/ingress.class".to_string(), "nginx".to_string());
        let before = managed_annotations_digest(a.iter());
        stamp_digest(&mut a);
        // re-stamping over a map that already contains the digest is stable
        let stamped = a.get(ANNOTATION_MANAGED_DIGEST).unwrap().clone();
        stamp_digest(&mut a);
        assert_eq!(a.get(ANNOTATION_MANAGED_DIGEST).unwrap(), &stamped);
        assert_eq!(before, stamped);
    }

    #[test]
    fn disjoint_selectors_are_detected() {
        let mut ours = BTreeMap::new();
        ours.insert("app".to_string(), "che".to_string());
        ours.insert("component".to_string(), "gateway-config".to_string());

        // same keys, same values: not disjoint
        assert!(!selectors_disjoint(&ours, &ours.clone()));

        // user override with a different app value can never co-select
        let mut theirs = ours.clone();
        theirs.insert("app".to_string(), "custom".to_string());
        assert!(selectors_disjoint(&ours, &theirs));

        // extra keys on one side are fine (subset matching)
        let mut extra = ours.clone();
        extra.insert("tier".to_string(), "proxy".to_string());
        assert!(!selectors_disjoint(&ours, &extra));
    }
}
