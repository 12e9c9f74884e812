//! Finalizer protocol on the root CR.
//!
//! Cluster-scoped side effects (cluster roles, OAuth clients, console links)
//! cannot carry owner references, so their owners append finalizers to the
//! CheCluster and remove them after cleanup. Appends and removals re-read
//! the CR and retry unboundedly on write conflicts; any other error
//! surfaces. Legacy spellings are recognized and stripped on upgrade but
//! never emitted.

use kube::api::{Api, Patch, PatchParams};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::crd::CheCluster;
use crate::error::{classify, ApiErrorKind};
use crate::Error;

/// Finalizer spellings emitted by older operator versions.
///
/// Recognized for cleanup, never appended.
pub const LEGACY_FINALIZERS: &[&str] = &[
    "oauthclients",
    "consolelink.che.eclipse.org",
    "cluster-resources.che.eclipse.org",
];

/// True when the CR carries the finalizer
pub fn has_finalizer(cr: &CheCluster, finalizer: &str) -> bool {
    cr.metadata
        .finalizers
        .as_ref()
        .map(|list| list.iter().any(|f| f == finalizer))
        .unwrap_or(false)
}

/// Add `finalizer` to a finalizer list exactly once.
///
/// Returns `None` when the list already carries it (no write needed).
pub fn appended(list: &[String], finalizer: &str) -> Option<Vec<String>> {
    if list.iter().any(|f| f == finalizer) {
        return None;
    }
    let mut next = list.to_vec();
    next.push(finalizer.to_string());
    Some(next)
}

/// Remove every occurrence of `finalizer` and of its legacy spellings.
///
/// Returns `None` when nothing was present (no write needed).
pub fn removed(list: &[String], finalizer: &str) -> Option<Vec<String>> {
    let next: Vec<String> = list
        .iter()
        .filter(|f| f.as_str() != finalizer && !LEGACY_FINALIZERS.contains(&f.as_str()))
        .cloned()
        .collect();
    if next.len() == list.len() {
        return None;
    }
    Some(next)
}

fn cr_api(client: &ClusterClient, namespace: &str) -> Api<CheCluster> {
    Api::namespaced(client.kube().clone(), namespace)
}

async fn patch_finalizers(
    api: &Api<CheCluster>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<(), kube::Error> {
    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"metadata": {"finalizers": finalizers}})),
    )
    .await
    .map(|_| ())
}

/// Append a finalizer to the CR, retrying conflicts unboundedly.
///
/// Each attempt re-reads the CR so the edit applies to the latest version;
/// any non-conflict error surfaces to the caller.
pub async fn append_finalizer(
    client: &ClusterClient,
    namespace: &str,
    name: &str,
    finalizer: &str,
) -> Result<(), Error> {
    let api = cr_api(client, namespace);
    loop {
        let cr = api.get(name).await?;
        let current = cr.metadata.finalizers.clone().unwrap_or_default();
        let Some(next) = appended(&current, finalizer) else {
            return Ok(());
        };
        match patch_finalizers(&api, name, next).await {
            Ok(()) => {
                info!(finalizer = %finalizer, cr = %cr.name_any(), "finalizer appended");
                return Ok(());
            }
            Err(e) if classify(&e) == ApiErrorKind::Conflict => {
                debug!(finalizer = %finalizer, "conflict appending finalizer, retrying");
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Remove a finalizer (and legacy spellings) from the CR, retrying conflicts
pub async fn delete_finalizer(
    client: &ClusterClient,
    namespace: &str,
    name: &str,
    finalizer: &str,
) -> Result<(), Error> {
    let api = cr_api(client, namespace);
    loop {
        let cr = match api.get_opt(name).await? {
            Some(cr) => cr,
            // CR already gone: nothing left to clean
            None => return Ok(()),
        };
        let current = cr.metadata.finalizers.clone().unwrap_or_default();
        let Some(next) = removed(&current, finalizer) else {
            return Ok(());
        };
        match patch_finalizers(&api, name, next).await {
            Ok(()) => {
                info!(finalizer = %finalizer, cr = %cr.name_any(), "finalizer removed");
                return Ok(());
            }
            Err(e) if classify(&e) == ApiErrorKind::Conflict => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Clear the remaining finalizer list in one write, letting the API server
/// garbage-collect the CR. Conflicts retry; 404 means the CR is already gone.
pub async fn clear_finalizers(
    client: &ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<(), Error> {
    let api = cr_api(client, namespace);
    loop {
        match api.get_opt(name).await? {
            None => return Ok(()),
            Some(cr) if cr.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty()) => {
                return Ok(())
            }
            Some(_) => {}
        }
        match patch_finalizers(&api, name, Vec::new()).await {
            Ok(()) => {
                info!(cr = %name, "all finalizers cleared");
                return Ok(());
            }
            Err(e) if classify(&e) == ApiErrorKind::Conflict => continue,
            Err(e) if classify(&e) == ApiErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_adds_exactly_once_and_delete_removes() {
        // finalizer round-trip on the in-memory list
        let list: Vec<String> = Vec::new();
        let list = appended(&list, "X").expect("first append writes");
        assert_eq!(list, vec!["X"]);

        // second append is a noop
        assert!(appended(&list, "X").is_none());

        let list = removed(&list, "X").expect("delete writes");
        assert!(list.is_empty());

        // deleting from an empty list is a noop
        assert!(removed(&list, "X").is_none());
    }

    #[test]
    fn append_preserves_existing_order() {
        let list = vec!["A".to_string(), "B".to_string()];
        let next = appended(&list, "C").unwrap();
        assert_eq!(next, vec!["A", "B", "C"]);
    }

    #[test]
    fn removal_strips_legacy_spellings() {
        let list = vec![
            "oauthclients".to_string(), // legacy form
            "oauthclients.finalizers.che.eclipse.org".to_string(),
            "other.finalizers.che.eclipse.org".to_string(),
        ];
        let next = removed(&list, "oauthclients.finalizers.che.eclipse.org").unwrap();
        assert_eq!(next, vec!["other.finalizers.che.eclipse.org"]);
    }

    #[test]
    fn removal_of_only_legacy_names_still_writes() {
        let list = vec!["consolelink.che.eclipse.org".to_string()];
        let next = removed(&list, "consolelink.finalizers.che.eclipse.org").unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn has_finalizer_reads_the_cr_list() {
        let mut cr = CheCluster::new("eclipse-che", Default::default());
        assert!(!has_finalizer(&cr, "X"));
        cr.metadata.finalizers = Some(vec!["X".to_string()]);
        assert!(has_finalizer(&cr, "X"));
    }
}
