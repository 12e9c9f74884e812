//! Cluster client facade.
//!
//! Typed get/list/create/update/delete over the Kubernetes API with the
//! operator's error taxonomy applied. Reads come in two flavors: `get_cached`
//! serves from informer-backed local stores when the kind is watched
//! (eventually consistent), `get` always hits the API server and is the right
//! call immediately after a create or for unwatched kinds. A discovery
//! sub-interface probes optional APIs (Route, OAuthClient, ConsoleLink) and
//! caches the answer for the process lifetime.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{reflector, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{classify, ApiErrorKind};
use crate::Error;

/// Facade over the Kubernetes API shared by every reconciler
#[derive(Clone)]
pub struct ClusterClient {
    client: kube::Client,
    caches: Arc<CacheRegistry>,
    discovery: Arc<DiscoveryCache>,
}

impl ClusterClient {
    /// Wrap a kube client with empty cache and discovery registries
    pub fn new(client: kube::Client) -> Self {
        Self {
            client,
            caches: Arc::new(CacheRegistry::default()),
            discovery: Arc::new(DiscoveryCache::default()),
        }
    }

    /// Wrap a kube client with a pre-populated cache registry
    pub fn with_caches(client: kube::Client, caches: Arc<CacheRegistry>) -> Self {
        Self {
            client,
            caches,
            discovery: Arc::new(DiscoveryCache::default()),
        }
    }

    /// The underlying kube client
    pub fn kube(&self) -> &kube::Client {
        &self.client
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Direct read, bypassing every cache. `None` on 404.
    pub async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(Error::from)
    }

    /// Cached read when the kind is watched, direct read otherwise.
    ///
    /// Staleness is tolerated by callers of this path; anything that must
    /// observe its own writes goes through [`ClusterClient::get`].
    pub async fn get_cached<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let dt = K::DynamicType::default();
        if let Some(obj) = self.caches.lookup(&K::group(&dt), &K::kind(&dt), namespace, name) {
            let typed = serde_json::to_value(obj.as_ref())
                .and_then(serde_json::from_value)
                .map_err(|e| Error::serialization(format!("cached object decode: {e}")))?;
            return Ok(Some(typed));
        }
        self.get(namespace, name).await
    }

    /// Cluster-scoped direct read. `None` on 404.
    pub async fn get_cluster<K>(&self, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        Api::<K>::all(self.client.clone())
            .get_opt(name)
            .await
            .map_err(Error::from)
    }

    /// List namespaced objects matching a label selector
    pub async fn list<K>(&self, namespace: &str, label_selector: &str) -> Result<Vec<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let params = if label_selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(label_selector)
        };
        let list = self.api::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }

    /// Create a namespaced object
    pub async fn create<K>(&self, namespace: &str, object: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(Error::from)
    }

    /// Update (replace) a namespaced object; the caller has set resourceVersion
    pub async fn update<K>(&self, namespace: &str, name: &str, object: &K) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(Error::from)
    }

    /// Merge-patch a namespaced object
    pub async fn patch<K, P>(&self, namespace: &str, name: &str, patch: &P) -> Result<K, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
        P: Serialize + Debug,
    {
        self.api::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(Error::from)
    }

    /// Delete a namespaced object; 404 is success
    pub async fn delete<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if classify(&e) == ApiErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a cluster-scoped object
    pub async fn create_cluster<K>(&self, object: &K) -> Result<K, Error>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        Api::<K>::all(self.client.clone())
            .create(&PostParams::default(), object)
            .await
            .map_err(Error::from)
    }

    /// Update (replace) a cluster-scoped object
    pub async fn update_cluster<K>(&self, name: &str, object: &K) -> Result<K, Error>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        Api::<K>::all(self.client.clone())
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(Error::from)
    }

    /// Delete a cluster-scoped object; 404 is success
    pub async fn delete_cluster<K>(&self, name: &str) -> Result<(), Error>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        match Api::<K>::all(self.client.clone())
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if classify(&e) == ApiErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // --- dynamic (discovered) kinds: Route, OAuthClient, ConsoleLink, Proxy ---

    fn dynamic_api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    /// Direct read of a dynamic object. `None` on 404.
    pub async fn get_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        self.dynamic_api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(Error::from)
    }

    /// Create a dynamic object
    pub async fn create_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.dynamic_api(resource, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(Error::from)
    }

    /// Update (replace) a dynamic object
    pub async fn update_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        self.dynamic_api(resource, namespace)
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(Error::from)
    }

    /// Delete a dynamic object; 404 is success
    pub async fn delete_dynamic(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Error> {
        match self
            .dynamic_api(resource, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if classify(&e) == ApiErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Probe whether the cluster serves `kind` under `group`.
    ///
    /// The first probe runs API discovery; the result is cached for the
    /// process lifetime (optional APIs do not appear mid-run).
    pub async fn supports_kind(&self, group: &str, kind: &str) -> Result<bool, Error> {
        self.discovery.supports(&self.client, group, kind).await
    }
}

/// Per-process registry of informer-backed stores keyed by (group, kind).
///
/// Stores hold [`DynamicObject`]s so a single registry serves every watched
/// kind; typed callers decode through serde on lookup.
#[derive(Default)]
pub struct CacheRegistry {
    stores: std::sync::RwLock<HashMap<(String, String), (ApiResource, Store<DynamicObject>)>>,
}

impl CacheRegistry {
    /// Start watching a kind and serve future cached reads from its store.
    ///
    /// Spawns the reflector driver onto the current runtime; the task ends
    /// when the process does.
    pub fn spawn_watch(&self, client: &kube::Client, resource: ApiResource, namespace: &str) {
        let writer = Writer::new(resource.clone());
        let reader = writer.as_reader();
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &resource);

        let key = (resource.group.clone(), resource.kind.clone());
        self.stores
            .write()
            .expect("cache registry lock")
            .insert(key, (resource.clone(), reader));

        let kind = resource.kind.clone();
        tokio::spawn(async move {
            let stream = reflector(writer, watcher(api, watcher::Config::default()))
                .default_backoff()
                .touched_objects();
            futures::pin_mut!(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(obj) => {
                        debug!(kind = %kind, name = ?obj.metadata.name, "cache updated");
                    }
                    Err(e) => warn!(kind = %kind, error = %e, "watch error"),
                }
            }
        });
    }

    fn lookup(
        &self,
        group: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Option<Arc<DynamicObject>> {
        let stores = self.stores.read().expect("cache registry lock");
        let (resource, store) = stores.get(&(group.to_string(), kind.to_string()))?;
        let obj_ref = ObjectRef::new_with(name, resource.clone()).within(namespace);
        store.get(&obj_ref)
    }
}

/// Discovery results cached per process lifetime
#[derive(Default)]
struct DiscoveryCache {
    known: Mutex<HashMap<String, bool>>,
}

impl DiscoveryCache {
    async fn supports(
        &self,
        client: &kube::Client,
        group: &str,
        kind: &str,
    ) -> Result<bool, Error> {
        let key = format!("{group}/{kind}");
        let mut known = self.known.lock().await;
        if let Some(&present) = known.get(&key) {
            return Ok(present);
        }

        let discovery = kube::discovery::Discovery::new(client.clone())
            .filter(&[group])
            .run()
            .await?;
        let present = discovery
            .groups()
            .filter(|g| g.name() == group)
            .any(|g| g.recommended_resources().iter().any(|(ar, _)| ar.kind == kind));

        debug!(group = %group, kind = %kind, present = present, "discovery probe");
        known.insert(key, present);
        Ok(present)
    }
}

/// Build an `ApiResource` from a known apiVersion and kind.
///
/// Used for the OpenShift kinds the operator addresses dynamically; the
/// version given is used exactly.
pub fn api_resource(api_version: &str, kind: &str, plural: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// OpenShift `Route`
pub fn route_resource() -> ApiResource {
    api_resource("route.openshift.io/v1", "Route", "routes")
}

/// OpenShift `OAuthClient`
pub fn oauth_client_resource() -> ApiResource {
    api_resource("oauth.openshift.io/v1", "OAuthClient", "oauthclients")
}

/// OpenShift `ConsoleLink`
pub fn console_link_resource() -> ApiResource {
    api_resource("console.openshift.io/v1", "ConsoleLink", "consolelinks")
}

/// OpenShift cluster `Proxy`
pub fn cluster_proxy_resource() -> ApiResource {
    api_resource("config.openshift.io/v1", "Proxy", "proxies")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_resource_splits_group_and_version() {
        let ar = route_resource();
        assert_eq!(ar.group, "route.openshift.io");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.kind, "Route");
        assert_eq!(ar.plural, "routes");
    }

    #[test]
    fn core_group_api_resource_has_empty_group() {
        let ar = api_resource("v1", "ConfigMap", "configmaps");
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.api_version, "v1");
    }

    #[test]
    fn cache_lookup_misses_for_unwatched_kind() {
        let registry = CacheRegistry::default();
        assert!(registry.lookup("", "ConfigMap", "che", "che").is_none());
    }
}
