use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::{
    api::{Api, DeleteParams, PostParams},
    Client, ResourceExt,
};
use thiserror::Error;

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error(transparent)]
    Api(#[from] kube::Error),
}

/// CRUD surface the reconcilers require of the apply cluster.
///
/// Lookups return the tombstone snapshot (an object with an empty name) when
/// the resource does not exist; all other failures surface as errors.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_namespace(&self, name: &str) -> Result<Namespace>;
    async fn create_namespace(&self, ns: &Namespace) -> Result<()>;
    async fn update_namespace(&self, ns: &Namespace) -> Result<()>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;
    async fn create_service(&self, svc: &Service) -> Result<()>;
    async fn update_service(&self, svc: &Service) -> Result<()>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints>;
    async fn create_endpoints(&self, ep: &Endpoints) -> Result<()>;
    async fn update_endpoints(&self, ep: &Endpoints) -> Result<()>;
    async fn delete_endpoints(&self, namespace: &str, name: &str) -> Result<()>;
}

/// The apply cluster reached through a kube client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn endpoints(&self, namespace: &str) -> Api<Endpoints> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Maps a not-found lookup to the tombstone snapshot.
fn or_tombstone<T: Default>(res: kube::Result<T>) -> Result<T> {
    match res {
        Ok(obj) => Ok(obj),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Namespace> {
        or_tombstone(self.namespaces().get(name).await)
    }

    async fn create_namespace(&self, ns: &Namespace) -> Result<()> {
        self.namespaces()
            .create(&PostParams::default(), ns)
            .await?;
        Ok(())
    }

    async fn update_namespace(&self, ns: &Namespace) -> Result<()> {
        self.namespaces()
            .replace(&ns.name_any(), &PostParams::default(), ns)
            .await?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        or_tombstone(self.services(namespace).get(name).await)
    }

    async fn create_service(&self, svc: &Service) -> Result<()> {
        self.services(&svc.namespace().unwrap_or_default())
            .create(&PostParams::default(), svc)
            .await?;
        Ok(())
    }

    async fn update_service(&self, svc: &Service) -> Result<()> {
        self.services(&svc.namespace().unwrap_or_default())
            .replace(&svc.name_any(), &PostParams::default(), svc)
            .await?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.services(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints> {
        or_tombstone(self.endpoints(namespace).get(name).await)
    }

    async fn create_endpoints(&self, ep: &Endpoints) -> Result<()> {
        self.endpoints(&ep.namespace().unwrap_or_default())
            .create(&PostParams::default(), ep)
            .await?;
        Ok(())
    }

    async fn update_endpoints(&self, ep: &Endpoints) -> Result<()> {
        self.endpoints(&ep.namespace().unwrap_or_default())
            .replace(&ep.name_any(), &PostParams::default(), ep)
            .await?;
        Ok(())
    }

    async fn delete_endpoints(&self, namespace: &str, name: &str) -> Result<()> {
        self.endpoints(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::{ClusterApi, ClusterError, Result};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
    use kube::ResourceExt;
    use parking_lot::Mutex;
    use std::{collections::BTreeMap, sync::Arc};

    /// In-memory apply cluster recording every write for assertions.
    #[derive(Clone, Default)]
    pub(crate) struct MockCluster {
        state: Arc<Mutex<State>>,
    }

    #[derive(Default)]
    struct State {
        namespaces: BTreeMap<String, Namespace>,
        services: BTreeMap<String, Service>,
        endpoints: BTreeMap<String, Endpoints>,
        writes: Vec<String>,
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{namespace}/{name}")
    }

    impl MockCluster {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// Seeds state without recording a write.
        pub(crate) fn seed_namespace(&self, ns: Namespace) {
            self.state.lock().namespaces.insert(ns.name_any(), ns);
        }

        pub(crate) fn seed_service(&self, svc: Service) {
            let k = key(&svc.namespace().unwrap_or_default(), &svc.name_any());
            self.state.lock().services.insert(k, svc);
        }

        pub(crate) fn seed_endpoints(&self, ep: Endpoints) {
            let k = key(&ep.namespace().unwrap_or_default(), &ep.name_any());
            self.state.lock().endpoints.insert(k, ep);
        }

        pub(crate) fn namespace(&self, name: &str) -> Option<Namespace> {
            self.state.lock().namespaces.get(name).cloned()
        }

        pub(crate) fn service(&self, namespace: &str, name: &str) -> Option<Service> {
            self.state.lock().services.get(&key(namespace, name)).cloned()
        }

        pub(crate) fn endpoints(&self, namespace: &str, name: &str) -> Option<Endpoints> {
            self.state.lock().endpoints.get(&key(namespace, name)).cloned()
        }

        pub(crate) fn writes(&self) -> Vec<String> {
            self.state.lock().writes.clone()
        }

        pub(crate) fn write_count(&self) -> usize {
            self.state.lock().writes.len()
        }
    }

    #[async_trait]
    impl ClusterApi for MockCluster {
        async fn get_namespace(&self, name: &str) -> Result<Namespace> {
            Ok(self
                .state
                .lock()
                .namespaces
                .get(name)
                .cloned()
                .unwrap_or_default())
        }

        async fn create_namespace(&self, ns: &Namespace) -> Result<()> {
            let mut state = self.state.lock();
            let name = ns.name_any();
            if state.namespaces.contains_key(&name) {
                return Err(ClusterError::AlreadyExists {
                    kind: "namespace",
                    name,
                });
            }
            state.writes.push(format!("create namespace {name}"));
            state.namespaces.insert(name, ns.clone());
            Ok(())
        }

        async fn update_namespace(&self, ns: &Namespace) -> Result<()> {
            let mut state = self.state.lock();
            let name = ns.name_any();
            if !state.namespaces.contains_key(&name) {
                return Err(ClusterError::NotFound {
                    kind: "namespace",
                    name,
                });
            }
            state.writes.push(format!("update namespace {name}"));
            state.namespaces.insert(name, ns.clone());
            Ok(())
        }

        async fn delete_namespace(&self, name: &str) -> Result<()> {
            let mut state = self.state.lock();
            if state.namespaces.remove(name).is_none() {
                return Err(ClusterError::NotFound {
                    kind: "namespace",
                    name: name.to_string(),
                });
            }
            state.writes.push(format!("delete namespace {name}"));
            Ok(())
        }

        async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
            Ok(self
                .state
                .lock()
                .services
                .get(&key(namespace, name))
                .cloned()
                .unwrap_or_default())
        }

        async fn create_service(&self, svc: &Service) -> Result<()> {
            let mut state = self.state.lock();
            let k = key(&svc.namespace().unwrap_or_default(), &svc.name_any());
            if state.services.contains_key(&k) {
                return Err(ClusterError::AlreadyExists {
                    kind: "service",
                    name: k,
                });
            }
            state.writes.push(format!("create service {k}"));
            state.services.insert(k, svc.clone());
            Ok(())
        }

        async fn update_service(&self, svc: &Service) -> Result<()> {
            let mut state = self.state.lock();
            let k = key(&svc.namespace().unwrap_or_default(), &svc.name_any());
            if !state.services.contains_key(&k) {
                return Err(ClusterError::NotFound {
                    kind: "service",
                    name: k,
                });
            }
            state.writes.push(format!("update service {k}"));
            state.services.insert(k, svc.clone());
            Ok(())
        }

        async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
            let mut state = self.state.lock();
            let k = key(namespace, name);
            if state.services.remove(&k).is_none() {
                return Err(ClusterError::NotFound {
                    kind: "service",
                    name: k,
                });
            }
            state.writes.push(format!("delete service {k}"));
            Ok(())
        }

        async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Endpoints> {
            Ok(self
                .state
                .lock()
                .endpoints
                .get(&key(namespace, name))
                .cloned()
                .unwrap_or_default())
        }

        async fn create_endpoints(&self, ep: &Endpoints) -> Result<()> {
            let mut state = self.state.lock();
            let k = key(&ep.namespace().unwrap_or_default(), &ep.name_any());
            if state.endpoints.contains_key(&k) {
                return Err(ClusterError::AlreadyExists {
                    kind: "endpoints",
                    name: k,
                });
            }
            state.writes.push(format!("create endpoints {k}"));
            state.endpoints.insert(k, ep.clone());
            Ok(())
        }

        async fn update_endpoints(&self, ep: &Endpoints) -> Result<()> {
            let mut state = self.state.lock();
            let k = key(&ep.namespace().unwrap_or_default(), &ep.name_any());
            if !state.endpoints.contains_key(&k) {
                return Err(ClusterError::NotFound {
                    kind: "endpoints",
                    name: k,
                });
            }
            state.writes.push(format!("update endpoints {k}"));
            state.endpoints.insert(k, ep.clone());
            Ok(())
        }

        async fn delete_endpoints(&self, namespace: &str, name: &str) -> Result<()> {
            let mut state = self.state.lock();
            let k = key(namespace, name);
            if state.endpoints.remove(&k).is_none() {
                return Err(ClusterError::NotFound {
                    kind: "endpoints",
                    name: k,
                });
            }
            state.writes.push(format!("delete endpoints {k}"));
            Ok(())
        }
    }
}
