use crate::{
    cluster::ClusterApi,
    config::{KUBERNETES_SVC, SYNDICATE_SUFFIX},
    reconcile::{has_replication_value, replication_enabled, Syndicator},
};
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::ResourceExt;
use tracing::error;

/// A full object snapshot delivered by a watch loop.
#[derive(Clone, Debug)]
pub enum Snapshot {
    Namespace(Namespace),
    Service(Service),
    Endpoints(Endpoints),
}

impl Snapshot {
    fn describe(&self) -> (&'static str, String, String) {
        match self {
            Snapshot::Namespace(ns) => ("namespace", String::new(), ns.name_any()),
            Snapshot::Service(svc) => (
                "service",
                svc.namespace().unwrap_or_default(),
                svc.name_any(),
            ),
            Snapshot::Endpoints(ep) => (
                "endpoints",
                ep.namespace().unwrap_or_default(),
                ep.name_any(),
            ),
        }
    }
}

impl From<Namespace> for Snapshot {
    fn from(ns: Namespace) -> Self {
        Snapshot::Namespace(ns)
    }
}

impl From<Service> for Snapshot {
    fn from(svc: Service) -> Self {
        Snapshot::Service(svc)
    }
}

impl From<Endpoints> for Snapshot {
    fn from(ep: Endpoints) -> Self {
        Snapshot::Endpoints(ep)
    }
}

/// Routes watch callbacks into the reconcilers once the predicate accepts
/// them. Reconciler failures are logged and the event is dropped; re-delivery
/// is the watch re-sync's job.
pub struct Dispatcher<C> {
    syndicator: Syndicator<C>,
}

impl<C: ClusterApi> Dispatcher<C> {
    pub fn new(syndicator: Syndicator<C>) -> Self {
        Self { syndicator }
    }

    pub async fn object_created(&self, obj: Snapshot) {
        if !self.should_process(&obj) {
            return;
        }
        let result = match &obj {
            Snapshot::Namespace(ns) => self.syndicator.namespace_created(ns).await,
            Snapshot::Endpoints(ep) => self.syndicator.endpoints_applied(ep).await,
            Snapshot::Service(svc) => self.syndicator.service_created(svc).await,
        };
        self.log_dropped(&obj, result);
    }

    /// Only the current snapshot is reconciled; the previous one is carried
    /// for parity with the watch callback contract.
    pub async fn object_updated(&self, _old: &Snapshot, new: Snapshot) {
        if !self.should_process(&new) {
            return;
        }
        let result = match &new {
            Snapshot::Namespace(ns) => self.syndicator.namespace_updated(ns).await,
            Snapshot::Endpoints(ep) => self.syndicator.endpoints_applied(ep).await,
            Snapshot::Service(svc) => self.syndicator.service_updated(svc).await,
        };
        self.log_dropped(&new, result);
    }

    pub async fn object_deleted(&self, obj: Snapshot) {
        if !self.should_process(&obj) {
            return;
        }
        let result = match &obj {
            Snapshot::Namespace(ns) => self.syndicator.namespace_deleted(ns).await,
            Snapshot::Endpoints(ep) => self.syndicator.endpoints_deleted(ep).await,
            Snapshot::Service(svc) => self.syndicator.service_deleted(svc).await,
        };
        self.log_dropped(&obj, result);
    }

    fn log_dropped(&self, obj: &Snapshot, result: anyhow::Result<()>) {
        if let Err(error) = result {
            let (kind, namespace, name) = obj.describe();
            error!(%error, kind, %namespace, %name, "reconciliation abandoned");
        }
    }

    fn should_process(&self, obj: &Snapshot) -> bool {
        match obj {
            Snapshot::Namespace(ns) => {
                if self.observed_reflection(ns) {
                    return false;
                }
                let name = ns.name_any();
                if self
                    .syndicator
                    .config
                    .namespaces_to_exclude
                    .iter()
                    .any(|excluded| *excluded == name)
                {
                    return false;
                }
                replication_enabled(ns.labels())
            }
            Snapshot::Endpoints(ep) => {
                !self.already_replicated(ep.labels())
                    && self.in_scope(ep.namespace())
                    && ep.name_any() != KUBERNETES_SVC
            }
            Snapshot::Service(svc) => {
                !svc.name_any().ends_with(SYNDICATE_SUFFIX)
                    && !self.already_replicated(svc.labels())
                    && self.in_scope(svc.namespace())
                    && svc.name_any() != KUBERNETES_SVC
            }
        }
    }

    /// A namespace already carrying the truthy label is itself a reflection
    /// and is rejected; noting it in the registry is how this side learns
    /// which namespaces are in scope for services and endpoints.
    fn observed_reflection(&self, ns: &Namespace) -> bool {
        if !has_replication_value(ns.labels(), &self.syndicator.config.replicated_label_value) {
            return false;
        }
        let name = ns.name_any();
        if !self.syndicator.registry.load(&name) {
            self.syndicator.registry.store(&name);
        }
        true
    }

    fn already_replicated(&self, labels: &std::collections::BTreeMap<String, String>) -> bool {
        has_replication_value(labels, &self.syndicator.config.replicated_label_value)
    }

    fn in_scope(&self, namespace: Option<String>) -> bool {
        namespace
            .map(|ns| self.syndicator.registry.load(&ns))
            .unwrap_or(false)
    }
}
