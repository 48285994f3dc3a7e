mod endpoints;
mod namespace;
mod service;

use crate::{
    cluster::ClusterApi,
    config::{Config, REPLICATED_LABEL_KEY, SYNDICATE_MODE_ANNOTATION},
    registry::NamespaceRegistry,
};
use k8s_openapi::api::core::v1::{Service, ServicePort};
use kube::ResourceExt;
use std::{collections::BTreeMap, sync::Arc};

/// Reconciles observed source-cluster snapshots into the apply cluster.
///
/// Every method re-reads apply-side state before writing, so reconciling the
/// same snapshot again converges on the same state.
pub struct Syndicator<C> {
    pub(crate) apply: C,
    pub(crate) config: Arc<Config>,
    pub(crate) registry: NamespaceRegistry,
}

impl<C: ClusterApi> Syndicator<C> {
    pub fn new(apply: C, config: Arc<Config>, registry: NamespaceRegistry) -> Self {
        Self {
            apply,
            config,
            registry,
        }
    }
}

/// True when the replication label carries the given value.
pub(crate) fn has_replication_value(labels: &BTreeMap<String, String>, value: &str) -> bool {
    labels.get(REPLICATED_LABEL_KEY).map(String::as_str) == Some(value)
}

/// A namespace opts out of replication with a literal `"false"` label.
pub(crate) fn replication_enabled(labels: &BTreeMap<String, String>) -> bool {
    labels.get(REPLICATED_LABEL_KEY).map(String::as_str) != Some("false")
}

/// The service's syndication mode, or the empty string for plain replication.
pub(crate) fn syndicate_mode(svc: &Service) -> &str {
    svc.annotations()
        .get(SYNDICATE_MODE_ANNOTATION)
        .map(String::as_str)
        .unwrap_or_default()
}

/// Ports carried over to a reflected service.
pub(crate) fn copy_ports(svc: &Service) -> Vec<ServicePort> {
    svc.spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .map(|port| ServicePort {
            name: port.name.clone(),
            protocol: port.protocol.clone(),
            port: port.port,
            target_port: port.target_port.clone(),
            ..ServicePort::default()
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::Syndicator;
    use crate::{cluster::mock::MockCluster, config::Config, registry::NamespaceRegistry};
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Namespace, Service, ServicePort,
        ServiceSpec,
    };
    use std::{collections::BTreeMap, sync::Arc, time::Duration};

    pub(crate) fn test_config() -> Config {
        Config {
            clusters_to_watch: Vec::new(),
            namespace_to_watch: None,
            namespaces_to_exclude: vec!["kube-system".to_string()],
            replicated_label_value: "true".to_string(),
            resync_period: Duration::from_secs(300),
            watch_namespaces: true,
            watch_endpoints: true,
            watch_services: true,
        }
    }

    pub(crate) fn syndicator() -> (Syndicator<MockCluster>, MockCluster) {
        let cluster = MockCluster::new();
        let syndicator = Syndicator::new(
            cluster.clone(),
            Arc::new(test_config()),
            NamespaceRegistry::new(),
        );
        (syndicator, cluster)
    }

    pub(crate) fn namespace(name: &str, labels: BTreeMap<String, String>) -> Namespace {
        let mut ns = Namespace::default();
        ns.metadata.name = Some(name.to_string());
        if !labels.is_empty() {
            ns.metadata.labels = Some(labels);
        }
        ns
    }

    pub(crate) fn service(
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
        selector: Option<BTreeMap<String, String>>,
        ports: &[i32],
    ) -> Service {
        let mut svc = Service::default();
        svc.metadata.name = Some(name.to_string());
        svc.metadata.namespace = Some(namespace.to_string());
        if !annotations.is_empty() {
            svc.metadata.annotations = Some(annotations);
        }
        svc.spec = Some(ServiceSpec {
            selector,
            ports: Some(
                ports
                    .iter()
                    .map(|&port| ServicePort {
                        port,
                        protocol: Some("TCP".to_string()),
                        ..ServicePort::default()
                    })
                    .collect(),
            ),
            ..ServiceSpec::default()
        });
        svc
    }

    pub(crate) fn endpoints(namespace: &str, name: &str, ips: &[&str]) -> Endpoints {
        let mut ep = Endpoints::default();
        ep.metadata.name = Some(name.to_string());
        ep.metadata.namespace = Some(namespace.to_string());
        let addresses: Vec<_> = ips
            .iter()
            .map(|ip| EndpointAddress {
                ip: ip.to_string(),
                ..EndpointAddress::default()
            })
            .collect();
        ep.subsets = Some(vec![EndpointSubset {
            addresses: Some(addresses),
            ports: Some(vec![EndpointPort {
                port: 80,
                protocol: Some("TCP".to_string()),
                ..EndpointPort::default()
            }]),
            ..EndpointSubset::default()
        }]);
        ep
    }

    /// IPs present in an endpoints object, in subset order.
    pub(crate) fn addresses(ep: &Endpoints) -> Vec<String> {
        ep.subsets
            .iter()
            .flatten()
            .flat_map(|subset| subset.addresses.iter().flatten())
            .map(|addr| addr.ip.clone())
            .collect()
    }
}
