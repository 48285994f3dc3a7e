use super::{syndicate_mode, Syndicator};
use crate::{
    cluster::ClusterApi,
    config::{
        REPLICATED_LABEL_KEY, SYNDICATE_MODE_SINGULAR, SYNDICATE_MODE_UNION, SYNDICATE_SUFFIX,
    },
};
use ahash::AHashSet;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints};
use kube::ResourceExt;
use tracing::{debug, info};

/// Characters of the address string taken as the origin-cluster bucket.
///
/// Not a true CIDR: a stable prefix of the dotted-decimal string assumed to
/// correlate with cluster boundaries. Addresses sharing the first observed
/// address's bucket are treated as intra-cluster during shadow merges.
const CLUSTER_PREFIX_LEN: usize = 6;

fn cluster_prefix(ip: &str) -> &str {
    ip.get(..CLUSTER_PREFIX_LEN).unwrap_or(ip)
}

fn copy_address(addr: &EndpointAddress) -> EndpointAddress {
    EndpointAddress {
        ip: addr.ip.clone(),
        hostname: addr.hostname.clone(),
        ..EndpointAddress::default()
    }
}

fn copy_ports(subset: &EndpointSubset) -> Option<Vec<EndpointPort>> {
    let ports: Vec<_> = subset
        .ports
        .iter()
        .flatten()
        .map(|port| EndpointPort {
            name: port.name.clone(),
            port: port.port,
            protocol: port.protocol.clone(),
            ..EndpointPort::default()
        })
        .collect();
    if ports.is_empty() {
        None
    } else {
        Some(ports)
    }
}

/// True when the candidate's address set differs from the existing one: some
/// candidate address is missing from the existing set, or the match count
/// disagrees with the existing set's size.
fn change_in_endpoints(existing: &Endpoints, candidate: &Endpoints) -> bool {
    let existing_ips: AHashSet<&str> = existing
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|addr| addr.ip.as_str())
        .collect();

    let mut matched = 0;
    for subset in candidate.subsets.iter().flatten() {
        for addr in subset.addresses.iter().flatten() {
            if existing_ips.contains(addr.ip.as_str()) {
                matched += 1;
            } else {
                return true;
            }
        }
    }
    matched != existing_ips.len()
}

impl<C: ClusterApi> Syndicator<C> {
    /// Reconciles an observed endpoints object, on create and update alike.
    pub async fn endpoints_applied(&self, observed: &Endpoints) -> Result<()> {
        let namespace = observed.namespace().unwrap_or_default();
        let mut name = observed.name_any();
        let mut shadow = false;
        if let Some(stripped) = name.strip_suffix(SYNDICATE_SUFFIX) {
            name = stripped.to_string();
            shadow = true;
        }
        debug!(%namespace, %name, shadow, "reconciling endpoints");

        let mut to_apply = Endpoints::default();
        to_apply.metadata.name = Some(name.clone());
        to_apply.metadata.namespace = Some(namespace.clone());
        to_apply.metadata.labels = observed.metadata.labels.clone();
        to_apply.labels_mut().insert(
            REPLICATED_LABEL_KEY.to_string(),
            self.config.replicated_label_value.clone(),
        );

        // The first non-empty address names the observing cluster's bucket.
        let mut origin_prefix = String::new();
        let mut subsets = Vec::new();
        for subset in observed.subsets.iter().flatten() {
            let mut addresses = Vec::new();
            for addr in subset.addresses.iter().flatten() {
                if addr.ip.is_empty() {
                    continue;
                }
                if origin_prefix.is_empty() {
                    origin_prefix = cluster_prefix(&addr.ip).to_string();
                }
                addresses.push(copy_address(addr));
            }
            if addresses.is_empty() {
                continue;
            }
            subsets.push(EndpointSubset {
                addresses: Some(addresses),
                ports: copy_ports(subset),
                ..EndpointSubset::default()
            });
        }

        let service = self
            .apply
            .get_service(&namespace, &name)
            .await
            .context("looking up paired service")?;
        let mode = syndicate_mode(&service);
        if mode == SYNDICATE_MODE_SINGULAR {
            return Ok(());
        }
        let union_svc = mode == SYNDICATE_MODE_UNION;

        let existing = self
            .apply
            .get_endpoints(&namespace, &name)
            .await
            .context("looking up endpoints")?;
        if existing.name_any().is_empty() {
            if !subsets.is_empty() {
                to_apply.subsets = Some(subsets);
            }
            return self
                .apply
                .create_endpoints(&to_apply)
                .await
                .context("creating endpoints");
        }

        if shadow {
            // Addresses already held by the observing cluster are represented
            // by the shadow update itself; keep only the rest.
            for subset in existing.subsets.iter().flatten() {
                let mut addresses = Vec::new();
                for addr in subset.addresses.iter().flatten() {
                    if !origin_prefix.is_empty() && addr.ip.starts_with(&origin_prefix) {
                        continue;
                    }
                    addresses.push(copy_address(addr));
                }
                if addresses.is_empty() {
                    continue;
                }
                subsets.push(EndpointSubset {
                    addresses: Some(addresses),
                    ports: copy_ports(subset),
                    ..EndpointSubset::default()
                });
            }
            if !subsets.is_empty() {
                to_apply.subsets = Some(subsets);
            }
        } else {
            if !subsets.is_empty() {
                to_apply.subsets = Some(subsets);
            }
            if !change_in_endpoints(&existing, &to_apply) {
                info!(%namespace, %name, "no change in endpoints");
                return Ok(());
            }
        }

        if union_svc {
            // Merged union reflections are never authoritative.
            to_apply
                .labels_mut()
                .insert(REPLICATED_LABEL_KEY.to_string(), "false".to_string());
        }
        self.apply
            .update_endpoints(&to_apply)
            .await
            .context("updating endpoints")
    }

    pub async fn endpoints_deleted(&self, observed: &Endpoints) -> Result<()> {
        let namespace = observed.namespace().unwrap_or_default();
        let name = observed.name_any();
        info!(%namespace, %name, "deleting endpoints");

        let service = self
            .apply
            .get_service(&namespace, &name)
            .await
            .context("looking up paired service")?;
        if syndicate_mode(&service) == SYNDICATE_MODE_SINGULAR {
            return Ok(());
        }
        self.apply
            .delete_endpoints(&namespace, &name)
            .await
            .context("deleting endpoints")
    }
}
