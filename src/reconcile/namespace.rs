use super::Syndicator;
use crate::{cluster::ClusterApi, config::REPLICATED_LABEL_KEY};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tracing::info;

impl<C: ClusterApi> Syndicator<C> {
    pub async fn namespace_created(&self, ns: &Namespace) -> Result<()> {
        let name = ns.name_any();
        info!(namespace = %name, "creating namespace");

        let existing = self
            .apply
            .get_namespace(&name)
            .await
            .context("looking up namespace")?;
        if existing.name_any().is_empty() {
            let mut reflected = Namespace::default();
            reflected.metadata.name = Some(name.clone());
            reflected.metadata.labels = ns.metadata.labels.clone();
            reflected.labels_mut().insert(
                REPLICATED_LABEL_KEY.to_string(),
                self.config.replicated_label_value.clone(),
            );
            self.apply
                .create_namespace(&reflected)
                .await
                .context("creating namespace")?;
        } else {
            self.reflect_labels(ns, existing).await?;
        }
        self.registry.store(&name);
        Ok(())
    }

    /// No-op once the registry marks the namespace: later source-side label
    /// changes do not propagate until restart or delete/recreate.
    pub async fn namespace_updated(&self, ns: &Namespace) -> Result<()> {
        let name = ns.name_any();
        if self.registry.load(&name) {
            return Ok(());
        }
        info!(namespace = %name, "updating namespace");

        let existing = self
            .apply
            .get_namespace(&name)
            .await
            .context("looking up namespace")?;
        if existing.name_any().is_empty() {
            return self.namespace_created(ns).await;
        }
        self.reflect_labels(ns, existing).await?;
        self.registry.store(&name);
        Ok(())
    }

    pub async fn namespace_deleted(&self, ns: &Namespace) -> Result<()> {
        let name = ns.name_any();
        info!(namespace = %name, "deleting namespace");

        self.apply
            .delete_namespace(&name)
            .await
            .context("deleting namespace")?;
        self.registry.delete(&name);
        Ok(())
    }

    /// Copies source labels onto the reflection with the replication label
    /// inverted, so that observing the written reflection never triggers
    /// another reconciliation.
    async fn reflect_labels(&self, ns: &Namespace, mut existing: Namespace) -> Result<()> {
        existing.metadata.labels = ns.metadata.labels.clone();
        let value = if ns.labels().get(REPLICATED_LABEL_KEY) == Some(&self.config.replicated_label_value)
        {
            "false".to_string()
        } else {
            self.config.replicated_label_value.clone()
        };
        existing
            .labels_mut()
            .insert(REPLICATED_LABEL_KEY.to_string(), value);
        self.apply
            .update_namespace(&existing)
            .await
            .context("updating namespace")
    }
}
