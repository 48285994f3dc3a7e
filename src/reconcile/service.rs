use super::{copy_ports, has_replication_value, syndicate_mode, Syndicator};
use crate::{
    cluster::ClusterApi,
    config::{
        REPLICATED_LABEL_KEY, SYNDICATE_MODE_ANNOTATION, SYNDICATE_MODE_RECEIVER,
        SYNDICATE_MODE_SINGULAR, SYNDICATE_MODE_SOURCE, SYNDICATE_MODE_UNION, SYNDICATE_SUFFIX,
    },
};
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::info;

impl<C: ClusterApi> Syndicator<C> {
    pub async fn service_created(&self, svc: &Service) -> Result<()> {
        self.apply_service(svc, false).await
    }

    /// Creates or refreshes the reflection of `svc`. With `shadow` set, the
    /// written object takes the `-syndicate` name, keeps the source selector,
    /// and is marked as a non-authoritative reflection.
    async fn apply_service(&self, svc: &Service, shadow: bool) -> Result<()> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = if shadow {
            format!("{}{}", svc.name_any(), SYNDICATE_SUFFIX)
        } else {
            svc.name_any()
        };
        info!(%namespace, service = %name, "creating service");

        let mode = syndicate_mode(svc);
        let existing = self
            .apply
            .get_service(&namespace, &name)
            .await
            .context("looking up service")?;
        if existing.name_any().is_empty() {
            if mode == SYNDICATE_MODE_SINGULAR {
                return Ok(());
            }
            let mut service = Service::default();
            service.metadata.name = Some(name);
            service.metadata.namespace = Some(namespace);
            service.metadata.labels = svc.metadata.labels.clone();
            let spec = service.spec.get_or_insert_with(Default::default);
            spec.ports = Some(copy_ports(svc));
            if shadow {
                spec.selector = svc.spec.as_ref().and_then(|s| s.selector.clone());
                service
                    .labels_mut()
                    .insert(REPLICATED_LABEL_KEY.to_string(), "false".to_string());
            } else {
                service.labels_mut().insert(
                    REPLICATED_LABEL_KEY.to_string(),
                    self.config.replicated_label_value.clone(),
                );
            }
            self.apply
                .create_service(&service)
                .await
                .context("creating service")
        } else {
            let mut existing = existing;
            existing.spec.get_or_insert_with(Default::default).ports = Some(copy_ports(svc));
            existing.metadata.labels = svc.metadata.labels.clone();
            if mode == SYNDICATE_MODE_SINGULAR {
                if self.is_replica(&existing)
                    && syndicate_mode(&existing) != SYNDICATE_MODE_SINGULAR
                {
                    self.service_deleted(&existing).await?;
                }
                return Ok(());
            }
            let value = if shadow {
                "false".to_string()
            } else {
                self.config.replicated_label_value.clone()
            };
            existing
                .labels_mut()
                .insert(REPLICATED_LABEL_KEY.to_string(), value);
            self.apply
                .update_service(&existing)
                .await
                .context("updating service")
        }
    }

    pub async fn service_updated(&self, svc: &Service) -> Result<()> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        info!(%namespace, service = %name, "updating service");

        let mode = syndicate_mode(svc);
        let existing = self
            .apply
            .get_service(&namespace, &name)
            .await
            .context("looking up service")?;
        let existing_mode = syndicate_mode(&existing).to_string();

        // A singular service tears down any replica and is otherwise ignored.
        if mode == SYNDICATE_MODE_SINGULAR {
            if self.is_replica(&existing) && existing_mode != SYNDICATE_MODE_SINGULAR {
                self.service_deleted(&existing).await?;
            }
            return Ok(());
        }

        if mode == SYNDICATE_MODE_UNION {
            let mut existing = existing;
            if existing_mode != SYNDICATE_MODE_UNION {
                existing.annotations_mut().insert(
                    SYNDICATE_MODE_ANNOTATION.to_string(),
                    SYNDICATE_MODE_UNION.to_string(),
                );
                existing
                    .labels_mut()
                    .insert(REPLICATED_LABEL_KEY.to_string(), "false".to_string());
            } else {
                existing
                    .labels_mut()
                    .insert(REPLICATED_LABEL_KEY.to_string(), "true".to_string());
            }
            self.force_endpoints_label(&namespace, &name, "false")
                .await?;
            // The shadow keeps the selector so pods still back the union.
            self.apply_service(svc, true).await?;
            if let Some(spec) = existing.spec.as_mut() {
                spec.selector = None;
            }
            return self
                .apply
                .update_service(&existing)
                .await
                .context("updating service");
        }

        if mode == SYNDICATE_MODE_SOURCE {
            if existing_mode != SYNDICATE_MODE_RECEIVER {
                // Another cluster already publishes here: demote this side to
                // a receiver and drop its shadow.
                return self
                    .demote(svc, existing, SYNDICATE_MODE_RECEIVER)
                    .await;
            }
            // The apply side is the receiver: this cluster's endpoints become
            // authoritative.
            self.force_endpoints_label(&namespace, &name, "true").await?;
            let mut existing = existing;
            existing.metadata.labels = svc.metadata.labels.clone();
            existing
                .labels_mut()
                .insert(REPLICATED_LABEL_KEY.to_string(), "true".to_string());
            if let Some(spec) = existing.spec.as_mut() {
                spec.selector = None;
            }
            return self
                .apply
                .update_service(&existing)
                .await
                .context("updating service");
        }

        if mode == SYNDICATE_MODE_RECEIVER {
            if existing_mode != SYNDICATE_MODE_SOURCE {
                return self.demote(svc, existing, SYNDICATE_MODE_SOURCE).await;
            }
            // Receiver meets source: tear down the shadow and take its
            // selector back onto the primary.
            let shadow_name = format!("{name}{SYNDICATE_SUFFIX}");
            let shadow_selector = self
                .apply
                .get_service(&namespace, &shadow_name)
                .await
                .context("looking up shadow service")?
                .spec
                .and_then(|spec| spec.selector);
            self.delete_shadow(svc).await?;

            let mut existing = existing;
            if let Some(selector) = shadow_selector {
                existing.spec.get_or_insert_with(Default::default).selector = Some(selector);
            }
            existing
                .labels_mut()
                .insert(REPLICATED_LABEL_KEY.to_string(), "false".to_string());
            self.apply
                .update_service(&existing)
                .await
                .context("updating service")?;
            return self
                .force_endpoints_label(&namespace, &shadow_name, "false")
                .await;
        }

        // Plain replication.
        if existing.name_any().is_empty() {
            return self.apply_service(svc, false).await;
        }
        let mut existing = existing;
        existing.spec.get_or_insert_with(Default::default).ports = Some(copy_ports(svc));
        existing.metadata.labels = svc.metadata.labels.clone();
        existing.labels_mut().insert(
            REPLICATED_LABEL_KEY.to_string(),
            self.config.replicated_label_value.clone(),
        );
        self.apply
            .update_service(&existing)
            .await
            .context("updating service")
    }

    pub async fn service_deleted(&self, svc: &Service) -> Result<()> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        info!(%namespace, service = %name, "deleting service");

        if syndicate_mode(svc) == SYNDICATE_MODE_SINGULAR {
            return Ok(());
        }
        self.apply
            .delete_service(&namespace, &name)
            .await
            .context("deleting service")
    }

    /// Marks the apply-side service as the opposite role and removes the
    /// shadow that carried this cluster's selector.
    async fn demote(&self, svc: &Service, mut existing: Service, role: &str) -> Result<()> {
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        self.force_endpoints_label(&namespace, &name, "false")
            .await?;
        existing
            .labels_mut()
            .insert(REPLICATED_LABEL_KEY.to_string(), "false".to_string());
        existing
            .annotations_mut()
            .insert(SYNDICATE_MODE_ANNOTATION.to_string(), role.to_string());
        self.apply
            .update_service(&existing)
            .await
            .context("updating service")?;
        self.delete_shadow(svc).await
    }

    async fn delete_shadow(&self, svc: &Service) -> Result<()> {
        let mut shadow = svc.clone();
        shadow.metadata.name = Some(format!("{}{}", svc.name_any(), SYNDICATE_SUFFIX));
        self.service_deleted(&shadow).await
    }

    fn is_replica(&self, svc: &Service) -> bool {
        has_replication_value(svc.labels(), &self.config.replicated_label_value)
    }

    /// Rewrites the replication label on the apply-side endpoints, clearing
    /// the resource version so the write bypasses optimistic concurrency.
    async fn force_endpoints_label(&self, namespace: &str, name: &str, value: &str) -> Result<()> {
        let mut endpoints = self
            .apply
            .get_endpoints(namespace, name)
            .await
            .context("looking up endpoints")?;
        endpoints
            .labels_mut()
            .insert(REPLICATED_LABEL_KEY.to_string(), value.to_string());
        endpoints.metadata.resource_version = None;
        self.apply
            .update_endpoints(&endpoints)
            .await
            .context("updating endpoints")
    }
}
