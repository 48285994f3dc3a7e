use crate::{
    cluster::ClusterApi,
    config::Config,
    dispatch::{Dispatcher, Snapshot},
};
use ahash::AHashMap;
use anyhow::{Context, Result};
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::{
    api::Api,
    config::{KubeConfigOptions, Kubeconfig},
    runtime::watcher,
    Client, ResourceExt,
};
use std::{fmt::Debug, path::Path, sync::Arc, time::Duration};
use tracing::{info, info_span, warn, Instrument};

const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Builds a client for one source cluster from its kubeconfig file.
pub async fn cluster_client(path: &Path) -> Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("reading kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("building client config")?;
    Client::try_from(config).context("building client")
}

/// Spawns one long-lived watch loop per enabled kind on the given cluster.
pub fn spawn_watches<C>(
    client: Client,
    dispatcher: Arc<Dispatcher<C>>,
    config: &Config,
    cluster: &str,
) where
    C: ClusterApi + 'static,
{
    if config.watch_namespaces {
        let api = Api::<Namespace>::all(client.clone());
        tokio::spawn(
            watch_kind(api, dispatcher.clone(), config.resync_period)
                .instrument(info_span!("namespaces", %cluster)),
        );
    }
    if config.watch_endpoints {
        let api = match &config.namespace_to_watch {
            Some(ns) => Api::<Endpoints>::namespaced(client.clone(), ns),
            None => Api::<Endpoints>::all(client.clone()),
        };
        tokio::spawn(
            watch_kind(api, dispatcher.clone(), config.resync_period)
                .instrument(info_span!("endpoints", %cluster)),
        );
    }
    if config.watch_services {
        let api = match &config.namespace_to_watch {
            Some(ns) => Api::<Service>::namespaced(client.clone(), ns),
            None => Api::<Service>::all(client),
        };
        tokio::spawn(
            watch_kind(api, dispatcher, config.resync_period)
                .instrument(info_span!("services", %cluster)),
        );
    }
}

/// Runs the watch for one kind until process exit, re-establishing the stream
/// on failure (with capped backoff) and on every re-sync interval so the full
/// list is replayed through the dispatcher.
async fn watch_kind<K, C>(api: Api<K>, dispatcher: Arc<Dispatcher<C>>, resync: Duration)
where
    K: kube::Resource<DynamicType = ()>
        + Clone
        + Debug
        + serde::de::DeserializeOwned
        + Send
        + 'static,
    Snapshot: From<K>,
    C: ClusterApi,
{
    // Last snapshot delivered per object, used to tell creations from
    // updates and to hand the previous snapshot to the update callback.
    let mut seen: AHashMap<String, K> = AHashMap::new();
    let mut backoff = Duration::from_secs(1);
    loop {
        let stream = watcher(api.clone(), watcher::Config::default());
        futures::pin_mut!(stream);
        let resync_timer = tokio::time::sleep(resync);
        tokio::pin!(resync_timer);
        info!("watch stream opened");

        let failed = loop {
            tokio::select! {
                event = stream.try_next() => match event {
                    Ok(Some(watcher::Event::Applied(obj))) => {
                        deliver(&dispatcher, &mut seen, obj).await;
                    }
                    Ok(Some(watcher::Event::Deleted(obj))) => {
                        seen.remove(&object_key(&obj));
                        dispatcher.object_deleted(obj.into()).await;
                    }
                    Ok(Some(watcher::Event::Restarted(objs))) => {
                        for obj in objs {
                            deliver(&dispatcher, &mut seen, obj).await;
                        }
                    }
                    Ok(None) => break true,
                    Err(error) => {
                        warn!(%error, "watch stream failed");
                        break true;
                    }
                },
                _ = &mut resync_timer => {
                    info!("re-sync interval reached; replaying list");
                    break false;
                }
            }
        };

        if failed {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        } else {
            backoff = Duration::from_secs(1);
        }
    }
}

async fn deliver<K, C>(dispatcher: &Dispatcher<C>, seen: &mut AHashMap<String, K>, obj: K)
where
    K: kube::Resource<DynamicType = ()> + Clone,
    Snapshot: From<K>,
    C: ClusterApi,
{
    let key = object_key(&obj);
    match seen.insert(key, obj.clone()) {
        Some(previous) => {
            let previous: Snapshot = previous.into();
            dispatcher.object_updated(&previous, obj.into()).await;
        }
        None => dispatcher.object_created(obj.into()).await,
    }
}

fn object_key<K: kube::Resource<DynamicType = ()>>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}
