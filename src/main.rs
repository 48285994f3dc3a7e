#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use kube::Client;
use std::{path::Path, sync::Arc};
use syndicate_controller::{
    cluster::KubeCluster,
    config::{Args, Config},
    dispatch::Dispatcher,
    reconcile::Syndicator,
    registry::NamespaceRegistry,
    watch,
};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    info!("starting syndication controller");
    let config = Arc::new(Config::load(&args)?);
    if config.clusters_to_watch.is_empty() {
        warn!(
            dir = %args.kubeconfigs_dir.display(),
            "no source-cluster kubeconfigs found; nothing will be watched"
        );
    }

    let apply_client = Client::try_default()
        .await
        .context("building apply-cluster client")?;
    let syndicator = Syndicator::new(
        KubeCluster::new(apply_client),
        config.clone(),
        NamespaceRegistry::new(),
    );
    let dispatcher = Arc::new(Dispatcher::new(syndicator));

    for path in &config.clusters_to_watch {
        let cluster = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(%cluster, "starting source-cluster watches");
        let client = watch::cluster_client(path)
            .await
            .with_context(|| format!("connecting to source cluster {cluster}"))?;
        watch::spawn_watches(client, dispatcher.clone(), &config, &cluster);
    }

    // SIGTERM is Kubernetes' graceful-shutdown signal; SIGINT covers Ctrl-C
    // during development.
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

/// Logs to stderr and, when the path can be opened, to the configured file.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("parsing log filter {}", args.log_level))?;

    let (file_layer, guard) = match file_writer(&args.log_file) {
        Ok((writer, guard)) => {
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(error) => {
            eprintln!(
                "log file {} unavailable, logging to stderr only: {error:#}",
                args.log_file.display()
            );
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .context("log file path has no file name")?
        .to_string_lossy()
        .into_owned();
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .context("opening log file")?;
    Ok(tracing_appender::non_blocking(appender))
}
