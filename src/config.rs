use anyhow::{Context, Result};
use clap::Parser;
use std::{fs, path::PathBuf, time::Duration};

/// Label distinguishing authoritative objects from their reflections. The
/// truthy value is configurable; reflections always carry the literal
/// `"false"`.
pub const REPLICATED_LABEL_KEY: &str = "replicated";

/// Annotation selecting how a service's endpoints are combined across
/// clusters.
pub const SYNDICATE_MODE_ANNOTATION: &str = "vmware.com/syndicate-mode";

pub const SYNDICATE_MODE_UNION: &str = "union";
pub const SYNDICATE_MODE_SOURCE: &str = "source";
pub const SYNDICATE_MODE_RECEIVER: &str = "receiver";
pub const SYNDICATE_MODE_SINGULAR: &str = "singular";

/// Suffix naming the shadow object that carries a syndicated service's
/// original selector.
pub const SYNDICATE_SUFFIX: &str = "-syndicate";

/// Services and endpoints with this name are never reconciled.
pub const KUBERNETES_SVC: &str = "kubernetes";

#[derive(Debug, Parser)]
#[clap(
    name = "syndicate-controller",
    about = "Replicates namespaces, services, and endpoints from source clusters into an apply cluster"
)]
pub struct Args {
    #[clap(
        long,
        env = "SYNDICATE_LOG",
        default_value = "syndicate_controller=info,warn"
    )]
    pub log_level: String,

    /// Secondary log sink; logging falls back to stderr only when this path
    /// cannot be opened.
    #[clap(long, default_value = "/var/log/syndicate.log")]
    pub log_file: PathBuf,

    /// Directory scanned at startup; every regular file whose name does not
    /// contain `data` is treated as one source cluster's kubeconfig.
    #[clap(long, default_value = "/etc/kubeconfigs")]
    pub kubeconfigs_dir: PathBuf,

    /// Restricts service and endpoints watches to a single namespace.
    #[clap(long, env = "NSTOWATCH")]
    pub namespace_to_watch: Option<String>,

    /// Namespaces never replicated.
    #[clap(long, env = "EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Label value marking an object as authored upstream.
    #[clap(long, default_value = "true")]
    pub replicated_label_value: String,

    /// Interval between full re-lists of each watched kind.
    #[clap(long, default_value = "300")]
    pub resync_period_secs: u64,

    #[clap(long)]
    pub namespace_watch_disabled: bool,

    #[clap(long)]
    pub endpoints_watch_disabled: bool,

    #[clap(long)]
    pub service_watch_disabled: bool,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub clusters_to_watch: Vec<PathBuf>,
    pub namespace_to_watch: Option<String>,
    pub namespaces_to_exclude: Vec<String>,
    pub replicated_label_value: String,
    pub resync_period: Duration,
    pub watch_namespaces: bool,
    pub watch_endpoints: bool,
    pub watch_services: bool,
}

impl Config {
    pub fn load(args: &Args) -> Result<Self> {
        let mut clusters_to_watch = Vec::new();
        let entries = fs::read_dir(&args.kubeconfigs_dir).with_context(|| {
            format!(
                "reading kubeconfigs directory {}",
                args.kubeconfigs_dir.display()
            )
        })?;
        for entry in entries {
            let entry = entry.context("reading kubeconfigs directory entry")?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().context("reading file type")?.is_dir() || name.contains("data") {
                continue;
            }
            clusters_to_watch.push(entry.path());
        }
        clusters_to_watch.sort();

        Ok(Self {
            clusters_to_watch,
            namespace_to_watch: args.namespace_to_watch.clone().filter(|ns| !ns.is_empty()),
            namespaces_to_exclude: args.exclude.clone(),
            replicated_label_value: args.replicated_label_value.clone(),
            resync_period: Duration::from_secs(args.resync_period_secs),
            watch_namespaces: !args.namespace_watch_disabled,
            watch_endpoints: !args.endpoints_watch_disabled,
            watch_services: !args.service_watch_disabled,
        })
    }
}
