use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use udplb::config::{BackendResolution, Config, DecodeOptions};
use udplb::iface::Interface;
use udplb::loader::Attached;
use udplb::{sync, ArpResolver, NetlinkNeighbors, Reconciler};

#[derive(Debug, Parser)]
struct Opt {
    /// Interface the classifier is attached to
    #[clap(short, long, default_value = "lo")]
    iface: String,
    /// Service configuration, `config.yaml` next to the executable by default
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Compiled classifier object
    #[clap(long, default_value = "bpf/ingress.o")]
    bpf_object: PathBuf,
    /// Name of the classifier program inside the object
    #[clap(long, default_value = "ingress")]
    program: String,
    /// Name of the upstream map inside the object
    #[clap(long, default_value = "upstreams")]
    map: String,
    /// Seconds between neighbor reconciliation passes
    #[clap(long, default_value_t = 10)]
    interval: u64,
    /// Read the upstream map back after writing it
    #[clap(long)]
    verify: bool,
    /// Drop backends whose address does not resolve instead of failing
    #[clap(long)]
    skip_unresolved: bool,
    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long)]
    debug: bool,
}

impl Opt {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.config {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe().context("failed to locate the executable")?;
        let dir = exe
            .parent()
            .context("executable has no parent directory")?;
        Ok(dir.join("config.yaml"))
    }

    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            backend_resolution: if self.skip_unresolved {
                BackendResolution::SkipUnresolved
            } else {
                BackendResolution::Strict
            },
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }
}

fn load_config(opt: &Opt) -> Result<Config, anyhow::Error> {
    let path = opt.config_path()?;
    let config = Config::load(&path, &opt.decode_options())
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    info!(
        "loaded {} service(s) with {} backend(s) from {}",
        config.len(),
        config.backends().count(),
        path.display()
    );
    Ok(config)
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();
    init_logging(opt.debug);
    info!("cli config: interface={}, debug={}", opt.iface, opt.debug);

    let config = Arc::new(load_config(&opt).context("failed to load config")?);
    let iface = Interface::lookup(&opt.iface)
        .with_context(|| format!("failed to look up interface {}", opt.iface))?;

    let mut attached = Attached::load(&opt.bpf_object, &opt.program, &opt.iface)?;
    {
        let mut upstreams = attached.upstreams(&opt.map)?;
        sync::synchronize(&config, &mut upstreams, opt.verify)
            .context("failed to synchronize the upstream table")?;
    }

    let neighbors = NetlinkNeighbors::new().context("failed to open netlink socket")?;
    let mut reconciler = Reconciler::new(
        config.clone(),
        iface.index,
        neighbors,
        ArpResolver::new(&iface),
    )
    .with_interval(opt.interval());

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { reconciler.run(cancel).await }
    });

    info!("Waiting for Ctrl-C...");
    shutdown_signal().await?;
    info!("Exiting...");

    cancel.cancel();
    task.await.context("neighbor reconciliation panicked")?;
    attached.detach()?;

    Ok(())
}
