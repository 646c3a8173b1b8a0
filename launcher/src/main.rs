//! Filesystem Rendezvous Launcher
//!
//! This binary runs one participant's rendezvous and prints the resulting
//! cluster config as JSON on stdout, for the training process to consume.
//!
//! # Usage
//!
//! ```bash
//! # Participant 1 of a 4-worker job sharing /mnt/shared/tfcluster
//! rendezvous 4 1 /mnt/shared/tfcluster > cluster.json
//!
//! # Custom port range, written atomically to a file
//! rendezvous 4 1 /mnt/shared/tfcluster --initial-port 20000 --final-port 21000 --output cluster.json
//!
//! # Hand-written cluster config instead of a rendezvous
//! rendezvous --from-json cluster.json
//!
//! # Everything on this machine, ports 12345 and up
//! rendezvous 3 0 --localhost
//! ```

mod launch;

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use launch::{emit, failed_step, load_config, Mode};
use rendezvous_core::{ClusterDescriptor, Rendezvous, TfConfig};

/// Filesystem rendezvous for distributed training workers
#[derive(Parser, Debug)]
#[command(name = "rendezvous")]
#[command(about = "Discover the other workers of a training job through a shared directory")]
pub(crate) struct Args {
    /// Total number of participants, including the parameter server
    n_workers: Option<u32>,

    /// Ordinal of this participant (0 is the parameter server)
    worker_idx: Option<u32>,

    /// Directory shared by all participants
    comm_folder: Option<PathBuf>,

    /// First port of the range to allocate from [default: 49152]
    #[arg(long)]
    initial_port: Option<u16>,

    /// Last port of the range to allocate from [default: 65535]
    #[arg(long)]
    final_port: Option<u16>,

    /// Host to advertise instead of the detected address
    #[arg(long)]
    advertise_address: Option<String>,

    /// Keep this run's entries in a subdirectory of the shared directory
    #[arg(long)]
    run_id: Option<String>,

    /// Give up waiting for the other workers after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Interval between two reads of the shared directory [default: 1000]
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Bind the chosen port until the cluster is assembled
    #[arg(long)]
    reserve_port: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the cluster config to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Load the cluster config from a JSON file instead of running a rendezvous
    #[arg(long, conflicts_with = "localhost")]
    from_json: Option<PathBuf>,

    /// Put every participant on localhost instead of running a rendezvous
    #[arg(long)]
    localhost: bool,

    /// First port of the localhost topology
    #[arg(long, default_value = "12345")]
    base_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging. Stdout carries the cluster config, so logs go to stderr.
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&args)?;

    let descriptor = match Mode::from_args(&args) {
        Mode::FromJson(path) => {
            tracing::info!("Loading cluster config from {}", path.display());
            ClusterDescriptor::from_tf_config(&TfConfig::from_file(&path)?)?
        }
        Mode::Localhost { base_port } => {
            tracing::info!("Using a localhost cluster starting at port {}", base_port);
            ClusterDescriptor::localhost(
                config.cluster.n_workers,
                config.cluster.worker_ordinal,
                base_port,
            )?
        }
        Mode::Rendezvous => {
            let cancel = CancellationToken::new();
            let ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, abandoning rendezvous...");
                    ctrl_c.cancel();
                }
            });

            let mut rendezvous = Rendezvous::new(config)?;
            let descriptor = match rendezvous.run(&cancel).await {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    let step = failed_step(rendezvous.state());
                    tracing::error!("Rendezvous failed during {}: {}", step, e);
                    return Err(format!("rendezvous failed during {step}: {e}").into());
                }
            };

            // The trainer binds the port itself once this process exits.
            if let Some(reservation) = rendezvous.take_reservation() {
                reservation.release();
            }
            descriptor
        }
    };

    emit(&descriptor.to_tf_config(), args.output.as_deref())?;
    Ok(())
}
