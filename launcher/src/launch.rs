//! Launcher configuration and output.

use std::io::Write;
use std::path::{Path, PathBuf};

use rendezvous_core::{RendezvousConfig, RendezvousState, Result, TfConfig};

use crate::Args;

/// How the launcher obtains the cluster descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mode {
    Rendezvous,
    FromJson(PathBuf),
    Localhost { base_port: u16 },
}

impl Mode {
    pub(crate) fn from_args(args: &Args) -> Self {
        if let Some(path) = &args.from_json {
            Self::FromJson(path.clone())
        } else if args.localhost {
            Self::Localhost {
                base_port: args.base_port,
            }
        } else {
            Self::Rendezvous
        }
    }
}

/// Build the configuration: file, then `RDV_*` environment, then flags.
pub(crate) fn load_config(args: &Args) -> Result<RendezvousConfig> {
    let config = match &args.config {
        Some(path) => RendezvousConfig::read_file(path)?,
        None => RendezvousConfig::default(),
    };
    let mut config = config.with_env_overrides();
    apply_args(args, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_args(args: &Args, config: &mut RendezvousConfig) {
    if let Some(n_workers) = args.n_workers {
        config.cluster.n_workers = n_workers;
    }
    if let Some(worker_idx) = args.worker_idx {
        config.cluster.worker_ordinal = worker_idx;
    }
    if let Some(comm_folder) = &args.comm_folder {
        config.store.comm_folder = comm_folder.clone();
    }
    if let Some(port) = args.initial_port {
        config.ports.range_start = port;
    }
    if let Some(port) = args.final_port {
        config.ports.range_end = port;
    }
    if args.reserve_port {
        config.ports.reserve = true;
    }
    if let Some(address) = &args.advertise_address {
        config.network.advertise_address = Some(address.clone());
    }
    if let Some(run_id) = &args.run_id {
        config.store.run_id = Some(run_id.clone());
    }
    if let Some(secs) = args.timeout_secs {
        config.quorum.timeout_ms = Some(secs.saturating_mul(1000));
    }
    if let Some(interval) = args.poll_interval_ms {
        config.quorum.poll_interval_ms = interval;
    }
}

/// Name of the step a rendezvous failed in, given the state it stopped at.
pub(crate) fn failed_step(state: RendezvousState) -> &'static str {
    match state {
        RendezvousState::Resolving => "resolve",
        RendezvousState::Resolved => "publish",
        RendezvousState::Published | RendezvousState::AwaitingQuorum => "await quorum",
        RendezvousState::Complete => "assemble",
    }
}

/// Print the cluster config on stdout and optionally write it to `output`.
pub(crate) fn emit(config: &TfConfig, output: Option<&Path>) -> Result<()> {
    let json = config.to_json()?;

    if let Some(path) = output {
        config.write_file(path)?;
        tracing::info!("Wrote cluster config to {}", path.display());
    }

    let mut stdout = std::io::stdout().lock();
    // A closed stdout is fine when the config went to a file.
    if let Err(e) = writeln!(stdout, "{json}") {
        if output.is_none() {
            return Err(rendezvous_core::RendezvousError::serialization(format!(
                "failed to write cluster config to stdout: {e}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rendezvous_core::ClusterDescriptor;
    use tempfile::{NamedTempFile, TempDir};

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("rendezvous").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_positional_arguments() {
        let args = parse(&["4", "1", "/shared/tfcluster"]);
        let mut config = RendezvousConfig::default();
        apply_args(&args, &mut config);

        assert_eq!(config.cluster.n_workers, 4);
        assert_eq!(config.cluster.worker_ordinal, 1);
        assert_eq!(config.store.comm_folder, PathBuf::from("/shared/tfcluster"));
        assert_eq!(config.ports.range_start, 49152);
        assert_eq!(config.ports.range_end, 65535);
        assert_eq!(Mode::from_args(&args), Mode::Rendezvous);
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&[
            "2",
            "0",
            "/shared",
            "--initial-port",
            "20000",
            "--final-port",
            "21000",
            "--advertise-address",
            "10.1.2.3",
            "--run-id",
            "job-7",
            "--timeout-secs",
            "30",
            "--poll-interval-ms",
            "250",
            "--reserve-port",
        ]);
        let mut config = RendezvousConfig::default();
        apply_args(&args, &mut config);

        assert_eq!(config.ports.range(), rendezvous_core::PortRange::new(20000, 21000));
        assert!(config.ports.reserve);
        assert_eq!(config.network.advertise_address.as_deref(), Some("10.1.2.3"));
        assert_eq!(config.store.location(), PathBuf::from("/shared/job-7"));
        assert_eq!(config.quorum.timeout_ms, Some(30_000));
        assert_eq!(config.quorum.poll_interval_ms, 250);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        let mut config: RendezvousConfig = r#"
            [ports]
            range_start = 30000
            range_end = 30999

            [quorum]
            timeout_ms = 5000
        "#
        .parse()
        .unwrap();

        apply_args(&parse(&["3", "2"]), &mut config);

        assert_eq!(config.ports.range_start, 30000);
        assert_eq!(config.quorum.timeout_ms, Some(5000));
        assert_eq!(config.cluster.worker_ordinal, 2);
    }

    #[test]
    fn test_config_file_completed_by_flags() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cluster]\nworker_ordinal = 2").unwrap();
        let path = file.path().to_str().unwrap();

        let config = load_config(&parse(&["4", "2", "/shared", "--config", path])).unwrap();

        assert_eq!(config.cluster.n_workers, 4);
        assert_eq!(config.cluster.worker_ordinal, 2);
    }

    #[test]
    fn test_merged_config_is_validated() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cluster]\nn_workers = 4").unwrap();
        let path = file.path().to_str().unwrap();

        let result = load_config(&parse(&["--config", path, "--initial-port", "70"]));
        assert!(result.is_ok());

        let result = load_config(&parse(&["4", "4", "--config", path]));
        assert!(result.is_err());
    }

    #[test]
    fn test_modes() {
        assert_eq!(
            Mode::from_args(&parse(&["--from-json", "cluster.json"])),
            Mode::FromJson(PathBuf::from("cluster.json"))
        );
        assert_eq!(
            Mode::from_args(&parse(&["3", "0", "--localhost"])),
            Mode::Localhost { base_port: 12345 }
        );
        assert_eq!(
            Mode::from_args(&parse(&["3", "0", "--localhost", "--base-port", "2222"])),
            Mode::Localhost { base_port: 2222 }
        );
    }

    #[test]
    fn test_conflicting_modes_rejected() {
        let result = Args::try_parse_from([
            "rendezvous",
            "--from-json",
            "cluster.json",
            "--localhost",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_failed_step() {
        assert_eq!(failed_step(RendezvousState::Resolving), "resolve");
        assert_eq!(failed_step(RendezvousState::Resolved), "publish");
        assert_eq!(failed_step(RendezvousState::AwaitingQuorum), "await quorum");
    }

    #[test]
    fn test_emit_writes_output_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cluster.json");
        let config = ClusterDescriptor::localhost(2, 1, 12345).unwrap().to_tf_config();

        emit(&config, Some(&path)).unwrap();

        assert_eq!(TfConfig::from_file(&path).unwrap(), config);
    }
}
