//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::models::Scenario;

/// End-to-end health checks for real-time media session clusters
#[derive(Parser, Debug)]
#[command(name = "media-hammer")]
#[command(version)]
#[command(about = "Verify that media flows through every network path of a session cluster")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (JSON or YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run two-participant media iterations against the cluster
    Cluster(ClusterArgs),

    /// Run the scenario matrix against each media server
    Scan(ScanArgs),

    /// List the scan scenarios in matrix order
    Scenarios,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Report rendering
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Arguments for cluster command
#[derive(Parser, Debug)]
pub struct ClusterArgs {
    /// Number of iterations
    #[arg(short, long)]
    pub iterations: Option<u32>,

    /// Seconds to wait for media on every stream
    #[arg(long)]
    pub media_timeout: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Simulator: reject client registration
    #[arg(long)]
    pub fail_register: bool,

    /// Simulator: send silent audio
    #[arg(long)]
    pub silent_audio: bool,

    /// Simulator: send black video
    #[arg(long)]
    pub black_video: bool,
}

/// Arguments for scan command
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Only scan this media server (repeatable)
    #[arg(short, long = "media-server")]
    pub media_servers: Vec<String>,

    /// Exclude a scenario (repeatable)
    #[arg(short, long)]
    pub skip: Vec<Scenario>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,

    /// Simulator: fail connections opened for this scenario (repeatable)
    #[arg(long)]
    pub fail_scenario: Vec<Scenario>,

    /// Simulator: land connections on a different media server
    #[arg(long)]
    pub mismatch: bool,

    /// Simulator: report this media server as draining
    #[arg(long)]
    pub draining: Option<String>,
}

/// Arguments for config management
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as YAML
    Show,

    /// Write a default configuration file
    Init {
        /// Output path
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_args() {
        let args = Args::parse_from([
            "media-hammer",
            "cluster",
            "--iterations",
            "10",
            "--format",
            "json",
            "--silent-audio",
        ]);
        match args.command {
            Command::Cluster(cluster) => {
                assert_eq!(cluster.iterations, Some(10));
                assert_eq!(cluster.format, OutputFormat::Json);
                assert!(cluster.silent_audio);
                assert!(!cluster.black_video);
            }
            _ => panic!("Expected Cluster command"),
        }
    }

    #[test]
    fn test_scan_args_parse_scenarios() {
        let args = Args::parse_from([
            "media-hammer",
            "--verbose",
            "scan",
            "--media-server",
            "ms-1",
            "--media-server",
            "ms-2",
            "--skip",
            "turn-udp",
            "--skip",
            "stun",
            "--fail-scenario",
            "turns",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Scan(scan) => {
                assert_eq!(scan.media_servers, vec!["ms-1", "ms-2"]);
                assert_eq!(scan.skip, vec![Scenario::TurnUdp, Scenario::Stun]);
                assert_eq!(scan.fail_scenario, vec![Scenario::Turns]);
                assert_eq!(scan.format, OutputFormat::Table);
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_unknown_scenario_is_rejected() {
        let parsed = Args::try_parse_from(["media-hammer", "scan", "--skip", "carrier-pigeon"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_config_init() {
        let args = Args::parse_from([
            "media-hammer",
            "-c",
            "base.yaml",
            "config",
            "init",
            "out.yaml",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("base.yaml")));
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("out.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
