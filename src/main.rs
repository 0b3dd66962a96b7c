//! Media Hammer - end-to-end health checks for media session clusters
//!
//! Drives simulated participants through registration, channel membership,
//! track start and connection open, then verifies that decoded media
//! actually arrives. The scan mode repeats a single-participant session for
//! every network path (host, STUN, TURN over UDP, TCP and TLS) against every
//! media server of the cluster.
//!
//! ## Usage
//!
//! ```bash
//! # Run ten two-participant iterations
//! media-hammer cluster --iterations 10
//!
//! # Scan one media server, skipping the STUN scenario
//! media-hammer scan --media-server ms-1 --skip stun
//!
//! # List the scenario matrix
//! media-hammer scenarios
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod config;
mod error;
mod executor;
mod iteration;
mod liveness;
mod models;
mod session;
mod sim;
mod utils;

use cli::{Args, ClusterArgs, Command, ConfigAction, ConfigArgs, OutputFormat, ScanArgs};
use config::{EnvConfig, HammerConfig};
use iteration::{ClusterRunner, ScanRunner};
use models::{MediaServerInfo, Scenario};
use sim::{SimFaults, SimOptions, SimStack};
use utils::init_logger;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(env.log_level(args.verbose));
    if env.has_any() {
        debug!("Applying MEDIA_HAMMER_* environment overrides");
    }

    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = HammerConfig::resolve(config_path.as_deref())?;
    env.apply_to(&mut config);

    match args.command {
        Command::Cluster(cluster_args) => run_cluster(config, cluster_args).await,
        Command::Scan(scan_args) => run_scan(config, scan_args).await,
        Command::Scenarios => {
            list_scenarios(&config);
            Ok(ExitCode::SUCCESS)
        }
        Command::Config(config_args) => {
            manage_config(&config, config_args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Root token, cancelled on Ctrl-C
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, tearing down...");
            trigger.cancel();
        }
    });
    cancel
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn run_cluster(mut config: HammerConfig, args: ClusterArgs) -> Result<ExitCode> {
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(timeout) = args.media_timeout {
        config.media_timeout_secs = timeout;
    }
    config.validate()?;

    let faults = SimFaults {
        fail_register: args.fail_register,
        silent_audio: args.silent_audio,
        black_video: args.black_video,
        ..Default::default()
    };
    let stack = SimStack::new(SimOptions::default().with_faults(faults));

    info!(
        "Testing cluster at {} ({} iteration(s))",
        config.gateway_url, config.iterations
    );

    let cancel = shutdown_token();
    let summary = ClusterRunner::new(Arc::new(stack), Arc::new(config))
        .run(&cancel)
        .await;

    match args.format {
        OutputFormat::Table => println!("\n{summary}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(exit_code(summary.cancelled || !summary.is_all_passed()))
}

async fn run_scan(mut config: HammerConfig, args: ScanArgs) -> Result<ExitCode> {
    if !args.media_servers.is_empty() {
        config.media_server_ids = args.media_servers;
    }
    for scenario in args.skip {
        if !config.skip_scenarios.contains(&scenario) {
            config.skip_scenarios.push(scenario);
        }
    }
    config.validate()?;

    let faults = SimFaults {
        fail_open_for: args.fail_scenario,
        wrong_media_server: args.mismatch,
        ..Default::default()
    };
    let mut options = SimOptions::default().with_faults(faults);
    if let Some(draining) = args.draining {
        let servers = mark_draining(options.media_servers.clone(), &draining);
        options = options.with_media_servers(servers);
    }
    let stack = SimStack::new(options);

    info!("Scanning cluster at {}", config.gateway_url);

    let cancel = shutdown_token();
    let summary = ScanRunner::new(Arc::new(stack), Arc::new(config))
        .run(&cancel)
        .await?;
    if summary.cancelled {
        warn!("Scan cancelled, unfinished scenarios are reported as unknown");
    }

    match args.format {
        OutputFormat::Table => println!("\n{summary}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(exit_code(summary.cancelled || summary.has_failures()))
}

/// Flag `id` as draining, adding it when the cluster does not know it
fn mark_draining(mut servers: Vec<MediaServerInfo>, id: &str) -> Vec<MediaServerInfo> {
    match servers.iter_mut().find(|server| server.id == id) {
        Some(server) => server.draining = true,
        None => {
            let mut server = MediaServerInfo::new(id);
            server.draining = true;
            servers.push(server);
        }
    }
    servers
}

fn list_scenarios(config: &HammerConfig) {
    println!("\nScan Scenarios ({} total)\n", Scenario::all().len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for scenario in Scenario::all() {
        let excluded = if config.should_test(scenario) {
            ""
        } else {
            " (excluded)"
        };
        println!(
            "  {}. {:9} [{:8}] gather: {}{}",
            scenario.number(),
            scenario.name(),
            scenario.slug(),
            scenario.gather_policy(),
            excluded
        );
    }

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn manage_config(config: &HammerConfig, args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            print!("{}", serde_yaml::to_string(&config.redacted())?);
        }

        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                bail!(
                    "Configuration file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }

            HammerConfig::default().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
            println!("\nEdit the file to customize your settings.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_draining() {
        let servers = vec![MediaServerInfo::new("ms-1"), MediaServerInfo::new("ms-2")];
        let marked = mark_draining(servers.clone(), "ms-2");
        assert!(!marked[0].draining);
        assert!(marked[1].draining);

        let added = mark_draining(servers, "ms-9");
        assert_eq!(added.len(), 3);
        assert_eq!(added[2].skip_reason().as_deref(), Some("Media Server ms-9 is draining."));
    }
}
