//! Multi-iteration and multi-server drivers

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{pending_outcomes, ClusterIteration, ScanIteration};
use crate::config::HammerConfig;
use crate::error::{HammerError, Result};
use crate::executor::{FanOut, FanOutError};
use crate::models::{
    IterationResult, IterationSummary, MediaServerInfo, ScanReport, ScanSummary, Scenario,
    ScenarioOutcome, ScenarioState,
};
use crate::session::MediaStack;
use crate::utils::Timer;

/// Runs cluster iterations back to back
pub struct ClusterRunner {
    stack: Arc<dyn MediaStack>,
    config: Arc<HammerConfig>,
}

impl ClusterRunner {
    pub fn new(stack: Arc<dyn MediaStack>, config: Arc<HammerConfig>) -> Self {
        Self { stack, config }
    }

    /// Run the configured number of iterations. Only cancellation ends the
    /// run early; failed iterations are recorded and the next one starts.
    pub async fn run(&self, cancel: &CancellationToken) -> IterationSummary {
        let total = self.config.iterations;
        info!("Running {} cluster iteration(s)", total);

        let mut results = Vec::new();
        for iteration in 1..=total {
            if cancel.is_cancelled() {
                break;
            }
            info!("=== Iteration {}/{} ===", iteration, total);

            let timer = Timer::start(format!("iteration {iteration}"));
            let outcome = ClusterIteration::new(self.stack.clone(), self.config.clone())
                .run(cancel)
                .await;
            let duration_ms = timer.elapsed_ms();

            let result = match outcome {
                Ok(()) => IterationResult::pass(iteration, duration_ms),
                Err(e) if e.is_cancelled() => {
                    warn!("Iteration {} cancelled", iteration);
                    break;
                }
                Err(e) => {
                    error!("Iteration {} failed: {}", iteration, e.detail());
                    IterationResult::fail(iteration, duration_ms, &e)
                }
            };
            info!("  {}", result);
            results.push(result);

            let interval = self.config.iteration_interval();
            if iteration < total && !interval.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        let summary = IterationSummary::new(results, cancel.is_cancelled());
        info!(
            "Cluster test completed: {}/{} passed ({:.1}%)",
            summary.passed,
            summary.total,
            summary.pass_rate()
        );
        summary
    }
}

/// Scans every eligible media server of the cluster
pub struct ScanRunner {
    stack: Arc<dyn MediaStack>,
    config: Arc<HammerConfig>,
}

impl ScanRunner {
    pub fn new(stack: Arc<dyn MediaStack>, config: Arc<HammerConfig>) -> Self {
        Self { stack, config }
    }

    /// Media servers to scan, restricted to the configured ids if any
    pub async fn targets(&self, cancel: &CancellationToken) -> Result<Vec<MediaServerInfo>> {
        let servers = FanOut::new(cancel)
            .with_deadline(self.config.stage_timeout())
            .run_one(self.stack.media_servers())
            .await
            .map_err(|e| match e {
                FanOutError::Cancelled => HammerError::Cancelled,
                other => HammerError::Discovery(other.into()),
            })?;

        let wanted = &self.config.media_server_ids;
        Ok(servers
            .into_iter()
            .filter(|server| wanted.is_empty() || wanted.contains(&server.id))
            .collect())
    }

    /// One report per target, in discovery order. After cancellation the
    /// remaining targets are reported with every scenario still unknown.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ScanSummary> {
        let targets = match self.targets(cancel).await {
            Ok(targets) => targets,
            Err(e) if e.is_cancelled() => {
                warn!("Scan cancelled during discovery");
                return Ok(ScanSummary::new(Vec::new(), true));
            }
            Err(e) => return Err(e),
        };
        info!("Scanning {} media server(s)", targets.len());

        let mut reports = Vec::with_capacity(targets.len());
        for server in &targets {
            if cancel.is_cancelled() {
                let outcomes = pending_outcomes(&self.config);
                reports.push(ScanReport::new(&server.id, outcomes).with_cancelled(true));
                continue;
            }
            let report = self.scan(server, cancel).await;
            info!(
                "Media Server {}: {} passed, {} failed, {} skipped",
                report.media_server_id,
                report.count(ScenarioState::Pass),
                report.count(ScenarioState::Fail),
                report.count(ScenarioState::Skip)
            );
            reports.push(report);
        }

        Ok(ScanSummary::new(reports, cancel.is_cancelled()))
    }

    /// Scan one server. Failures before the scenario matrix fail every
    /// included scenario.
    pub async fn scan(&self, server: &MediaServerInfo, cancel: &CancellationToken) -> ScanReport {
        let timer = Timer::start(format!("scan {}", server.id));

        if let Some(reason) = server.skip_reason() {
            warn!("{}", reason);
            let outcomes = Scenario::all()
                .into_iter()
                .map(|scenario| ScenarioOutcome::skip(scenario, reason.clone()))
                .collect();
            return ScanReport::new(&server.id, outcomes).with_duration_ms(timer.elapsed_ms());
        }

        info!("Scanning Media Server {}...", server.id);
        let iteration = ScanIteration::new(self.stack.clone(), self.config.clone());
        let report = match iteration.run(&server.id, cancel).await {
            Ok(report) => report,
            Err(e) => {
                error!("Media Server {} scan failed: {}", server.id, e.detail());
                ScanReport::new(&server.id, self.fail_all(&e))
                    .with_certificates(iteration.certificates().snapshot())
            }
        };
        report.with_duration_ms(timer.elapsed_ms())
    }

    /// Outcomes when the iteration never reached the scenario matrix
    fn fail_all(&self, error: &HammerError) -> Vec<ScenarioOutcome> {
        pending_outcomes(&self.config)
            .into_iter()
            .map(|outcome| match outcome.state() {
                ScenarioState::Unknown => ScenarioOutcome::fail(outcome.scenario(), error),
                _ => outcome,
            })
            .collect()
    }
}
