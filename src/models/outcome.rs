//! Scenario outcomes and scan reports
//!
//! A [`ScenarioOutcome`] is built through one named constructor per state and
//! never changes afterwards.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ErrorKind, HammerError};
use crate::models::Scenario;
use crate::session::CertificateInfo;

/// Outcome state of a scenario
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioState {
    Unknown,
    Pass,
    Fail,
    Skip,
}

impl ScenarioState {
    pub fn symbol(&self) -> &'static str {
        match self {
            ScenarioState::Unknown => "?",
            ScenarioState::Pass => "✓",
            ScenarioState::Fail => "✗",
            ScenarioState::Skip => "○",
        }
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioState::Unknown => write!(f, "UNKNOWN"),
            ScenarioState::Pass => write!(f, "PASS"),
            ScenarioState::Fail => write!(f, "FAIL"),
            ScenarioState::Skip => write!(f, "SKIP"),
        }
    }
}

/// Result of one scenario
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioOutcome {
    scenario: Scenario,
    state: ScenarioState,
    certificate_days: Option<i64>,
    reason: Option<String>,
    error_kind: Option<ErrorKind>,
    error_detail: Option<String>,
}

impl ScenarioOutcome {
    fn new(scenario: Scenario, state: ScenarioState) -> Self {
        Self {
            scenario,
            state,
            certificate_days: None,
            reason: None,
            error_kind: None,
            error_detail: None,
        }
    }

    /// Not yet attempted
    pub fn unknown(scenario: Scenario) -> Self {
        Self::new(scenario, ScenarioState::Unknown)
    }

    pub fn pass(scenario: Scenario, certificate_valid_for: Option<Duration>) -> Self {
        Self {
            certificate_days: certificate_valid_for.map(|d| d.num_days().max(0)),
            ..Self::new(scenario, ScenarioState::Pass)
        }
    }

    pub fn fail(scenario: Scenario, error: &HammerError) -> Self {
        Self {
            reason: Some(error.to_string()),
            error_kind: Some(error.kind()),
            error_detail: Some(error.detail()),
            ..Self::new(scenario, ScenarioState::Fail)
        }
    }

    pub fn skip(scenario: Scenario, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(scenario, ScenarioState::Skip)
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn state(&self) -> ScenarioState {
        self.state
    }

    /// Whole days of certificate validity left, never negative
    pub fn certificate_days(&self) -> Option<i64> {
        self.certificate_days
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:9} {}",
            self.state.symbol(),
            self.scenario.name(),
            self.state
        )?;
        if let Some(days) = self.certificate_days {
            write!(f, " (certificate valid for {days} days)")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " - {reason}")?;
        }
        Ok(())
    }
}

/// All scenario outcomes for one media server. Scenarios the scan never
/// reached stay [`ScenarioState::Unknown`].
#[derive(Clone, Debug, Serialize)]
pub struct ScanReport {
    pub media_server_id: String,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub outcomes: Vec<ScenarioOutcome>,
    pub certificates: BTreeMap<String, CertificateInfo>,
}

impl ScanReport {
    pub fn new(media_server_id: impl Into<String>, outcomes: Vec<ScenarioOutcome>) -> Self {
        Self {
            media_server_id: media_server_id.into(),
            duration_ms: 0,
            cancelled: false,
            outcomes,
            certificates: BTreeMap::new(),
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_certificates(mut self, certificates: BTreeMap<String, CertificateInfo>) -> Self {
        self.certificates = certificates;
        self
    }

    pub fn with_cancelled(mut self, cancelled: bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    pub fn count(&self, state: ScenarioState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(ScenarioState::Fail) > 0
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Media Server {}", self.media_server_id)?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for outcome in &self.outcomes {
            writeln!(f, "  {outcome}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        write!(
            f,
            "Pass: {} | Fail: {} | Skip: {} | Duration: {}ms",
            self.count(ScenarioState::Pass),
            self.count(ScenarioState::Fail),
            self.count(ScenarioState::Skip),
            self.duration_ms
        )?;
        if self.cancelled {
            write!(f, " (cancelled, {} unknown)", self.count(ScenarioState::Unknown))?;
        }
        writeln!(f)
    }
}

/// Reports of a whole scan run, in discovery order
#[derive(Clone, Debug, Serialize)]
pub struct ScanSummary {
    pub reports: Vec<ScanReport>,
    pub cancelled: bool,
}

impl ScanSummary {
    pub fn new(reports: Vec<ScanReport>, cancelled: bool) -> Self {
        Self { reports, cancelled }
    }

    pub fn count(&self, state: ScenarioState) -> usize {
        self.reports.iter().map(|report| report.count(state)).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(ScanReport::has_failures)
    }
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            writeln!(f, "{report}")?;
        }
        write!(
            f,
            "Media Servers: {} | Pass: {} | Fail: {} | Skip: {}",
            self.reports.len(),
            self.count(ScenarioState::Pass),
            self.count(ScenarioState::Fail),
            self.count(ScenarioState::Skip)
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FanOutError;

    #[test]
    fn test_unknown_is_initial_state() {
        let outcome = ScenarioOutcome::unknown(Scenario::Host);
        assert_eq!(outcome.state(), ScenarioState::Unknown);
        assert!(outcome.reason().is_none());
    }

    #[test]
    fn test_pass_certificate_days() {
        let outcome = ScenarioOutcome::pass(Scenario::Turns, Some(Duration::hours(24 * 45 + 5)));
        assert_eq!(outcome.certificate_days(), Some(45));

        let expired = ScenarioOutcome::pass(Scenario::Turns, Some(Duration::days(-3)));
        assert_eq!(expired.certificate_days(), Some(0));

        let plain = ScenarioOutcome::pass(Scenario::Host, None);
        assert_eq!(plain.certificate_days(), None);
    }

    #[test]
    fn test_fail_captures_error() {
        let error = HammerError::connection_open(
            "Connection could not be opened.",
            FanOutError::Faulted(vec![anyhow::anyhow!("ice failed")]),
        );
        let outcome = ScenarioOutcome::fail(Scenario::TurnUdp, &error);
        assert_eq!(outcome.state(), ScenarioState::Fail);
        assert_eq!(outcome.reason(), Some("Connection could not be opened."));
        assert_eq!(outcome.error_kind(), Some(ErrorKind::ConnectionOpen));
    }

    #[test]
    fn test_report_counts_and_json() {
        let report = ScanReport::new(
            "ms-1",
            vec![
                ScenarioOutcome::pass(Scenario::Host, None),
                ScenarioOutcome::skip(Scenario::Stun, "Skipped by configuration"),
                ScenarioOutcome::pass(Scenario::Turns, Some(Duration::days(10))),
            ],
        );
        assert_eq!(report.count(ScenarioState::Pass), 2);
        assert_eq!(report.count(ScenarioState::Skip), 1);
        assert!(!report.has_failures());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][1]["state"], "skip");
        assert_eq!(json["outcomes"][2]["certificate_days"], 10);
        assert!(json["outcomes"][2].get("certificate_valid_for").is_none());
        assert_eq!(json["cancelled"], false);
    }

    #[test]
    fn test_cancelled_summary_keeps_partial_reports() {
        let finished = ScanReport::new("ms-1", vec![ScenarioOutcome::pass(Scenario::Host, None)]);
        let partial = ScanReport::new(
            "ms-2",
            vec![
                ScenarioOutcome::pass(Scenario::Host, None),
                ScenarioOutcome::unknown(Scenario::Stun),
            ],
        )
        .with_cancelled(true);
        let summary = ScanSummary::new(vec![finished, partial], true);

        assert_eq!(summary.count(ScenarioState::Pass), 2);
        assert_eq!(summary.count(ScenarioState::Unknown), 1);
        assert!(!summary.has_failures());

        let table = summary.to_string();
        assert!(table.contains("? STUN"));
        assert!(table.contains("(cancelled, 1 unknown)"));
        assert!(table.trim_end().ends_with("(cancelled)"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["cancelled"], true);
        assert_eq!(json["reports"][1]["outcomes"][1]["state"], "unknown");
    }
}
