//! Cluster iteration results

use serde::Serialize;
use std::fmt;

use crate::error::{ErrorKind, HammerError};

/// Result of one cluster test iteration
#[derive(Clone, Debug, Serialize)]
pub struct IterationResult {
    pub iteration: u32,
    pub duration_ms: u64,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
}

impl IterationResult {
    pub fn pass(iteration: u32, duration_ms: u64) -> Self {
        Self {
            iteration,
            duration_ms,
            error_kind: None,
            message: None,
        }
    }

    pub fn fail(iteration: u32, duration_ms: u64, error: &HammerError) -> Self {
        Self {
            iteration,
            duration_ms,
            error_kind: Some(error.kind()),
            message: Some(error.detail()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

impl fmt::Display for IterationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = if self.is_success() { "✓" } else { "✗" };
        write!(
            f,
            "{symbol} Iteration {} [{}ms]",
            self.iteration, self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary over a run of cluster iterations
#[derive(Clone, Debug, Serialize)]
pub struct IterationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub results: Vec<IterationResult>,
}

impl IterationSummary {
    pub fn new(results: Vec<IterationResult>, cancelled: bool) -> Self {
        let total = results.len();
        let passed = results.iter().filter(|r| r.is_success()).count();
        Self {
            total,
            passed,
            failed: total - passed,
            cancelled,
            results,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

impl fmt::Display for IterationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cluster Test")?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        write!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Pass Rate: {:.1}%",
            self.total,
            self.passed,
            self.failed,
            self.pass_rate()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        writeln!(f)
    }
}
