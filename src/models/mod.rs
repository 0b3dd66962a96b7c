//! Data models for media cluster testing
//!
//! Scenarios, outcomes, media server descriptions and iteration results.

mod iteration;
mod media_server;
mod outcome;
mod scenario;
mod stream;

pub use iteration::{IterationResult, IterationSummary};
pub use media_server::MediaServerInfo;
pub use outcome::{ScanReport, ScanSummary, ScenarioOutcome, ScenarioState};
pub use scenario::Scenario;
pub use stream::StreamType;
