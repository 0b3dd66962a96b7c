//! Test iterations
//!
//! A cluster iteration verifies media between two participants. A scan
//! iteration walks the scenario matrix against one media server. The runners
//! repeat iterations and collect their results.

mod cluster;
mod runner;
mod scan;

pub use cluster::ClusterIteration;
pub use runner::{ClusterRunner, ScanRunner};
pub use scan::{pending_outcomes, ScanIteration};
