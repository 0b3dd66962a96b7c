//! Stage execution engine
//!
//! Concurrent fan-out for the operations inside a stage and the teardown
//! ladder that orders the stages themselves.

mod fanout;
mod ladder;

pub use fanout::{settle, FanOut, FanOutError};
pub use ladder::{Ladder, Stage};
