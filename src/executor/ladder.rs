//! Guaranteed-teardown ladder
//!
//! Stages run strictly in order. A stage's teardown is pushed only after its
//! acquisition succeeds, and [`Ladder::unwind`] pops every scheduled teardown
//! in reverse order however the climb ended. Teardown is not tied to the
//! run's cancellation token, and its failures are logged, never returned.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::utils::Timer;

/// Steps of the lifecycle ladder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    InstallTlsHook,
    Register,
    Join,
    StartTracks,
    OpenConnection,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::InstallTlsHook => "install-tls-hook",
            Stage::Register => "register",
            Stage::Join => "join",
            Stage::StartTracks => "start-tracks",
            Stage::OpenConnection => "open-connection",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Stack of pending teardown actions for one iteration
pub struct Ladder {
    name: String,
    pending: Vec<(Stage, Teardown)>,
    teardown_timeout: Option<Duration>,
}

impl Ladder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: Vec::new(),
            teardown_timeout: None,
        }
    }

    /// Bound each teardown so a hung collaborator cannot stall the unwind
    pub fn with_teardown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Run `acquire`; on success schedule `release` and hand back the value
    pub async fn acquire<T, A, R, Fut>(&mut self, stage: Stage, acquire: A, release: R) -> Result<T>
    where
        A: Future<Output = Result<T>>,
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let timer = Timer::start(format!("{} {stage}", self.name));
        let value = acquire.await?;
        timer.stop();
        self.defer(stage, release);
        Ok(value)
    }

    /// Like [`Ladder::acquire`], for stages that can partly succeed. On failure
    /// `release` runs right away as a compensation and is not scheduled, so
    /// the ladder still only holds teardowns of stages that succeeded.
    pub async fn acquire_compensated<T, A, R, Fut>(
        &mut self,
        stage: Stage,
        acquire: A,
        release: R,
    ) -> Result<T>
    where
        A: Future<Output = Result<T>>,
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let timer = Timer::start(format!("{} {stage}", self.name));
        match acquire.await {
            Ok(value) => {
                timer.stop();
                self.defer(stage, release);
                Ok(value)
            }
            Err(e) => {
                info!("{}: compensating failed {}", self.name, stage);
                self.release(stage, Box::new(move || release().boxed())).await;
                Err(e)
            }
        }
    }

    /// Schedule a teardown for a resource that already exists
    pub fn defer<R, Fut>(&mut self, stage: Stage, release: R)
    where
        R: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.pending.push((stage, Box::new(move || release().boxed())));
    }

    /// Number of scheduled teardowns
    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    /// Run every scheduled teardown, newest first. Returns the stages torn down.
    pub async fn unwind(mut self) -> Vec<Stage> {
        let mut unwound = Vec::with_capacity(self.pending.len());

        while let Some((stage, teardown)) = self.pending.pop() {
            info!("{}: tearing down {}", self.name, stage);
            self.release(stage, teardown).await;
            unwound.push(stage);
        }

        unwound
    }

    async fn release(&self, stage: Stage, teardown: Teardown) {
        let outcome = match self.teardown_timeout {
            Some(limit) => match tokio::time::timeout(limit, teardown()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!(
                    "teardown timed out after {}ms",
                    limit.as_millis()
                )),
            },
            None => teardown().await,
        };
        if let Err(e) = outcome {
            warn!("{}: teardown of {} failed: {:#}", self.name, stage, e);
        }
    }
}
