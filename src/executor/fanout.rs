//! Fan-out/fan-in execution
//!
//! Starts a group of independent operations together and races the joined
//! group against a cancellation token and an optional deadline.

use futures::future::join_all;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a fan-out did not succeed
#[derive(Error, Debug)]
pub enum FanOutError {
    /// The group completed and at least one operation failed
    #[error("{}", describe_faults(.0))]
    Faulted(Vec<anyhow::Error>),

    /// The deadline expired before the group completed
    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// The cancellation token fired before the group completed
    #[error("cancelled")]
    Cancelled,
}

fn describe_faults(errors: &[anyhow::Error]) -> String {
    let causes: Vec<String> = errors.iter().map(|e| format!("{e:#}")).collect();
    format!("{} operation(s) faulted: {}", errors.len(), causes.join("; "))
}

/// Concurrent executor for one stage
#[derive(Clone, Debug)]
pub struct FanOut {
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl FanOut {
    pub fn new(cancel: &CancellationToken) -> Self {
        Self {
            cancel: cancel.clone(),
            deadline: None,
        }
    }

    /// Bound the wait to `deadline` from the moment `run` is called
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run every operation concurrently.
    ///
    /// Cancellation wins over everything else, then the deadline, then the
    /// group. Operations still in flight when cancellation or the deadline
    /// wins are dropped. On success the values come back in input order.
    pub async fn run<T, F>(&self, operations: Vec<F>) -> Result<Vec<T>, FanOutError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let count = operations.len();
        self.race(count, async move { reduce(join_all(operations).await) }).await
    }

    /// Race a single operation the same way
    pub async fn run_one<T, F>(&self, operation: F) -> Result<T, FanOutError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        self.race(1, async move {
            operation.await.map_err(|e| FanOutError::Faulted(vec![e]))
        })
        .await
    }

    async fn race<T>(
        &self,
        count: usize,
        group: impl Future<Output = Result<T, FanOutError>>,
    ) -> Result<T, FanOutError> {
        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!("Fan-out of {} operation(s) cancelled", count);
                Err(FanOutError::Cancelled)
            }
            _ = expiry => {
                let limit = deadline.unwrap_or_default();
                debug!("Fan-out of {} operation(s) timed out after {}ms", count, limit.as_millis());
                Err(FanOutError::TimedOut(limit))
            }
            outcome = group => outcome,
        }
    }
}

/// Await every teardown operation; failures are reported together
pub async fn settle<F>(operations: impl IntoIterator<Item = F>) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let errors: Vec<anyhow::Error> = join_all(operations)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(FanOutError::Faulted(errors).into())
    }
}

fn reduce<T>(results: Vec<anyhow::Result<T>>) -> Result<Vec<T>, FanOutError> {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => errors.push(e),
        }
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(FanOutError::Faulted(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn ok_after(ms: u64, value: u32) -> BoxFuture<'static, anyhow::Result<u32>> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        }
        .boxed()
    }

    fn fail_after(ms: u64, message: &'static str) -> BoxFuture<'static, anyhow::Result<u32>> {
        async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Err(anyhow::anyhow!(message))
        }
        .boxed()
    }

    fn never() -> BoxFuture<'static, anyhow::Result<u32>> {
        std::future::pending().boxed()
    }

    #[tokio::test]
    async fn test_all_succeed_in_input_order() {
        let cancel = CancellationToken::new();
        let values = assert_ok!(
            FanOut::new(&cancel)
                .run(vec![ok_after(30, 1), ok_after(5, 2), ok_after(15, 3)])
                .await
        );
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_operations_run_concurrently() {
        let cancel = CancellationToken::new();
        let start = Instant::now();
        let values = FanOut::new(&cancel)
            .run(vec![ok_after(100, 1), ok_after(100, 2), ok_after(100, 3)])
            .await
            .unwrap();
        assert_eq!(values.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_single_fault_is_carried() {
        let cancel = CancellationToken::new();
        let err = assert_err!(
            FanOut::new(&cancel)
                .run(vec![ok_after(5, 1), fail_after(5, "register rejected")])
                .await
        );
        match err {
            FanOutError::Faulted(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].to_string(), "register rejected");
            }
            other => panic!("expected faulted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_faults_are_aggregated() {
        let cancel = CancellationToken::new();
        let err = FanOut::new(&cancel)
            .run(vec![fail_after(5, "first"), ok_after(1, 1), fail_after(10, "second")])
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("2 operation(s) faulted"));
        assert!(message.contains("first") && message.contains("second"));
    }

    #[tokio::test]
    async fn test_cancel_before_completion() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = FanOut::new(&cancel)
            .run(vec![never(), fail_after(200, "late")])
            .await
            .unwrap_err();
        assert!(matches!(err, FanOutError::Cancelled));
    }

    #[tokio::test]
    async fn test_already_cancelled_wins_over_ready_group() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = FanOut::new(&cancel)
            .run(vec![ok_after(0, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, FanOutError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_with_partial_completion_times_out() {
        let cancel = CancellationToken::new();
        let err = FanOut::new(&cancel)
            .with_deadline(Some(Duration::from_millis(30)))
            .run(vec![ok_after(1, 1), never()])
            .await
            .unwrap_err();
        assert!(matches!(err, FanOutError::TimedOut(d) if d == Duration::from_millis(30)));
    }

    #[tokio::test]
    async fn test_empty_group_succeeds() {
        let cancel = CancellationToken::new();
        let values: Vec<u32> = FanOut::new(&cancel)
            .run(Vec::<BoxFuture<'static, anyhow::Result<u32>>>::new())
            .await
            .unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn test_run_one() {
        let cancel = CancellationToken::new();
        let fanout = FanOut::new(&cancel);
        assert_eq!(assert_ok!(fanout.run_one(ok_after(1, 7)).await), 7);

        let err = assert_err!(fanout.run_one(fail_after(1, "join rejected")).await);
        assert!(matches!(err, FanOutError::Faulted(ref errors) if errors.len() == 1));

        cancel.cancel();
        let err = assert_err!(fanout.run_one(never()).await);
        assert!(matches!(err, FanOutError::Cancelled));
    }

    #[tokio::test]
    async fn test_settle_waits_for_all_and_joins_failures() {
        let finished = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let step = |ms: u64, fail: bool| {
            let finished = finished.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if fail {
                    anyhow::bail!("close timed out");
                }
                Ok(())
            }
        };

        let err = settle(vec![step(1, true), step(20, false), step(5, true)])
            .await
            .unwrap_err();
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(err.to_string().starts_with("2 operation(s) faulted"));

        assert!(settle(vec![step(1, false)]).await.is_ok());
    }
}
