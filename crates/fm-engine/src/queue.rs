//! Ordered and fan-out execution of per-item steps.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;

use crate::{Error, Result};

/// What a serial run does after a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Stop,
    Continue,
}

/// Shared cancellation flag, checked before each serial step.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Run `step` over `items` one at a time, in order. With [`OnError::Stop`]
/// the returned list ends at the first failure. A cancelled run ends with
/// `Err(Cancelled)`.
pub async fn run_serial<I, T, F, Fut>(
    items: impl IntoIterator<Item = I>,
    on_error: OnError,
    cancel: &Cancellation,
    mut step: F,
) -> Vec<Result<T>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut results = Vec::new();
    for item in items {
        if let Err(e) = cancel.check() {
            results.push(Err(e));
            break;
        }
        let result = step(item).await;
        let failed = result.is_err();
        results.push(result);
        if failed && on_error == OnError::Stop {
            break;
        }
    }
    results
}

/// Run `step` for every item concurrently and wait for all of them to
/// settle. Results keep the input order.
pub async fn run_parallel<I, T, F, Fut>(items: impl IntoIterator<Item = I>, step: F) -> Vec<Result<T>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    join_all(items.into_iter().map(step)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    async fn record(log: &Mutex<Vec<u32>>, n: u32) -> Result<u32> {
        log.lock().unwrap().push(n);
        if n == 2 {
            Err(Error::UnknownMachine(n.to_string()))
        } else {
            Ok(n)
        }
    }

    #[tokio::test]
    async fn serial_stop_ends_at_first_failure() {
        let log = Mutex::new(Vec::new());
        let results = run_serial(1..=4, OnError::Stop, &Cancellation::new(), |n| record(&log, n)).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
        assert_eq!(*log.lock().unwrap(), [1, 2]);
    }

    #[tokio::test]
    async fn serial_continue_runs_everything() {
        let log = Mutex::new(Vec::new());
        let results = run_serial(1..=4, OnError::Continue, &Cancellation::new(), |n| record(&log, n)).await;
        assert_eq!(results.len(), 4);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
        assert_eq!(*log.lock().unwrap(), [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancellation_is_checked_before_each_step() {
        let cancel = Cancellation::new();
        let log = Mutex::new(Vec::new());
        let results = run_serial([1, 3, 4], OnError::Continue, &cancel, |n| {
            if n == 3 {
                cancel.cancel();
            }
            record(&log, n)
        })
        .await;
        assert_eq!(*log.lock().unwrap(), [1, 3]);
        assert!(matches!(results.last(), Some(Err(Error::Cancelled))));
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_steps_overlap_and_keep_order() {
        let started = tokio::time::Instant::now();
        let results = run_parallel([3u64, 1, 2], |secs| async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok::<_, Error>(secs)
        })
        .await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, [3, 1, 2]);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}
