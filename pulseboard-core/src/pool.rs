//! Bounded worker pool for concurrent fan-out
//!
//! A [`WorkerPool`] caps how many jobs run at once. It is built once and reused
//! across aggregation cycles; cloning it shares the same permits.
//!
//! Jobs are spawned onto the tokio runtime, so dropping the future returned by
//! [`WorkerPool::map`] does not cancel jobs that are already running.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Why a pooled job produced no value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("job cancelled")]
    Cancelled,
}

/// Semaphore-bounded set of concurrent jobs
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs at once (minimum 1).
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` over every item and wait for all jobs to settle.
    ///
    /// Results come back in input order. A job that panics yields
    /// `Err(JobFailure::Panicked)` without affecting the others.
    pub async fn map<T, R, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<Result<R, JobFailure>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
    {
        let handles: Vec<_> = items
            .into_iter()
            .map(|item| {
                let permits = Arc::clone(&self.permits);
                let job = f(item);
                tokio::spawn(async move {
                    // The semaphore is never closed, so acquire only fails if it was.
                    let _permit = permits.acquire_owned().await.ok();
                    job.await
                })
            })
            .collect();

        tracing::debug!(pool = self.name, jobs = handles.len(), "Dispatched jobs");

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::error!(pool = self.name, %message, "Pooled job panicked");
                    Err(JobFailure::Panicked(message))
                }
                Err(_) => Err(JobFailure::Cancelled),
            };
            results.push(result);
        }
        results
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_in_input_order() {
        let pool = WorkerPool::new("test", 2);
        let results = pool
            .map(vec![30u64, 10, 20], |delay| async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay
            })
            .await;
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("bounded", 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.map((0..8).collect::<Vec<_>>(), |_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let pool = WorkerPool::new("panics", 4);
        let results = pool
            .map(vec![1, 2, 3], |n| async move {
                if n == 2 {
                    panic!("bad job");
                }
                n * 10
            })
            .await;

        assert_eq!(results[0], Ok(10));
        assert!(matches!(&results[1], Err(JobFailure::Panicked(m)) if m.contains("bad job")));
        assert_eq!(results[2], Ok(30));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new("tiny", 0).size(), 1);
    }
}
