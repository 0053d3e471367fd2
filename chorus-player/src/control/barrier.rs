//! Per-session serializer for user-visible audio operations
//!
//! Skip, prev, select, pause-toggle, mixer-restart, and shuffle intents all
//! pass through here: strict FIFO, one executing at a time, a per-operation
//! timeout, and a global minimum throttle between completions. An operation
//! submitted before the throttle elapses is rejected synchronously rather
//! than queued. Failures never poison the barrier.
//!
//! This is distinct from the command queue: the barrier protects against
//! concurrent *intents*, the command queue against concurrent *sidecar
//! commands*.

use crate::error::{Error, Result};
use chorus_common::params;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

pub struct AudioOperationBarrier {
    /// FIFO execution slot (tokio's Mutex wakes waiters in FIFO order)
    slot: Mutex<()>,
    /// Completion time of the most recent operation
    last_completion: StdMutex<Option<Instant>>,
    /// Name of the operation currently executing (observability)
    current_op: StdMutex<Option<&'static str>>,
}

impl AudioOperationBarrier {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(()),
            last_completion: StdMutex::new(None),
            current_op: StdMutex::new(None),
        }
    }

    /// Name of the operation currently executing, if any
    pub fn current_op(&self) -> Option<&'static str> {
        self.current_op.lock().ok().and_then(|g| *g)
    }

    /// Run `op` under the barrier.
    ///
    /// Rejects synchronously with `Throttled` when submitted within the
    /// minimum throttle of the previous completion; fails the operation (but
    /// not the barrier) with `OperationTimeout` when its body exceeds the
    /// per-operation timeout.
    pub async fn run<F, T>(&self, name: &'static str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let min_throttle = params::get::barrier_min_throttle();
        if let Some(remaining) = self.throttle_remaining(min_throttle) {
            debug!(op = name, remaining_ms = remaining.as_millis() as u64, "operation throttled");
            return Err(Error::Throttled {
                retry_after_ms: remaining.as_millis() as u64,
            });
        }

        let guard = self.slot.lock().await;
        if let Ok(mut current) = self.current_op.lock() {
            *current = Some(name);
        }

        let op_timeout = params::get::barrier_timeout();
        let result = match timeout(op_timeout, op).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op = name, timeout_ms = op_timeout.as_millis() as u64, "operation timed out");
                Err(Error::OperationTimeout(name.to_string()))
            }
        };

        if let Ok(mut current) = self.current_op.lock() {
            *current = None;
        }
        if let Ok(mut last) = self.last_completion.lock() {
            *last = Some(Instant::now());
        }
        drop(guard);

        result
    }

    fn throttle_remaining(&self, min_throttle: Duration) -> Option<Duration> {
        let last = self.last_completion.lock().ok().and_then(|g| *g)?;
        let elapsed = last.elapsed();
        if elapsed < min_throttle {
            Some(min_throttle - elapsed)
        } else {
            None
        }
    }
}

impl Default for AudioOperationBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_common::params::PARAMS;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serializes tests that touch the global PARAMS singleton
    static PARAM_GUARD: StdMutex<()> = StdMutex::new(());

    fn param_guard() -> std::sync::MutexGuard<'static, ()> {
        PARAM_GUARD.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[tokio::test]
    async fn test_ops_execute_one_at_a_time() {
        let _params = param_guard();
        let barrier = Arc::new(AudioOperationBarrier::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let barrier = barrier.clone();
            let running = running.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                // Throttling is not under test here; ignore rejections.
                let _ = barrier
                    .run("op", async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_throttle_rejects_synchronously() {
        let _params = param_guard();
        let barrier = AudioOperationBarrier::new();

        barrier.run("first", async { Ok(()) }).await.unwrap();

        // Submitted right after completion: rejected, not queued.
        let second = barrier.run("second", async { Ok(()) }).await;
        match second {
            Err(Error::Throttled { retry_after_ms }) => assert!(retry_after_ms > 0),
            other => panic!("expected Throttled, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_does_not_poison_barrier() {
        let _params = param_guard();
        // Shrink the timings so the test stays fast.
        let saved_timeout = *PARAMS.barrier_timeout_ms.read().unwrap();
        let saved_throttle = *PARAMS.barrier_min_throttle_ms.read().unwrap();
        *PARAMS.barrier_timeout_ms.write().unwrap() = 20;
        *PARAMS.barrier_min_throttle_ms.write().unwrap() = 0;

        let barrier = AudioOperationBarrier::new();
        let result: Result<()> = barrier
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::OperationTimeout(_))));

        // The barrier still accepts and runs operations.
        barrier.run("after", async { Ok(()) }).await.unwrap();

        *PARAMS.barrier_timeout_ms.write().unwrap() = saved_timeout;
        *PARAMS.barrier_min_throttle_ms.write().unwrap() = saved_throttle;
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_barrier() {
        let _params = param_guard();
        let saved_throttle = *PARAMS.barrier_min_throttle_ms.read().unwrap();
        *PARAMS.barrier_min_throttle_ms.write().unwrap() = 0;

        let barrier = AudioOperationBarrier::new();
        let result: Result<()> = barrier
            .run("failing", async { Err(Error::MixerDead) })
            .await;
        assert!(matches!(result, Err(Error::MixerDead)));

        barrier.run("after", async { Ok(()) }).await.unwrap();

        *PARAMS.barrier_min_throttle_ms.write().unwrap() = saved_throttle;
    }
}
