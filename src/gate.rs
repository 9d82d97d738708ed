//! Rate-Limited Request Gate (C2): a single-flight FIFO queue enforcing a
//! minimum inter-request delay against the provider.
//!
//! The dispatch loop is the same shape as the teacher's DB-write worker
//! in `broker.rs` (`mpsc` channel feeding a dedicated `tokio::spawn`ed
//! loop) — generalized from "batch writes every 20ms" to "dispatch one
//! provider call every `MinDelay()`".

use crate::error::{CoreError, CoreResult};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Fixed backoff applied before a single retry on 429/403, per §4.2.
const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of invoking a submitted thunk. C2 only needs to know whether
/// the attempt succeeded, failed outright, or failed in a way that
/// warrants exactly one retry (429/403) — interpreting HTTP specifics is
/// C4's job, not the gate's.
pub enum GateAttempt {
    Success(Value),
    RetryableStatus(CoreError),
    Failure(CoreError),
}

type Thunk = Box<dyn Fn() -> BoxFuture<'static, GateAttempt> + Send>;

struct GateJob {
    thunk: Thunk,
    retried: bool,
    result_tx: oneshot::Sender<CoreResult<Value>>,
}

/// A handle for querying the current minimum inter-request delay. This is
/// a closure rather than a hard dependency on `RateController` so the
/// gate can be unit-tested without constructing a whole adaptive
/// controller.
pub type MinDelayFn = Arc<dyn Fn() -> Duration + Send + Sync>;

#[derive(Clone)]
pub struct RequestGate {
    submit_tx: mpsc::UnboundedSender<GateJob>,
}

impl RequestGate {
    pub fn new(min_delay: MinDelayFn) -> Self {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(submit_rx, min_delay));
        Self { submit_tx }
    }

    /// `Submit(thunk) -> result`: enqueue and suspend the caller until the
    /// gate dispatches it. FIFO strict, per §4.2's ordering guarantee.
    pub async fn submit<F>(&self, thunk: F) -> CoreResult<Value>
    where
        F: Fn() -> BoxFuture<'static, GateAttempt> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job = GateJob { thunk: Box::new(thunk), retried: false, result_tx };

        if self.submit_tx.send(job).is_err() {
            return Err(CoreError::TransportError("request gate has shut down".to_string()));
        }

        result_rx
            .await
            .unwrap_or_else(|_| Err(CoreError::TransportError("request gate dropped the response".to_string())))
    }
}

async fn dispatch_loop(mut submit_rx: mpsc::UnboundedReceiver<GateJob>, min_delay: MinDelayFn) {
    let mut queue: VecDeque<GateJob> = VecDeque::new();
    // Stored as millis-since-epoch so the loop has a cheap, clonable clock reference.
    let last_dispatch_at_ms = AtomicI64::new(0);

    loop {
        if queue.is_empty() {
            match submit_rx.recv().await {
                Some(job) => queue.push_back(job),
                None => return, // all senders dropped; gate shutting down
            }
        }

        // Drain anything else that arrived without blocking, preserving FIFO.
        while let Ok(job) = submit_rx.try_recv() {
            queue.push_back(job);
        }

        let Some(mut job) = queue.pop_front() else { continue };

        if job.result_tx.is_closed() {
            debug!("skipping gate job whose caller already cancelled");
            continue;
        }

        let delay = min_delay();
        if !delay.is_zero() {
            let last = last_dispatch_at_ms.load(Ordering::SeqCst);
            let now = now_ms();
            let elapsed = Duration::from_millis((now - last).max(0) as u64);
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }

        if job.result_tx.is_closed() {
            continue;
        }

        let attempt = (job.thunk)().await;
        last_dispatch_at_ms.store(now_ms(), Ordering::SeqCst);

        match attempt {
            GateAttempt::Success(value) => {
                let _ = job.result_tx.send(Ok(value));
            }
            GateAttempt::RetryableStatus(err) => {
                if job.retried {
                    let _ = job.result_tx.send(Err(err));
                } else {
                    warn!(error = %err, "provider returned 429/403, retrying once after backoff");
                    job.retried = true;
                    // Re-enqueue at the head per §4.2 and actually retry the call
                    // after the fixed backoff, rather than just delaying the failure.
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    queue.push_front(job);
                }
            }
            GateAttempt::Failure(err) => {
                let _ = job.result_tx.send(Err(err));
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn no_delay() -> MinDelayFn {
        Arc::new(|| Duration::ZERO)
    }

    fn fixed_delay(ms: u64) -> MinDelayFn {
        Arc::new(move || Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn submits_complete_in_order() {
        let gate = RequestGate::new(no_delay());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let gate = gate.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _ = gate
                    .submit(move || {
                        let order = order.clone();
                        Box::pin(async move {
                            order.lock().unwrap().push(i);
                            GateAttempt::Success(serde_json::json!(i))
                        })
                    })
                    .await;
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn enforces_minimum_delay_between_dispatches() {
        let gate = RequestGate::new(fixed_delay(30));
        let started = Instant::now();

        for _ in 0..3 {
            let gate = gate.clone();
            gate.submit(|| Box::pin(async { GateAttempt::Success(serde_json::json!(1)) })).await.unwrap();
        }

        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_then_surfaces_error() {
        let gate = RequestGate::new(no_delay());
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let submitted = tokio::spawn(async move {
            gate.submit(move || {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move { GateAttempt::RetryableStatus(CoreError::RateLimited) })
            })
            .await
        });

        tokio::time::advance(RETRY_BACKOFF + Duration::from_millis(1)).await;
        let result = submitted.await.unwrap();

        assert!(matches!(result, Err(CoreError::RateLimited)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
