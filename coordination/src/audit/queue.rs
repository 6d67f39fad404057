//! Bounded admission for auditor invocations: a single dispatcher task owns
//! the concurrency permit pool so no lock is ever held around the queue
//! itself (C3).

use super::driver::AuditorDriver;
use super::error::EngineError;
use super::types::AuditResult;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, warn};

struct Job {
    submission: String,
    reply: oneshot::Sender<Result<AuditResult, EngineError>>,
    enqueued_at: Instant,
}

/// Handle used by callers to submit work to the queue. Cheap to clone; all
/// clones share the same dispatcher task.
#[derive(Clone)]
pub struct AuditQueue {
    sender: mpsc::Sender<Job>,
}

impl AuditQueue {
    /// Spawn the dispatcher task. `permits` bounds how many auditor
    /// invocations run concurrently; `queue_capacity` bounds how many
    /// requests may wait for a permit before admission is refused outright.
    pub fn spawn(
        driver: Arc<dyn AuditorDriver>,
        permits: usize,
        queue_capacity: usize,
        queue_wait_timeout: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        tokio::spawn(dispatch_loop(receiver, driver, permits, queue_wait_timeout));
        Self { sender }
    }

    /// Submit a submission for auditing and wait for its result, subject to
    /// the configured queue-wait deadline. Returns `QueueFull` immediately
    /// if the bounded channel is already at capacity, or `QueueTimeout` if
    /// the job is still waiting for a permit when the deadline elapses.
    pub async fn submit(&self, submission: String) -> Result<AuditResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            submission,
            reply: reply_tx,
            enqueued_at: Instant::now(),
        };

        if self.sender.try_send(job).is_err() {
            return Err(EngineError::QueueFull {
                capacity: self.sender.capacity(),
            });
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::QueueTimeout {
                waited_secs: 0,
            }),
        }
    }
}

/// The dispatcher: pulls jobs off the channel, acquires a permit (racing the
/// per-job wait deadline), then spawns the actual auditor invocation so the
/// dispatcher itself never blocks on one slow audit.
async fn dispatch_loop(
    mut receiver: mpsc::Receiver<Job>,
    driver: Arc<dyn AuditorDriver>,
    permits: usize,
    queue_wait_timeout: Duration,
) {
    let semaphore = Arc::new(Semaphore::new(permits));

    while let Some(job) = receiver.recv().await {
        let waited = job.enqueued_at.elapsed();
        let remaining = queue_wait_timeout.saturating_sub(waited);

        let semaphore = semaphore.clone();
        let driver = driver.clone();

        tokio::spawn(async move {
            let permit = match tokio::time::timeout(remaining, semaphore.acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    warn!("semaphore closed unexpectedly");
                    let _ = job.reply.send(Err(EngineError::QueueTimeout {
                        waited_secs: job.enqueued_at.elapsed().as_secs(),
                    }));
                    return;
                }
                Err(_) => {
                    let _ = job.reply.send(Err(EngineError::QueueTimeout {
                        waited_secs: job.enqueued_at.elapsed().as_secs(),
                    }));
                    return;
                }
            };

            debug!(waited_ms = waited.as_millis() as u64, "admitted for audit");
            let result = driver.audit(&job.submission).await;
            drop(permit);
            let _ = job.reply.send(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::types::Verdict;
    use async_trait::async_trait;

    struct DelayedDriver {
        delay: Duration,
    }

    #[async_trait]
    impl AuditorDriver for DelayedDriver {
        async fn audit(&self, _submission: &str) -> Result<AuditResult, EngineError> {
            tokio::time::sleep(self.delay).await;
            Ok(AuditResult {
                overall_score: 80,
                verdict: Verdict::Pass,
                dimensions: Vec::new(),
                summary: "ok".to_string(),
                inline_comments: Vec::new(),
                judge_cards: Vec::new(),
                raw_auditor_id: "delayed".to_string(),
            })
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn single_permit_serializes_two_concurrent_submissions() {
        let driver: Arc<dyn AuditorDriver> = Arc::new(DelayedDriver {
            delay: Duration::from_millis(20),
        });
        let queue = AuditQueue::spawn(driver, 1, 8, Duration::from_secs(5));

        let q1 = queue.clone();
        let q2 = queue.clone();
        let (r1, r2) = tokio::join!(
            q1.submit("a".to_string()),
            q2.submit("b".to_string())
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());
    }

    #[tokio::test]
    async fn queue_wait_timeout_fires_when_permit_never_frees() {
        let driver: Arc<dyn AuditorDriver> = Arc::new(DelayedDriver {
            delay: Duration::from_secs(5),
        });
        let queue = AuditQueue::spawn(driver, 1, 8, Duration::from_millis(50));

        let _occupying = {
            let q = queue.clone();
            tokio::spawn(async move { q.submit("occupying".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result = queue.submit("second".to_string()).await;
        assert!(matches!(result, Err(EngineError::QueueTimeout { .. })));
    }

    #[tokio::test]
    async fn try_send_rejects_once_channel_buffer_is_saturated() {
        // The dispatcher's own recv loop drains the channel continuously,
        // so observing `QueueFull` end-to-end would require racing faster
        // than the dispatcher can dequeue. Exercise the admission check
        // directly against a channel with no consumer instead.
        let (sender, _receiver) = mpsc::channel::<Job>(1);
        let (reply_tx, _reply_rx) = oneshot::channel();
        sender
            .try_send(Job {
                submission: "first".to_string(),
                reply: reply_tx,
                enqueued_at: Instant::now(),
            })
            .expect("first send fills the single buffer slot");

        let (reply_tx2, _reply_rx2) = oneshot::channel();
        let second = sender.try_send(Job {
            submission: "second".to_string(),
            reply: reply_tx2,
            enqueued_at: Instant::now(),
        });
        assert!(second.is_err(), "second send must be rejected while the buffer is full");
    }
}
