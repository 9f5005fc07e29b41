//! Task queue port for leaderboard aggregation.
//!
//! Delivery is at-least-once and unordered across scores; the aggregator is
//! a full recompute, so redelivery is harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::QueueConfig;
use crate::error::{GroundGameError, Result};
use crate::leaderboard::LeaderboardAggregator;
use crate::metrics::MetricsCollector;
use crate::models::ScoreId;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, score_id: ScoreId) -> Result<()>;
}

/// Runs the aggregator before `enqueue` returns.
pub struct InlineTaskQueue {
    aggregator: Arc<LeaderboardAggregator>,
}

impl InlineTaskQueue {
    pub fn new(aggregator: Arc<LeaderboardAggregator>) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl TaskQueue for InlineTaskQueue {
    async fn enqueue(&self, score_id: ScoreId) -> Result<()> {
        self.aggregator.on_score_created(score_id).await
    }
}

#[derive(Debug, Clone, Copy)]
struct Delivery {
    score_id: ScoreId,
    attempt: u32,
}

/// Bounded in-process queue drained by a background worker.
pub struct ChannelTaskQueue {
    sender: Mutex<Option<mpsc::Sender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelTaskQueue {
    /// Create the queue and spawn its worker on the current runtime.
    pub fn spawn_worker(aggregator: Arc<LeaderboardAggregator>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity);
        let worker = tokio::spawn(run_worker(aggregator, receiver, sender.downgrade(), config));
        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stop accepting work, let the worker drain what is queued and wait for it.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender.lock().await.take();
        if let Some(worker) = self.worker.lock().await.take() {
            worker
                .await
                .map_err(|e| GroundGameError::Queue(format!("worker panicked: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for ChannelTaskQueue {
    async fn enqueue(&self, score_id: ScoreId) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or_else(|| GroundGameError::Queue("queue is shut down".into()))?;
        sender
            .send(Delivery {
                score_id,
                attempt: 1,
            })
            .await
            .map_err(|_| GroundGameError::Queue("worker stopped".into()))
    }
}

async fn run_worker(
    aggregator: Arc<LeaderboardAggregator>,
    mut receiver: mpsc::Receiver<Delivery>,
    retry: mpsc::WeakSender<Delivery>,
    config: QueueConfig,
) {
    let metrics = MetricsCollector::default();

    // Scheduled redeliveries hold a sender, so `recv` only yields `None`
    // once shutdown was requested and no retry is pending.
    while let Some(delivery) = receiver.recv().await {
        metrics.set_queue_depth(receiver.len());
        debug!(score_id = %delivery.score_id, attempt = delivery.attempt, "Running aggregation task");

        match aggregator.on_score_created(delivery.score_id).await {
            Ok(()) => {}
            Err(err) if delivery.attempt < config.max_attempts => {
                let delay = backoff(config.retry_base_ms, delivery.attempt);
                warn!(
                    score_id = %delivery.score_id,
                    attempt = delivery.attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Aggregation failed, scheduling redelivery"
                );
                let next = Delivery {
                    score_id: delivery.score_id,
                    attempt: delivery.attempt + 1,
                };
                match retry.upgrade() {
                    Some(sender) => {
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            if sender.send(next).await.is_err() {
                                warn!(score_id = %next.score_id, "Queue closed before redelivery");
                            }
                        });
                    }
                    None => {
                        // Shutting down: finish the remaining attempts here.
                        tokio::time::sleep(delay).await;
                        redeliver_inline(&aggregator, next, &config).await;
                    }
                }
            }
            Err(err) => {
                error!(
                    score_id = %delivery.score_id,
                    attempts = delivery.attempt,
                    error = %err,
                    "Aggregation failed permanently, dropping task"
                );
            }
        }
    }
    debug!("Aggregation worker stopped");
}

async fn redeliver_inline(aggregator: &LeaderboardAggregator, mut delivery: Delivery, config: &QueueConfig) {
    loop {
        match aggregator.on_score_created(delivery.score_id).await {
            Ok(()) => return,
            Err(err) if delivery.attempt < config.max_attempts => {
                warn!(score_id = %delivery.score_id, attempt = delivery.attempt, error = %err, "Redelivery failed");
                tokio::time::sleep(backoff(config.retry_base_ms, delivery.attempt)).await;
                delivery.attempt += 1;
            }
            Err(err) => {
                error!(
                    score_id = %delivery.score_id,
                    attempts = delivery.attempt,
                    error = %err,
                    "Aggregation failed permanently, dropping task"
                );
                return;
            }
        }
    }
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}
