//! Background loop that finds due campaign messages and dispatches them.
//!
//! Each tick claims a batch of due rows (`scheduled` -> `sending`) and fans
//! them out over a bounded pool of tasks. Claiming is what guarantees a row is
//! handed to at most one worker, even with several instances polling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::config::DispatchSettings;
use crate::dispatch::{DispatchOutcome, DispatchWorker};
use crate::errors::AppError;
use crate::store::CrmStore;

/// How long rate-limit entries are kept, in hours.
const RATE_LIMIT_RETENTION_HOURS: i64 = 24;
/// Minimum spacing between prune runs, in minutes.
const PRUNE_EVERY_MINUTES: i64 = 60;

/// Counters for one poll tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct DispatchPoller {
    store: Arc<dyn CrmStore>,
    worker: DispatchWorker,
    settings: DispatchSettings,
    last_prune: Option<DateTime<Utc>>,
}

impl DispatchPoller {
    pub fn new(store: Arc<dyn CrmStore>, worker: DispatchWorker, settings: DispatchSettings) -> Self {
        Self {
            store,
            worker,
            settings,
            last_prune: None,
        }
    }

    /// Claims and dispatches every row due at `now`, waiting for all sends.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<TickReport, AppError> {
        let due = self
            .store
            .claim_due_messages(now, self.settings.batch_size)
            .await?;

        let mut report = TickReport {
            claimed: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }
        tracing::debug!("Claimed {} due campaign message(s)", due.len());

        let permits = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for message in due {
            let worker = self.worker.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let message_id = message.message_id;
                (message_id, worker.dispatch(message).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(DispatchOutcome::Sent(_)))) => report.sent += 1,
                Ok((_, Ok(DispatchOutcome::Failed(_)))) => report.failed += 1,
                Ok((message_id, Err(e))) => {
                    // Row stays in `sending`; it will not be picked up again.
                    tracing::error!(
                        "Could not record outcome for campaign message {}: {}",
                        message_id,
                        e
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Dispatch task panicked: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            "Dispatch tick: {} claimed, {} sent, {} failed",
            report.claimed,
            report.sent,
            report.failed
        );
        Ok(report)
    }

    async fn prune_if_due(&mut self, now: DateTime<Utc>) {
        if self
            .last_prune
            .is_some_and(|last| now - last < chrono::Duration::minutes(PRUNE_EVERY_MINUTES))
        {
            return;
        }
        self.last_prune = Some(now);
        let cutoff = now - chrono::Duration::hours(RATE_LIMIT_RETENTION_HOURS);
        match self.store.prune_rate_limit_log(cutoff).await {
            Ok(removed) if removed > 0 => {
                tracing::info!("Pruned {} old rate-limit entries", removed)
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to prune rate-limit log: {}", e),
        }
    }

    /// Polls until `shutdown` flips to true. In-flight sends finish first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            "Dispatch poller started (every {}s, batch {}, concurrency {})",
            self.settings.poll_interval_secs,
            self.settings.batch_size,
            self.settings.concurrency
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.run_once(now).await {
                        tracing::error!("Dispatch tick failed: {}", e);
                    }
                    self.prune_if_due(now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Dispatch poller stopped");
    }
}
