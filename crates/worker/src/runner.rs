//! Worker loop: claim due attempts, run them, and dispatch follow-ups.

use std::sync::Arc;
use std::time::Duration;

use comfyrelay_core::generation::AttemptRequest;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::AttemptQueue;
use crate::orchestrator::{AttemptOutcome, CompletionOrchestrator};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Tries per follow-up before the dispatch is given up.
const SCHEDULE_ATTEMPTS: u32 = 3;
const SCHEDULE_BACKOFF: Duration = Duration::from_millis(250);

/// Long-lived loop that feeds due attempts to the orchestrator.
#[derive(Clone)]
pub struct WorkerRunner {
    orchestrator: Arc<CompletionOrchestrator>,
    queue: Arc<dyn AttemptQueue>,
    poll_interval: Duration,
    concurrency: usize,
}

impl WorkerRunner {
    pub fn new(
        orchestrator: Arc<CompletionOrchestrator>,
        queue: Arc<dyn AttemptQueue>,
        poll_interval: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `cancel` fires, then wait for in-flight attempts.
    pub async fn run(&self, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut in_flight = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);

        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            concurrency = self.concurrency,
            "Completion worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Completion worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    while let Some(joined) = in_flight.try_join_next() {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "Attempt task panicked");
                        }
                    }
                    self.poll_once(&permits, &mut in_flight).await;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Attempt task panicked");
            }
        }
    }

    /// One poll cycle: claim as many attempts as there are free slots.
    async fn poll_once(&self, permits: &Arc<Semaphore>, in_flight: &mut JoinSet<()>) {
        let free = permits.available_permits();
        if free == 0 {
            return;
        }

        let claimed = match self.queue.claim_due(free).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to claim due attempts");
                return;
            }
        };

        for request in claimed {
            let Ok(permit) = Arc::clone(permits).acquire_owned().await else {
                return;
            };
            let runner = self.clone();
            in_flight.spawn(async move {
                runner.process(request).await;
                drop(permit);
            });
        }
    }

    /// Run one attempt and dispatch its follow-up, if any.
    ///
    /// Returns `None` when the request was rejected as malformed.
    pub async fn process(&self, request: AttemptRequest) -> Option<AttemptOutcome> {
        let outcome = match self.orchestrator.run_attempt(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    job_id = %request.job_id,
                    error = %e,
                    "Rejected attempt request",
                );
                return None;
            }
        };

        if let Some((delay, next_attempt)) = outcome.reschedule() {
            let next = AttemptRequest {
                attempt: next_attempt,
                ..request.clone()
            };
            self.dispatch_next(&next, delay).await;
        }

        Some(outcome)
    }

    async fn dispatch_next(&self, next: &AttemptRequest, delay: Duration) {
        for tried in 1..=SCHEDULE_ATTEMPTS {
            match self.queue.schedule(next, delay).await {
                Ok(()) => return,
                Err(e) if tried < SCHEDULE_ATTEMPTS => {
                    tracing::warn!(
                        job_id = %next.job_id,
                        next_attempt = next.attempt,
                        tried,
                        error = %e,
                        "Dispatch of next attempt failed, retrying",
                    );
                    tokio::time::sleep(SCHEDULE_BACKOFF * tried).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %next.job_id,
                        next_attempt = next.attempt,
                        error = %e,
                        "Failed to dispatch next attempt",
                    );
                }
            }
        }
    }
}
