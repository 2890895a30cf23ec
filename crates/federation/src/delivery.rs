//! Concurrent fan-out of one activity to many inboxes.

use std::collections::HashSet;
use std::sync::Arc;

use apub_common::AppError;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::resolver::ResolutionFailure;
use crate::transport::Transport;

/// A target that was not reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryFailure {
    /// Inbox, or the actor/collection IRI that could not be resolved to one.
    pub target: Url,
    pub error: String,
}

/// Per-target result of a fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<Url>,
    pub failed: Vec<DeliveryFailure>,
    /// Attempts not finished when the operation was cancelled.
    pub abandoned: Vec<Url>,
}

impl DeliveryReport {
    /// Whether every target was reached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.failed.is_empty() && self.abandoned.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.delivered.extend(other.delivered);
        self.failed.extend(other.failed);
        self.abandoned.extend(other.abandoned);
    }

    /// Record recipients that never got as far as an inbox.
    pub fn record_unresolved(&mut self, failures: &[ResolutionFailure]) {
        self.failed
            .extend(failures.iter().map(|failure| DeliveryFailure {
                target: failure.iri.clone(),
                error: failure.error.clone(),
            }));
    }
}

/// Bounded-concurrency deliverer.
#[derive(Clone)]
pub struct Deliverer {
    transport: Arc<dyn Transport>,
    concurrency: usize,
}

impl Deliverer {
    /// Create a deliverer allowing `concurrency` attempts in flight.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, concurrency: usize) -> Self {
        Self {
            transport,
            concurrency: concurrency.max(1),
        }
    }

    /// Deliver `payload` to every inbox once.
    ///
    /// Attempts run independently; one slow or failing inbox never holds up
    /// the others. On cancellation unfinished attempts are aborted and
    /// reported as abandoned.
    pub async fn deliver(
        &self,
        inboxes: Vec<Url>,
        payload: Bytes,
        cancel: &CancellationToken,
    ) -> DeliveryReport {
        let mut seen = HashSet::new();
        let inboxes: Vec<Url> = inboxes
            .into_iter()
            .filter(|inbox| seen.insert(inbox.to_string()))
            .collect();

        let mut report = DeliveryReport::default();
        if inboxes.is_empty() {
            return report;
        }

        info!(
            recipients = inboxes.len(),
            concurrency = self.concurrency,
            "Starting delivery"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for inbox in inboxes.iter().cloned() {
            let semaphore = Arc::clone(&semaphore);
            let transport = Arc::clone(&self.transport);
            let payload = payload.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => transport.deliver_to(&inbox, payload).await,
                    Err(e) => Err(AppError::Internal(format!("Delivery pool closed: {e}"))),
                };
                (inbox, result)
            });
        }

        let mut finished: HashSet<String> = HashSet::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    tasks.abort_all();
                    break;
                }
                next = tasks.join_next() => match next {
                    Some(Ok((inbox, result))) => {
                        finished.insert(inbox.to_string());
                        Self::record(&mut report, inbox, result);
                    }
                    Some(Err(e)) => warn!(error = %e, "Delivery task failed"),
                    None => break,
                },
            }
        }

        if cancelled {
            // Attempts that completed before the abort still count.
            while let Some(next) = tasks.join_next().await {
                if let Ok((inbox, result)) = next {
                    finished.insert(inbox.to_string());
                    Self::record(&mut report, inbox, result);
                }
            }
        }

        for inbox in inboxes {
            if finished.contains(inbox.as_str()) {
                continue;
            }
            if cancelled {
                report.abandoned.push(inbox);
            } else {
                report.failed.push(DeliveryFailure {
                    target: inbox,
                    error: "Delivery task panicked".to_string(),
                });
            }
        }

        info!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Delivery finished"
        );
        report
    }

    fn record(report: &mut DeliveryReport, inbox: Url, result: Result<(), AppError>) {
        match result {
            Ok(()) => {
                debug!(inbox = %inbox, "Delivered");
                report.delivered.push(inbox);
            }
            Err(e) => {
                warn!(inbox = %inbox, error = %e, "Delivery failed");
                report.failed.push(DeliveryFailure {
                    target: inbox,
                    error: e.to_string(),
                });
            }
        }
    }
}
