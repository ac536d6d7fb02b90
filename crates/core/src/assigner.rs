//! Batching, oracle dispatch under a concurrency cap, retry and the
//! confidence gate.

use crate::config::{OracleConfig, RetryConfig};
use crate::extractor::build_request;
use crate::models::{Assignment, ErrorCause, FileRecord};
use providers::{ClassificationOracle, OracleError, OracleRequest, OracleResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

/// Calls the oracle with a per-attempt timeout, doubling the delay between
/// attempts up to `max_delay`. A rate-limit hint replaces the computed delay
/// when it is longer.
pub async fn classify_with_retry(
    oracle: &dyn ClassificationOracle,
    batch: &[OracleRequest],
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<Vec<OracleResponse>, OracleError> {
    let mut attempt = 0;
    let mut delay = policy.base_delay;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, oracle.classify(batch)).await {
            Ok(r) => r,
            Err(_) => Err(OracleError::Timeout(timeout)),
        };
        match result {
            Ok(responses) => {
                if attempt > 1 {
                    debug!(oracle = oracle.name(), attempt, "oracle call succeeded after retry");
                }
                return Ok(responses);
            }
            Err(err) if !err.is_retryable() || attempt >= policy.max_attempts => {
                warn!(oracle = oracle.name(), attempt, error = %err, "oracle call failed");
                return Err(err);
            }
            Err(err) => {
                let wait = err.retry_after().map_or(delay, |hint| hint.max(delay));
                warn!(
                    oracle = oracle.name(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "oracle call failed, retrying in {:?}",
                    wait
                );
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

/// Outcome of gating one oracle answer.
#[derive(Debug, Clone)]
pub enum Gated {
    Accepted(Assignment),
    LowConfidence(Assignment),
    Failed { record: FileRecord, cause: ErrorCause },
}

impl Gated {
    pub fn record(&self) -> &FileRecord {
        match self {
            Gated::Accepted(a) | Gated::LowConfidence(a) => &a.file_record,
            Gated::Failed { record, .. } => record,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceGate {
    threshold: f32,
}

impl ConfidenceGate {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn gate(&self, record: FileRecord, response: OracleResponse) -> Gated {
        let confidence = response.confidence;
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Gated::Failed {
                record,
                cause: ErrorCause::InvalidConfidence {
                    value: confidence.to_string(),
                },
            };
        }
        let assignment = Assignment {
            file_record: record,
            proposed_fields: response.fields,
            confidence,
            rationale: response.rationale,
        };
        if confidence >= self.threshold {
            Gated::Accepted(assignment)
        } else {
            Gated::LowConfidence(assignment)
        }
    }
}

/// Lines responses up with requests. Indexed responses are slotted by index
/// (first answer wins); otherwise position decides. Extra answers are dropped.
pub fn align(expected: usize, responses: Vec<OracleResponse>) -> Vec<Option<OracleResponse>> {
    let mut slots: Vec<Option<OracleResponse>> = (0..expected).map(|_| None).collect();
    if responses.iter().any(|r| r.index.is_some()) {
        for response in responses {
            match response.index {
                Some(i) if i < expected && slots[i].is_none() => slots[i] = Some(response),
                other => debug!(index = ?other, "ignoring unmatched oracle response"),
            }
        }
    } else {
        for (slot, response) in slots.iter_mut().zip(responses) {
            *slot = Some(response);
        }
    }
    slots
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub index: usize,
    pub records: Vec<FileRecord>,
}

#[derive(Debug)]
pub struct BatchResult {
    pub index: usize,
    pub outcomes: Vec<Gated>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub undispatched: usize,
    pub cancelled: bool,
}

struct AssignerInner {
    oracle: Arc<dyn ClassificationOracle>,
    gate: ConfidenceGate,
    retry: RetryPolicy,
    timeout: Duration,
    batch_size: usize,
    max_in_flight: usize,
    excerpt_bytes: usize,
}

#[derive(Clone)]
pub struct BatchAssigner {
    inner: Arc<AssignerInner>,
}

impl BatchAssigner {
    pub fn new(
        oracle: Arc<dyn ClassificationOracle>,
        oracle_cfg: &OracleConfig,
        threshold: f32,
        excerpt_bytes: usize,
    ) -> Self {
        Self {
            inner: Arc::new(AssignerInner {
                oracle,
                gate: ConfidenceGate::new(threshold),
                retry: RetryPolicy::from(&oracle_cfg.retry),
                timeout: oracle_cfg.request_timeout(),
                batch_size: oracle_cfg.batch_size.max(1),
                max_in_flight: oracle_cfg.max_in_flight.max(1),
                excerpt_bytes,
            }),
        }
    }

    pub fn partition(&self, records: Vec<FileRecord>) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current = Vec::with_capacity(self.inner.batch_size);
        for record in records {
            current.push(record);
            if current.len() == self.inner.batch_size {
                batches.push(Batch {
                    index: batches.len(),
                    records: std::mem::take(&mut current),
                });
            }
        }
        if !current.is_empty() {
            batches.push(Batch {
                index: batches.len(),
                records: current,
            });
        }
        batches
    }

    /// Classifies one batch. Never fails: an exhausted retry budget turns
    /// every file in the batch into a failed outcome.
    pub async fn assign_batch(&self, batch: Batch) -> BatchResult {
        let Batch { index, records } = batch;
        if records.is_empty() {
            return BatchResult {
                index,
                outcomes: Vec::new(),
            };
        }

        let excerpt_bytes = self.inner.excerpt_bytes;
        let to_read = records.clone();
        let requests = match tokio::task::spawn_blocking(move || {
            to_read
                .iter()
                .map(|r| build_request(r, excerpt_bytes))
                .collect::<Vec<_>>()
        })
        .await
        {
            Ok(reqs) => reqs
                .into_iter()
                .map(|r| OracleRequest {
                    path: r.file_record.absolute_path.display().to_string(),
                    excerpt: r.content_excerpt,
                })
                .collect::<Vec<_>>(),
            Err(err) => {
                error!(batch = index, error = %err, "excerpt task failed");
                return fail_all(index, records, ErrorCause::Oracle {
                    message: format!("excerpt task failed: {err}"),
                });
            }
        };

        debug!(batch = index, files = requests.len(), "dispatching batch");
        let inner = &self.inner;
        match classify_with_retry(inner.oracle.as_ref(), &requests, &inner.retry, inner.timeout).await {
            Ok(responses) => {
                let outcomes = records
                    .into_iter()
                    .zip(align(requests.len(), responses))
                    .map(|(record, response)| match response {
                        Some(r) => inner.gate.gate(record, r),
                        None => Gated::Failed {
                            record,
                            cause: ErrorCause::MissingResponse,
                        },
                    })
                    .collect();
                BatchResult { index, outcomes }
            }
            Err(err) => {
                warn!(batch = index, error = %err, "batch failed after retries");
                fail_all(index, records, ErrorCause::from(&err))
            }
        }
    }

    /// Runs batches on a worker pool of at most `max_in_flight` tasks. Results
    /// arrive on the returned channel in completion order. Cancelling `cancel`
    /// stops new dispatches; batches already running finish normally.
    pub fn dispatch(
        &self,
        batches: Vec<Batch>,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<BatchResult>, JoinHandle<DispatchReport>) {
        let (tx, rx) = mpsc::channel(self.inner.max_in_flight);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let total = batches.len();
            let semaphore = Arc::new(Semaphore::new(this.inner.max_in_flight));
            let mut workers = JoinSet::new();
            let mut report = DispatchReport::default();

            for batch in batches {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };
                report.dispatched += 1;
                let worker = this.clone();
                let tx = tx.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    let result = worker.assign_batch(batch).await;
                    if tx.send(result).await.is_err() {
                        debug!("result receiver dropped");
                    }
                });
            }
            report.undispatched = total - report.dispatched;
            drop(tx);

            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    error!(error = %err, "batch worker panicked");
                }
            }
            report
        });
        (rx, handle)
    }
}

fn fail_all(index: usize, records: Vec<FileRecord>, cause: ErrorCause) -> BatchResult {
    BatchResult {
        index,
        outcomes: records
            .into_iter()
            .map(|record| Gated::Failed {
                record,
                cause: cause.clone(),
            })
            .collect(),
    }
}
