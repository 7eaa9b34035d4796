//! Debit-before-work accounting around a paid generation.
//!
//! Every attempt is one row in `generation_attempts`. Its `funds_state` moves
//! `debited -> settled` when the artifact reached the user and
//! `debited -> refunded` otherwise; both flips are conditional updates, so
//! neither can happen twice. Exempt users start and stay at `exempt`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use teloxide::types::{ChatId, MessageId};
use tracing::{debug, error, info, warn};

use crate::billing::delivery::{DeliveryLedger, DeliveryStrategy};
use crate::db::database::{BeginAttempt, Database};
use crate::db::models::{AttemptInsert, AttemptStatus, FundsState};
use crate::generation::GenerationError;
use crate::media::fetch::ArtifactFetcher;
use crate::transport::{PhotoSource, Transport};

#[derive(Debug, Clone)]
pub struct PaidRequest {
    pub correlation_id: String,
    pub user_id: i64,
    pub chat_id: ChatId,
    pub cost: i64,
    pub exempt: bool,
    pub style_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub strategy: DeliveryStrategy,
    /// Credits kept for this attempt: the cost, or 0 when exempt.
    pub charged: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: i64, cost: i64 },
    #[error("generation failed: {reason}")]
    GenerationFailed { reason: String, refunded: bool },
    #[error("artifact could not be delivered: {reason}")]
    DeliveryFailed { reason: String, refunded: bool },
    #[error("attempt {correlation_id} was already delivered")]
    DuplicateCompletion { correlation_id: String },
    #[error("funds store failed: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub refunded: usize,
    pub settled: usize,
    pub failed: usize,
}

#[derive(Debug)]
enum DeliveryFailure {
    Duplicate,
    Exhausted { reason: String },
}

pub struct TransactionManager {
    db: Database,
    transport: Arc<dyn Transport>,
    fetcher: Arc<dyn ArtifactFetcher>,
    ledger: DeliveryLedger,
    operation_timeout: Duration,
}

impl TransactionManager {
    pub fn new(
        db: Database,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn ArtifactFetcher>,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            db,
            transport,
            fetcher,
            ledger: DeliveryLedger::new(Duration::from_secs(3600)),
            operation_timeout,
        }
    }

    /// Runs `op` as a paid attempt and delivers its artifact as a photo with `caption`.
    pub async fn run_paid_operation<F, Fut>(
        &self,
        request: &PaidRequest,
        caption: Option<&str>,
        op: F,
    ) -> Result<Delivery, TransactionError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<String, GenerationError>> + Send,
    {
        let insert = AttemptInsert {
            correlation_id: request.correlation_id.clone(),
            user_id: request.user_id,
            chat_id: request.chat_id.0,
            cost: request.cost,
            exempt: request.exempt,
            style_code: request.style_code.clone(),
        };
        let funds_state = match self
            .db
            .begin_attempt(&insert)
            .await
            .map_err(TransactionError::Store)?
        {
            BeginAttempt::Started(funds_state) => funds_state,
            BeginAttempt::InsufficientFunds { balance } => {
                info!(
                    target: "bot.audit",
                    "event=insufficient_funds correlation_id={} user_id={} balance={} cost={}",
                    request.correlation_id,
                    request.user_id,
                    balance,
                    request.cost
                );
                return Err(TransactionError::InsufficientFunds {
                    balance,
                    cost: request.cost,
                });
            }
        };
        info!(
            target: "bot.audit",
            "event=attempt_started correlation_id={} user_id={} chat_id={} cost={} funds_state={}",
            request.correlation_id,
            request.user_id,
            request.chat_id.0,
            request.cost,
            funds_state.as_str()
        );

        let generated = match tokio::time::timeout(self.operation_timeout, op()).await {
            Ok(Ok(reference)) if reference.trim().is_empty() => Err(GenerationError::EmptyResult),
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.operation_timeout)),
        };

        let reference = match generated {
            Ok(reference) => reference,
            Err(err) => {
                let reason = err.to_string();
                self.record_outcome(request, AttemptStatus::Failed, None, Some(&reason))
                    .await;
                let refunded = self.refund(request, "generation_failed").await;
                return Err(TransactionError::GenerationFailed { reason, refunded });
            }
        };
        self.record_outcome(request, AttemptStatus::Succeeded, Some(&reference), None)
            .await;

        match self
            .deliver_artifact(&request.correlation_id, request.chat_id, &reference, caption)
            .await
        {
            Ok((message_id, strategy)) => {
                if funds_state == FundsState::Debited {
                    if let Err(err) = self.db.settle_attempt(&request.correlation_id).await {
                        // Left debited with a delivered message; start-up reconciliation settles it.
                        error!(
                            "Failed to settle attempt {}: {err:#}",
                            request.correlation_id
                        );
                    }
                }
                let charged = if request.exempt { 0 } else { request.cost };
                info!(
                    target: "bot.audit",
                    "event=attempt_delivered correlation_id={} user_id={} message_id={} strategy={} charged={}",
                    request.correlation_id,
                    request.user_id,
                    message_id.0,
                    strategy.as_str(),
                    charged
                );
                Ok(Delivery {
                    message_id,
                    strategy,
                    charged,
                })
            }
            Err(DeliveryFailure::Duplicate) => Err(TransactionError::DuplicateCompletion {
                correlation_id: request.correlation_id.clone(),
            }),
            Err(DeliveryFailure::Exhausted { reason }) => {
                self.record_outcome(request, AttemptStatus::Failed, None, Some(&reason))
                    .await;
                let refunded = self.refund(request, "delivery_failed").await;
                Err(TransactionError::DeliveryFailed { reason, refunded })
            }
        }
    }

    /// Delivers an artifact at most once per correlation id.
    ///
    /// Strategies run in priority order and stop at the first success. A timed-out
    /// send also stops the chain: the photo may have arrived, and trying the next
    /// strategy could show it twice.
    async fn deliver_artifact(
        &self,
        correlation_id: &str,
        chat_id: ChatId,
        reference: &str,
        caption: Option<&str>,
    ) -> Result<(MessageId, DeliveryStrategy), DeliveryFailure> {
        if !self.ledger.claim(correlation_id) {
            self.audit_duplicate(correlation_id, "ledger");
            return Err(DeliveryFailure::Duplicate);
        }
        match self.db.get_attempt(correlation_id).await {
            Ok(Some(row)) if row.delivered_message_id.is_some() => {
                self.ledger.abandon(correlation_id);
                self.audit_duplicate(correlation_id, "store");
                return Err(DeliveryFailure::Duplicate);
            }
            Ok(_) => {}
            Err(err) => warn!("Could not check delivery state of {correlation_id}: {err:#}"),
        }

        let mut reason = String::from("no delivery strategy applicable");
        for (strategy, url) in DeliveryStrategy::chain_for(reference) {
            let source = match (strategy, url) {
                (DeliveryStrategy::DirectReference, Some(url)) => PhotoSource::Url(url),
                (DeliveryStrategy::DirectReference, None) => continue,
                (DeliveryStrategy::Reupload, _) => match self.fetcher.fetch(reference).await {
                    Ok(artifact) => {
                        debug!(
                            "Fetched artifact for {correlation_id}: mime={} bytes={}",
                            artifact.mime_type,
                            artifact.bytes.len()
                        );
                        PhotoSource::Bytes {
                            data: artifact.bytes,
                            file_name: artifact.file_name,
                        }
                    }
                    Err(err) => {
                        warn!(
                            "Delivery strategy {} could not fetch artifact for {correlation_id}: {err}",
                            strategy.as_str()
                        );
                        reason = err.to_string();
                        continue;
                    }
                },
            };

            match self
                .transport
                .send_photo(chat_id, source, caption, None)
                .await
            {
                Ok(message_id) => {
                    self.ledger.complete(correlation_id, message_id);
                    match self
                        .db
                        .mark_attempt_delivered(correlation_id, i64::from(message_id.0))
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => self.audit_duplicate(correlation_id, "store_after_send"),
                        Err(err) => error!(
                            "Delivered {correlation_id} as message {} but could not record it: {err:#}",
                            message_id.0
                        ),
                    }
                    return Ok((message_id, strategy));
                }
                Err(err) if err.is_unknown_outcome() => {
                    warn!(
                        "Delivery strategy {} timed out for {correlation_id}; not trying further strategies",
                        strategy.as_str()
                    );
                    reason = err.to_string();
                    break;
                }
                Err(err) => {
                    warn!(
                        "Delivery strategy {} failed for {correlation_id} ({}): {err}",
                        strategy.as_str(),
                        err.kind()
                    );
                    reason = err.to_string();
                }
            }
        }

        self.ledger.abandon(correlation_id);
        Err(DeliveryFailure::Exhausted { reason })
    }

    /// Resolves attempts left `debited` by a previous run.
    pub async fn reconcile_interrupted(&self) -> anyhow::Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        for attempt in self.db.interrupted_attempts().await? {
            let resolved = if attempt.delivered_message_id.is_some() {
                self.db
                    .settle_attempt(&attempt.correlation_id)
                    .await
                    .map(|done| (done, "settled"))
            } else {
                self.db
                    .refund_attempt(&attempt.correlation_id)
                    .await
                    .map(|done| (done, "refunded"))
            };
            match resolved {
                Ok((true, "settled")) => summary.settled += 1,
                Ok((true, _)) => summary.refunded += 1,
                Ok((false, _)) => {}
                Err(err) => {
                    summary.failed += 1;
                    error!(
                        "Failed to reconcile attempt {}: {err:#}",
                        attempt.correlation_id
                    );
                    continue;
                }
            }
            info!(
                target: "bot.audit",
                "event=attempt_reconciled correlation_id={} user_id={} cost={} delivered={}",
                attempt.correlation_id,
                attempt.user_id,
                attempt.cost,
                attempt.delivered_message_id.is_some()
            );
        }
        Ok(summary)
    }

    async fn record_outcome(
        &self,
        request: &PaidRequest,
        status: AttemptStatus,
        artifact_ref: Option<&str>,
        error_text: Option<&str>,
    ) {
        // Inline artifacts can be megabytes; only URLs are worth keeping.
        let artifact_ref = artifact_ref.filter(|value| !value.starts_with("data:"));
        if let Err(err) = self
            .db
            .record_attempt_outcome(&request.correlation_id, status, artifact_ref, error_text)
            .await
        {
            warn!(
                "Failed to record outcome of attempt {}: {err:#}",
                request.correlation_id
            );
        }
        info!(
            target: "bot.audit",
            "event=attempt_outcome correlation_id={} user_id={} status={} error={}",
            request.correlation_id,
            request.user_id,
            status.as_str(),
            error_text.unwrap_or_default()
        );
    }

    async fn refund(&self, request: &PaidRequest, cause: &str) -> bool {
        if request.exempt || request.cost == 0 {
            return false;
        }
        match self.db.refund_attempt(&request.correlation_id).await {
            Ok(refunded) => {
                info!(
                    target: "bot.audit",
                    "event=attempt_refunded correlation_id={} user_id={} cost={} cause={} applied={}",
                    request.correlation_id,
                    request.user_id,
                    request.cost,
                    cause,
                    refunded
                );
                refunded
            }
            Err(err) => {
                // Stays debited; start-up reconciliation refunds it.
                error!(
                    "Refund of attempt {} failed: {err:#}",
                    request.correlation_id
                );
                false
            }
        }
    }

    fn audit_duplicate(&self, correlation_id: &str, detected_by: &str) {
        warn!(
            target: "bot.audit",
            "event=duplicate_completion correlation_id={} detected_by={} delivered_message={:?}",
            correlation_id,
            detected_by,
            self.ledger.delivered_message(correlation_id).map(|id| id.0)
        );
    }
}
