//! Agreement lifecycle manager: drafts, sends, and tracks contracts for
//! qualifying entities.
//!
//! Agreements are created only for entities in `negotiating` above the
//! probability threshold, and archived only once terminal. Signing closes
//! the owning entity and credits revenue to the metrics aggregator exactly
//! once per agreement id.

use crate::config::AgreementConfig;
use crate::delivery::{AgreementStore, MessageDelivery, RenderedMessage, SignatureStatus};
use crate::domain::{
    Agreement, AgreementId, AgreementStatus, AgreementTerms, Clock, DiscountTier, Entity,
    EntityId, EntityStatus, PipelineError, RateStructure, TimestampUtc,
};
use crate::metrics::{MetricEvent, MetricsAggregator};
use crate::pipeline_log::PipelineLogger;
use crate::registry::EntityRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What one review sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReviewSummary {
    pub checked: usize,
    pub resent: usize,
    pub signed: usize,
    pub rejected: usize,
    pub expired: usize,
    pub deferred: usize,
}

pub struct AgreementManager {
    registry: Arc<dyn EntityRegistry>,
    store: Arc<dyn AgreementStore>,
    delivery: Arc<dyn MessageDelivery>,
    metrics: Arc<MetricsAggregator>,
    logger: Arc<PipelineLogger>,
    clock: Arc<dyn Clock>,
    config: AgreementConfig,
    active: RwLock<HashMap<AgreementId, Agreement>>,
    archived: RwLock<HashMap<AgreementId, Agreement>>,
}

impl AgreementManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn EntityRegistry>,
        store: Arc<dyn AgreementStore>,
        delivery: Arc<dyn MessageDelivery>,
        metrics: Arc<MetricsAggregator>,
        logger: Arc<PipelineLogger>,
        clock: Arc<dyn Clock>,
        config: AgreementConfig,
    ) -> Self {
        Self {
            registry,
            store,
            delivery,
            metrics,
            logger,
            clock,
            config,
            active: RwLock::new(HashMap::new()),
            archived: RwLock::new(HashMap::new()),
        }
    }

    /// Drafts an agreement for a qualifying entity.
    ///
    /// Value is fixed from the entity's revenue estimate at draft time.
    pub async fn draft_for(&self, entity_id: EntityId) -> Result<Agreement, PipelineError> {
        let entity = self.registry.get(entity_id).await?;
        self.check_eligibility(&entity)?;

        // One active agreement per entity.
        {
            let active = self.active.read().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = active.values().find(|a| a.entity_id == entity_id) {
                return Ok(existing.clone());
            }
        }

        let now = self.clock.now();
        let terms = self.terms_for(&entity);
        let agreement = Agreement::draft(entity_id, terms, entity.profile.estimated_revenue, now);

        self.store
            .store(&agreement)
            .await
            .map_err(|err| PipelineError::TransientDelivery {
                message: format!("agreement store rejected draft: {}", err),
            })?;

        self.metrics.record(MetricEvent::AgreementDrafted, now);
        self.logger
            .log_agreement(agreement.id, entity_id, agreement.status.as_str());

        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.insert(agreement.id, agreement.clone());
        Ok(agreement)
    }

    fn check_eligibility(&self, entity: &Entity) -> Result<(), PipelineError> {
        if entity.status != EntityStatus::Negotiating {
            return Err(PipelineError::Ineligible {
                message: format!(
                    "entity {} is {}, agreements require negotiating",
                    entity.id, entity.status
                ),
            });
        }
        if entity.conversion_probability.value() <= self.config.negotiation_threshold {
            return Err(PipelineError::Ineligible {
                message: format!(
                    "entity {} probability {:.2} at or below threshold {:.2}",
                    entity.id,
                    entity.conversion_probability.value(),
                    self.config.negotiation_threshold
                ),
            });
        }
        Ok(())
    }

    /// Terms derived from the entity's volume at draft time.
    fn terms_for(&self, entity: &Entity) -> AgreementTerms {
        AgreementTerms {
            duration_months: self.config.default_duration_months,
            monthly_volume: entity.profile.monthly_volume,
            rates: RateStructure {
                base_rate: self.config.base_rate,
                discount_tiers: vec![
                    DiscountTier {
                        monthly_volume_threshold: 100,
                        discount_pct: 5.0,
                    },
                    DiscountTier {
                        monthly_volume_threshold: 500,
                        discount_pct: 12.0,
                    },
                ],
            },
            payment_terms_days: self.config.payment_terms_days,
        }
    }

    /// Sends a drafted agreement to the entity via the delivery collaborator.
    pub async fn send(&self, agreement_id: AgreementId) -> Result<(), PipelineError> {
        let mut agreement = {
            let active = self.active.read().unwrap_or_else(|e| e.into_inner());
            active
                .get(&agreement_id)
                .cloned()
                .ok_or(PipelineError::NotFound {
                    id: agreement_id.to_string(),
                })?
        };
        // A re-drained draft queue can ask to send twice.
        if agreement.status == AgreementStatus::Sent {
            return Ok(());
        }
        let entity = self.registry.get(agreement.entity_id).await?;

        let now = self.clock.now();
        let message = RenderedMessage {
            template_id: "agreement".into(),
            subject: format!("Partnership agreement for {}", entity.profile.contact.company),
            body: format!(
                "Agreement {}: {} months, {} shipments/month, net-{} payment terms.",
                agreement.id,
                agreement.terms.duration_months,
                agreement.terms.monthly_volume,
                agreement.terms.payment_terms_days
            ),
        };
        self.delivery
            .send(&entity.profile.contact.email, &message)
            .await
            .map_err(|err| PipelineError::TransientDelivery {
                message: format!("agreement delivery failed: {}", err),
            })?;

        agreement.transition_to(AgreementStatus::Sent, now)?;
        self.store
            .store(&agreement)
            .await
            .map_err(|err| PipelineError::TransientDelivery {
                message: format!("agreement store rejected update: {}", err),
            })?;

        self.metrics.record(MetricEvent::AgreementSent, now);
        self.logger
            .log_agreement(agreement.id, agreement.entity_id, agreement.status.as_str());

        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.insert(agreement.id, agreement);
        Ok(())
    }

    /// Periodic sweep over outstanding agreements.
    ///
    /// `draft` agreements left behind by a failed send are resent. `sent`
    /// agreements are polled for signature; still-pending ones older than
    /// the review window expire. Signed agreements close their entity and
    /// are archived.
    pub async fn review_sweep(&self) -> ReviewSummary {
        let now = self.clock.now();
        let outstanding: Vec<Agreement> = {
            let active = self.active.read().unwrap_or_else(|e| e.into_inner());
            active.values().cloned().collect()
        };

        let mut summary = ReviewSummary {
            checked: outstanding.len(),
            ..ReviewSummary::default()
        };

        for agreement in outstanding {
            if agreement.status == AgreementStatus::Draft {
                // The send after drafting failed; the sweep keeps retrying
                // until the provider accepts it.
                match self.send(agreement.id).await {
                    Ok(()) => summary.resent += 1,
                    Err(err) => {
                        tracing::warn!(
                            agreement = %agreement.id,
                            error = %err,
                            "draft resend failed, retrying next sweep"
                        );
                        summary.deferred += 1;
                    }
                }
                continue;
            }
            if agreement.status == AgreementStatus::Signed {
                // Entity closure was deferred by a held lock on an earlier
                // sweep; retry it.
                if self.settle_signed(agreement, now).await {
                    summary.signed += 1;
                } else {
                    summary.deferred += 1;
                }
                continue;
            }

            let status = match self.store.signature_status(agreement.id).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(
                        agreement = %agreement.id,
                        error = %err,
                        "signature check failed, retrying next sweep"
                    );
                    summary.deferred += 1;
                    continue;
                }
            };

            match status {
                SignatureStatus::Signed => match self.mark_signed(agreement.id, now).await {
                    Ok(true) => summary.signed += 1,
                    Ok(false) | Err(_) => summary.deferred += 1,
                },
                SignatureStatus::Declined => {
                    self.resolve(agreement.id, AgreementStatus::Rejected, now);
                    summary.rejected += 1;
                }
                SignatureStatus::Pending => {
                    let sent_at = agreement.sent_at.unwrap_or(agreement.drafted_at);
                    let deadline =
                        sent_at.plus(chrono::Duration::hours(i64::from(
                            self.config.review_window_hours,
                        )));
                    if now >= deadline {
                        self.resolve(agreement.id, AgreementStatus::Expired, now);
                        self.metrics.record(MetricEvent::AgreementExpired, now);
                        summary.expired += 1;
                    } else {
                        summary.deferred += 1;
                    }
                }
            }
        }

        self.logger.log_tick_summary(serde_json::json!({
            "type": "AgreementReview",
            "summary": summary,
        }));
        summary
    }

    /// Confirms a signature (webhook path). Idempotent: re-delivering the
    /// same confirmation neither double-counts revenue nor fails.
    pub async fn confirm_signature(&self, agreement_id: AgreementId) -> Result<(), PipelineError> {
        {
            let archived = self.archived.read().unwrap_or_else(|e| e.into_inner());
            if let Some(done) = archived.get(&agreement_id) {
                if done.status == AgreementStatus::Signed {
                    return Ok(());
                }
                return Err(PipelineError::invalid_transition(
                    done.status,
                    AgreementStatus::Signed,
                ));
            }
        }
        self.mark_signed(agreement_id, self.clock.now())
            .await
            .map(|_| ())
    }

    /// Records a signature on an active agreement. Returns whether
    /// settlement (entity closure + archival) completed; `false` means the
    /// entity lock was held and the next review sweep finishes the job.
    async fn mark_signed(
        &self,
        agreement_id: AgreementId,
        now: TimestampUtc,
    ) -> Result<bool, PipelineError> {
        let agreement = {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            let agreement = active
                .get_mut(&agreement_id)
                .ok_or(PipelineError::NotFound {
                    id: agreement_id.to_string(),
                })?;
            if agreement.status != AgreementStatus::Signed {
                agreement.transition_to(AgreementStatus::Signed, now)?;
            }
            agreement.clone()
        };

        self.logger
            .log_agreement(agreement.id, agreement.entity_id, agreement.status.as_str());

        Ok(self.settle_signed(agreement, now).await)
    }

    /// Closes the owning entity and archives the agreement. Returns false
    /// when the entity lock was unavailable and settlement must be retried.
    async fn settle_signed(&self, agreement: Agreement, now: TimestampUtc) -> bool {
        let _lease = match self.registry.try_lock(agreement.entity_id) {
            Some(lease) => lease,
            None => return false,
        };

        match self
            .registry
            .compare_and_set_status(
                agreement.entity_id,
                EntityStatus::Negotiating,
                EntityStatus::Closed,
                now,
            )
            .await
        {
            Ok(entity) => {
                self.logger.log_transition(
                    agreement.entity_id,
                    EntityStatus::Negotiating,
                    EntityStatus::Closed,
                );
                self.metrics.record(
                    MetricEvent::EntityConverted {
                        campaign: entity.campaign,
                    },
                    now,
                );
            }
            Err(PipelineError::Conflict { .. }) => {
                // Already closed (idempotent re-delivery) or moved by a
                // manual action; revenue dedup below keeps counts exact.
            }
            Err(err) => {
                tracing::warn!(
                    entity = %agreement.entity_id,
                    error = %err,
                    "could not close entity for signed agreement"
                );
            }
        }

        // Revenue is credited exactly once per agreement id; the metrics
        // aggregator deduplicates re-deliveries.
        self.metrics.record(
            MetricEvent::AgreementSigned {
                agreement: agreement.id,
                value: agreement.annual_value,
            },
            now,
        );

        self.archive(agreement);
        true
    }

    fn resolve(&self, agreement_id: AgreementId, terminal: AgreementStatus, now: TimestampUtc) {
        let agreement = {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            match active.get_mut(&agreement_id) {
                Some(agreement) => {
                    if agreement.transition_to(terminal, now).is_err() {
                        return;
                    }
                    agreement.clone()
                }
                None => return,
            }
        };
        self.logger
            .log_agreement(agreement.id, agreement.entity_id, agreement.status.as_str());
        self.archive(agreement);
    }

    /// Destroys the active record; terminal agreements live in the archive.
    fn archive(&self, agreement: Agreement) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.remove(&agreement.id);
        let mut archived = self.archived.write().unwrap_or_else(|e| e.into_inner());
        archived.insert(agreement.id, agreement);
    }

    /// Fetches an agreement, active or archived.
    pub fn get(&self, agreement_id: AgreementId) -> Option<Agreement> {
        {
            let active = self.active.read().unwrap_or_else(|e| e.into_inner());
            if let Some(agreement) = active.get(&agreement_id) {
                return Some(agreement.clone());
            }
        }
        let archived = self.archived.read().unwrap_or_else(|e| e.into_inner());
        archived.get(&agreement_id).cloned()
    }

    /// Currently outstanding (non-terminal) agreements.
    pub fn outstanding(&self) -> Vec<Agreement> {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Agreement> = active.values().cloned().collect();
        list.sort_by_key(|a| a.drafted_at);
        list
    }
}

#[cfg(test)]
#[path = "tests/agreement_tests.rs"]
mod tests;
