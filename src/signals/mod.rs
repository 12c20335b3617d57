//! Response state machine: applies external signals to entities.
//!
//! Signals arrive from outside the core (webhook, review queue, manual
//! action) already classified; the processor validates the transition
//! against the table, updates response history and conversion probability,
//! recomputes priority, and hands qualifying entities to the agreement
//! manager's drafting queue.

use crate::config::SignalConfig;
use crate::domain::{
    Campaign, CampaignId, Clock, Entity, EntityId, EntityStatus, PipelineError, Probability,
    TimestampUtc,
};
use crate::metrics::{MetricEvent, MetricsAggregator};
use crate::pipeline_log::PipelineLogger;
use crate::registry::EntityRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// How an external response was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClassification {
    Interested,
    NotInterested,
    RequestedDetail,
}

impl ResponseClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseClassification::Interested => "interested",
            ResponseClassification::NotInterested => "not_interested",
            ResponseClassification::RequestedDetail => "requested_detail",
        }
    }
}

/// An external signal bound to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SignalKind {
    Responded {
        classification: ResponseClassification,
    },
    TimedOut,
    ManualOverride {
        target: EntityStatus,
    },
}

impl SignalKind {
    fn name(&self) -> &'static str {
        match self {
            SignalKind::Responded { .. } => "responded",
            SignalKind::TimedOut => "timed_out",
            SignalKind::ManualOverride { .. } => "manual_override",
        }
    }
}

/// A signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSignal {
    pub entity_id: EntityId,
    pub kind: SignalKind,
}

/// Result of applying a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// Status moved through the table.
    Applied {
        from: EntityStatus,
        to: EntityStatus,
    },
    /// Signal acknowledged; bookkeeping updated without a status change.
    Recorded,
    /// Entity already terminal: signals are idempotent no-ops.
    AlreadyTerminal,
}

pub struct SignalProcessor {
    registry: Arc<dyn EntityRegistry>,
    metrics: Arc<MetricsAggregator>,
    logger: Arc<PipelineLogger>,
    clock: Arc<dyn Clock>,
    config: SignalConfig,
    negotiation_threshold: f64,
    campaign_thresholds: HashMap<CampaignId, f64>,
    priority_industries: Vec<String>,
    draft_tx: mpsc::Sender<EntityId>,
}

impl SignalProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn EntityRegistry>,
        metrics: Arc<MetricsAggregator>,
        logger: Arc<PipelineLogger>,
        clock: Arc<dyn Clock>,
        config: SignalConfig,
        negotiation_threshold: f64,
        priority_industries: Vec<String>,
        campaigns: &[Campaign],
        draft_tx: mpsc::Sender<EntityId>,
    ) -> Self {
        let campaign_thresholds = campaigns
            .iter()
            .filter_map(|c| c.rules.escalation_threshold.map(|t| (c.id, t)))
            .collect();
        Self {
            registry,
            metrics,
            logger,
            clock,
            config,
            negotiation_threshold,
            campaign_thresholds,
            priority_industries,
            draft_tx,
        }
    }

    /// Applies one signal.
    ///
    /// Unknown entities fail with `NotFound`; terminal entities no-op. A
    /// `Conflict` from the registry is retried (re-read then re-apply) up
    /// to the configured limit before surfacing to the caller.
    pub async fn apply(&self, signal: ResponseSignal) -> Result<SignalOutcome, PipelineError> {
        let classification = match signal.kind {
            SignalKind::Responded { classification } => Some(classification.as_str()),
            _ => None,
        };
        self.logger
            .log_signal(signal.entity_id, signal.kind.name(), classification);

        let mut attempt = 0;
        loop {
            match self.apply_once(signal).await {
                Err(PipelineError::Conflict { message }) if attempt < self.config.cas_retry_limit => {
                    attempt += 1;
                    self.logger.log_conflict(signal.entity_id, &message);
                    tracing::debug!(
                        entity = %signal.entity_id,
                        attempt,
                        "signal hit status conflict, re-reading"
                    );
                }
                other => return other,
            }
        }
    }

    async fn apply_once(&self, signal: ResponseSignal) -> Result<SignalOutcome, PipelineError> {
        // Serialize against the scheduler and other signal deliveries.
        let _lease = self
            .registry
            .try_lock(signal.entity_id)
            .ok_or(PipelineError::Conflict {
                message: format!("entity {} has an action in flight", signal.entity_id),
            })?;

        let entity = self.registry.get(signal.entity_id).await?;
        if entity.status.is_terminal() {
            return Ok(SignalOutcome::AlreadyTerminal);
        }
        let now = self.clock.now();

        let target = self.target_status(&entity, signal.kind);
        let outcome = match target {
            Some(to) => {
                let from = entity.status;
                self.registry
                    .compare_and_set_status(signal.entity_id, from, to, now)
                    .await?;
                self.logger.log_transition(signal.entity_id, from, to);
                SignalOutcome::Applied { from, to }
            }
            None => SignalOutcome::Recorded,
        };

        let mut updated = self.registry.get(signal.entity_id).await?;
        self.update_bookkeeping(&mut updated, signal.kind, now);
        self.registry.upsert(updated.clone()).await?;

        if let SignalKind::Responded { .. } = signal.kind {
            self.metrics.record(
                MetricEvent::ReplyReceived {
                    campaign: updated.campaign,
                },
                now,
            );
        }
        if updated.status == EntityStatus::Closed {
            self.metrics.record(
                MetricEvent::EntityConverted {
                    campaign: updated.campaign,
                },
                now,
            );
        }

        if updated.status == EntityStatus::Negotiating
            && updated.conversion_probability.value() > self.threshold_for(updated.campaign)
        {
            // Queue full means the agreement sweep is behind; the entity
            // stays negotiating and is re-queued by the next signal.
            if let Err(err) = self.draft_tx.try_send(updated.id) {
                tracing::warn!(entity = %updated.id, error = %err, "drafting queue full");
            }
        }

        Ok(outcome)
    }

    /// Resolves the transition table for this signal, or `None` when only
    /// bookkeeping should change.
    fn target_status(&self, entity: &Entity, kind: SignalKind) -> Option<EntityStatus> {
        use EntityStatus::*;
        match kind {
            SignalKind::Responded { classification } => match (classification, entity.status) {
                (ResponseClassification::Interested, Contacted) => Some(Interested),
                (ResponseClassification::Interested, Interested) => Some(Negotiating),
                (ResponseClassification::RequestedDetail, Contacted) => Some(Interested),
                (ResponseClassification::RequestedDetail, Interested) => Some(Negotiating),
                (ResponseClassification::NotInterested, Contacted) => Some(Rejected),
                (ResponseClassification::NotInterested, Negotiating) => Some(Rejected),
                // An interested entity opting out has no table path to
                // rejected; it falls out of the pipeline as stale.
                (ResponseClassification::NotInterested, Interested) => Some(Stale),
                _ => None,
            },
            SignalKind::TimedOut => Some(Stale),
            SignalKind::ManualOverride { target } => Some(target),
        }
    }

    fn update_bookkeeping(&self, entity: &mut Entity, kind: SignalKind, now: TimestampUtc) {
        if let SignalKind::Responded { classification } = kind {
            entity.response_count += 1;
            entity.conversion_probability = match classification {
                ResponseClassification::Interested => entity
                    .conversion_probability
                    .raised_by(self.config.reply_probability_step),
                ResponseClassification::RequestedDetail => entity
                    .conversion_probability
                    .raised_by(self.config.detail_probability_step),
                ResponseClassification::NotInterested => Probability::zero(),
            };
        }
        if entity.status.is_terminal() || entity.status == EntityStatus::Negotiating {
            entity.next_follow_up = None;
        }
        entity.rescore(&self.priority_industries);
        entity.updated_at = now;
    }

    fn threshold_for(&self, campaign: Option<CampaignId>) -> f64 {
        campaign
            .and_then(|id| self.campaign_thresholds.get(&id).copied())
            .unwrap_or(self.negotiation_threshold)
    }

    /// Records an open-tracking ping from the delivery provider.
    pub async fn note_opened(&self, entity_id: EntityId) -> Result<(), PipelineError> {
        let entity = self.registry.get(entity_id).await?;
        if let Some(campaign) = entity.campaign {
            self.metrics
                .record(MetricEvent::MessageOpened { campaign }, self.clock.now());
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/signal_tests.rs"]
mod tests;
