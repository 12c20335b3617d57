//! Outreach scheduler: the periodic driver that dispatches first-contact
//! and follow-up messages.
//!
//! Each tick collects due entities, caps the batch (backpressure on the
//! delivery collaborator), and dispatches one entity at a time under its
//! logical lock. Per-entity failures are isolated; a tick can be cancelled
//! between entities but never mid-mutation.

pub mod templates;

use crate::config::SchedulerConfig;
use crate::delivery::MessageDelivery;
use crate::domain::{
    Campaign, Clock, Entity, EntityId, EntityStatus, PipelineError, TemplateId, TimestampUtc,
};
use crate::metrics::{MetricEvent, MetricsAggregator};
use crate::pipeline_log::PipelineLogger;
use crate::registry::EntityRegistry;
use chrono::Duration;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;

/// An ephemeral scheduled unit of work. Created by the scheduler, consumed
/// exactly once by a dispatch, then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutreachTask {
    pub entity_id: EntityId,
    pub campaign_id: crate::domain::CampaignId,
    pub template_id: TemplateId,
    pub scheduled_at: TimestampUtc,
    pub attempt: u32,
}

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TickSummary {
    pub due: usize,
    pub dispatched: usize,
    pub skipped_locked: usize,
    pub skipped_stale_read: usize,
    pub transient_failures: usize,
    pub exhausted_delivery: usize,
    pub went_stale: usize,
    pub cancelled: bool,
}

/// Outcome of dispatching a single entity.
enum DispatchOutcome {
    Dispatched,
    /// Response window elapsed with nothing left to send; went stale.
    Retired,
    SkippedLocked,
    SkippedStaleRead,
    TransientFailure,
    DeliveryExhausted,
}

pub struct OutreachScheduler {
    registry: Arc<dyn EntityRegistry>,
    delivery: Arc<dyn MessageDelivery>,
    metrics: Arc<MetricsAggregator>,
    logger: Arc<PipelineLogger>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl OutreachScheduler {
    pub fn new(
        registry: Arc<dyn EntityRegistry>,
        delivery: Arc<dyn MessageDelivery>,
        metrics: Arc<MetricsAggregator>,
        logger: Arc<PipelineLogger>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            delivery,
            metrics,
            logger,
            clock,
            config,
        }
    }

    /// Full outreach tick: due follow-ups plus newly targeted entities.
    pub async fn run_tick(
        &self,
        campaign: &Campaign,
        shutdown: &watch::Receiver<bool>,
    ) -> TickSummary {
        self.drive(campaign, true, shutdown).await
    }

    /// Follow-up sweep: due follow-ups only, no first contacts.
    pub async fn sweep_follow_ups(
        &self,
        campaign: &Campaign,
        shutdown: &watch::Receiver<bool>,
    ) -> TickSummary {
        self.drive(campaign, false, shutdown).await
    }

    async fn drive(
        &self,
        campaign: &Campaign,
        include_new: bool,
        shutdown: &watch::Receiver<bool>,
    ) -> TickSummary {
        let now = self.clock.now();
        let mut due = self.collect_due(campaign, include_new, now).await;
        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };
        due.truncate(self.config.batch_size);

        for entity in due {
            // Checkpoint: a cancelled tick stops between entities, never
            // mid-mutation.
            if *shutdown.borrow() {
                summary.cancelled = true;
                break;
            }

            match self.dispatch_one(campaign, entity.id).await {
                DispatchOutcome::Dispatched => summary.dispatched += 1,
                DispatchOutcome::Retired => summary.went_stale += 1,
                DispatchOutcome::SkippedLocked => summary.skipped_locked += 1,
                DispatchOutcome::SkippedStaleRead => summary.skipped_stale_read += 1,
                DispatchOutcome::TransientFailure => summary.transient_failures += 1,
                DispatchOutcome::DeliveryExhausted => summary.exhausted_delivery += 1,
            }
        }

        self.logger.log_tick_summary(serde_json::json!({
            "type": "TickSummary",
            "campaign": campaign.id,
            "include_new": include_new,
            "summary": summary,
        }));
        summary
    }

    /// Collects entities due for outreach, ordered by entity id.
    async fn collect_due(
        &self,
        campaign: &Campaign,
        include_new: bool,
        now: TimestampUtc,
    ) -> Vec<Entity> {
        let campaign_id = campaign.id;
        self.registry
            .query(Box::new(move |entity| {
                if entity.campaign != Some(campaign_id) {
                    return false;
                }
                match entity.status {
                    EntityStatus::New => include_new,
                    EntityStatus::Contacted | EntityStatus::Interested => entity
                        .next_follow_up
                        .map(|next| next <= now)
                        .unwrap_or(false),
                    _ => false,
                }
            }))
            .collect()
            .await
    }

    /// Dispatches one entity under its logical lock.
    ///
    /// The lock is released on every exit path; per-entity errors never
    /// propagate to the tick loop.
    async fn dispatch_one(&self, campaign: &Campaign, id: EntityId) -> DispatchOutcome {
        // Another worker mid-dispatch: skip this tick.
        let _lease = match self.registry.try_lock(id) {
            Some(lease) => lease,
            None => return DispatchOutcome::SkippedLocked,
        };

        // Fresh read under the lock; a signal may have moved the entity
        // since the due list was collected.
        let mut entity = match self.registry.get(id).await {
            Ok(entity) => entity,
            Err(_) => return DispatchOutcome::SkippedStaleRead,
        };
        let now = self.clock.now();
        if !self.still_due(&entity, now) {
            return DispatchOutcome::SkippedStaleRead;
        }

        let message_index = entity.messages_sent;
        let template = match campaign.template_for(message_index) {
            Some(template) => template,
            None => {
                // Response window elapsed and the cadence has nothing left
                // to send; the entity falls out of the pipeline.
                self.mark_terminal(&mut entity, EntityStatus::Stale, now).await;
                return DispatchOutcome::Retired;
            }
        };

        let task = OutreachTask {
            entity_id: entity.id,
            campaign_id: campaign.id,
            template_id: template.id.clone(),
            scheduled_at: now,
            attempt: entity.delivery_attempts + 1,
        };

        let rendered = templates::render(template, &entity);
        let timeout = StdDuration::from_secs(self.config.delivery_timeout_secs);
        let sent = tokio::time::timeout(
            timeout,
            self.delivery.send(&entity.profile.contact.email, &rendered),
        )
        .await;

        let failure = match sent {
            Ok(Ok(receipt)) => {
                tracing::debug!(
                    entity = %entity.id,
                    provider_id = %receipt.provider_message_id,
                    "delivery accepted"
                );
                None
            }
            Ok(Err(err)) => Some(PipelineError::TransientDelivery {
                message: err.to_string(),
            }),
            Err(_) => Some(PipelineError::TransientDelivery {
                message: format!("delivery timed out after {:?}", timeout),
            }),
        };

        match failure {
            None => self.finish_dispatch(campaign, entity, task, now).await,
            Some(err) => self.record_failure(entity, task, err, now).await,
        }
    }

    fn still_due(&self, entity: &Entity, now: TimestampUtc) -> bool {
        match entity.status {
            EntityStatus::New => true,
            EntityStatus::Contacted | EntityStatus::Interested => entity
                .next_follow_up
                .map(|next| next <= now)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Applies the post-send bookkeeping: first contact transition and
    /// the next follow-up (or response-window) schedule.
    async fn finish_dispatch(
        &self,
        campaign: &Campaign,
        mut entity: Entity,
        task: OutreachTask,
        now: TimestampUtc,
    ) -> DispatchOutcome {
        let message_index = entity.messages_sent;

        if entity.status == EntityStatus::New {
            match self
                .registry
                .compare_and_set_status(entity.id, EntityStatus::New, EntityStatus::Contacted, now)
                .await
            {
                Ok(updated) => {
                    self.logger
                        .log_transition(entity.id, EntityStatus::New, EntityStatus::Contacted);
                    self.metrics.record(MetricEvent::EntityContacted, now);
                    entity = updated;
                }
                Err(err) => {
                    // Lost the race despite the lease; leave state alone.
                    self.logger.log_conflict(entity.id, &err.to_string());
                    return DispatchOutcome::SkippedStaleRead;
                }
            }
        }

        // After the final message the entity is held in a response window
        // rather than retired on the spot, so a late reply can still move
        // it forward. The sweep that finds the window elapsed with nothing
        // left to send marks it stale.
        let wait = campaign.gap_after(message_index).unwrap_or_else(|| {
            Duration::hours(i64::from(campaign.rules.follow_up_interval_hours))
        });
        if entity.record_dispatch(now, Some(now.plus(wait))).is_err() {
            // Zero or negative gap cannot happen with a validated campaign;
            // treat a violation as a skipped item rather than corrupt state.
            self.logger
                .log_conflict(entity.id, "follow-up schedule violated invariant");
            return DispatchOutcome::SkippedStaleRead;
        }
        if message_index > 0 {
            entity.follow_ups_sent += 1;
        }

        if let Err(err) = self.registry.upsert(entity.clone()).await {
            self.logger.log_conflict(entity.id, &err.to_string());
            return DispatchOutcome::SkippedStaleRead;
        }

        self.metrics.record(
            MetricEvent::MessageSent {
                campaign: campaign.id,
            },
            now,
        );
        self.logger.log_dispatch(
            task.entity_id,
            task.campaign_id,
            task.template_id.as_str(),
            task.attempt,
        );

        DispatchOutcome::Dispatched
    }

    /// Counts a transient delivery failure; after the bounded retry count
    /// the entity moves to `failed_delivery` rather than being dropped.
    async fn record_failure(
        &self,
        mut entity: Entity,
        task: OutreachTask,
        err: PipelineError,
        now: TimestampUtc,
    ) -> DispatchOutcome {
        entity.delivery_attempts += 1;
        entity.updated_at = now;
        self.logger
            .log_delivery_failure(entity.id, entity.delivery_attempts, &err.to_string());
        self.metrics.record(MetricEvent::DeliveryFailed, now);
        tracing::warn!(
            entity = %entity.id,
            attempt = entity.delivery_attempts,
            template = %task.template_id,
            error = %err,
            "delivery failed"
        );

        if entity.delivery_attempts >= self.config.delivery_retry_limit {
            self.mark_terminal(&mut entity, EntityStatus::FailedDelivery, now)
                .await;
            return DispatchOutcome::DeliveryExhausted;
        }

        if let Err(save_err) = self.registry.upsert(entity.clone()).await {
            self.logger.log_conflict(entity.id, &save_err.to_string());
        }
        DispatchOutcome::TransientFailure
    }

    async fn mark_terminal(&self, entity: &mut Entity, terminal: EntityStatus, now: TimestampUtc) {
        let from = entity.status;
        match self
            .registry
            .compare_and_set_status(entity.id, from, terminal, now)
            .await
        {
            Ok(_) => {
                self.logger.log_transition(entity.id, from, terminal);
                entity.status = terminal;
                entity.next_follow_up = None;
                if let Err(err) = self.registry.upsert(entity.clone()).await {
                    self.logger.log_conflict(entity.id, &err.to_string());
                }
            }
            Err(err) => self.logger.log_conflict(entity.id, &err.to_string()),
        }
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
