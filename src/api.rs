//! Read/command surface for dashboards and operator tooling.
//!
//! Queries are snapshots over the registry and metrics aggregator;
//! commands go through the same locks and compare-and-set paths as the
//! background workers, so an operator action can never clobber a
//! concurrent dispatch.

use crate::domain::{
    CampaignId, Clock, Entity, EntityCategory, EntityId, EntityProfile, EntityStatus,
    PipelineError,
};
use crate::metrics::{
    pipeline_value, CampaignMetrics, MetricsAggregator, MetricsRollup, RollupPeriod,
};
use crate::pipeline_log::PipelineLogger;
use crate::registry::EntityRegistry;
use futures::StreamExt;
use std::sync::Arc;

pub struct DashboardApi {
    registry: Arc<dyn EntityRegistry>,
    metrics: Arc<MetricsAggregator>,
    logger: Arc<PipelineLogger>,
    clock: Arc<dyn Clock>,
    priority_industries: Vec<String>,
}

impl DashboardApi {
    pub fn new(
        registry: Arc<dyn EntityRegistry>,
        metrics: Arc<MetricsAggregator>,
        logger: Arc<PipelineLogger>,
        clock: Arc<dyn Clock>,
        priority_industries: Vec<String>,
    ) -> Self {
        Self {
            registry,
            metrics,
            logger,
            clock,
            priority_industries,
        }
    }

    /// All entities currently in `status`, ordered by entity id.
    pub async fn entities_by_status(&self, status: EntityStatus) -> Vec<Entity> {
        self.registry
            .query(Box::new(move |entity| entity.status == status))
            .collect()
            .await
    }

    /// Per-campaign tracking counters.
    pub fn campaign_metrics(&self, campaign: CampaignId) -> CampaignMetrics {
        self.metrics.campaign_metrics(campaign)
    }

    /// Probability-weighted revenue across the active pipeline, derived
    /// from the current registry snapshot.
    pub async fn pipeline_value(&self) -> f64 {
        let active = self.active_entities().await;
        pipeline_value(&active)
    }

    /// Windowed counters plus derived rates.
    pub async fn rollup(&self, period: RollupPeriod) -> MetricsRollup {
        let active = self.active_entities().await;
        self.metrics.rollup(period, self.clock.now(), &active)
    }

    async fn active_entities(&self) -> Vec<Entity> {
        self.registry
            .query(Box::new(|entity| entity.status.is_active()))
            .collect()
            .await
    }

    /// Adds a manually sourced entity to the pool.
    ///
    /// The entity enters as `new` and unassigned; the next ingestion pass
    /// matches it against campaign criteria like any other entity.
    pub async fn add_entity(
        &self,
        category: EntityCategory,
        profile: EntityProfile,
    ) -> Result<Entity, PipelineError> {
        let now = self.clock.now();
        let mut entity = Entity::new(category, profile, now);
        entity.rescore(&self.priority_industries);
        self.registry.upsert(entity.clone()).await?;
        self.logger.log(
            "Api",
            serde_json::json!({
                "type": "ManualAdd",
                "entity": entity.id,
                "priority": entity.priority.score,
            }),
        );
        Ok(entity)
    }

    /// Operator approval: fast-tracks an entity to `interested`.
    ///
    /// A `new` entity passes through `contacted` first, since the table has
    /// no direct edge. Already-interested entities are a no-op.
    pub async fn approve_entity(&self, id: EntityId) -> Result<Entity, PipelineError> {
        let _lease = self
            .registry
            .try_lock(id)
            .ok_or(PipelineError::Conflict {
                message: format!("entity {} has an action in flight", id),
            })?;

        let entity = self.registry.get(id).await?;
        let now = self.clock.now();
        match entity.status {
            EntityStatus::Interested => Ok(entity),
            EntityStatus::New => {
                self.registry
                    .compare_and_set_status(id, EntityStatus::New, EntityStatus::Contacted, now)
                    .await?;
                self.logger
                    .log_transition(id, EntityStatus::New, EntityStatus::Contacted);
                let updated = self
                    .registry
                    .compare_and_set_status(
                        id,
                        EntityStatus::Contacted,
                        EntityStatus::Interested,
                        now,
                    )
                    .await?;
                self.logger
                    .log_transition(id, EntityStatus::Contacted, EntityStatus::Interested);
                Ok(updated)
            }
            EntityStatus::Contacted => {
                let updated = self
                    .registry
                    .compare_and_set_status(
                        id,
                        EntityStatus::Contacted,
                        EntityStatus::Interested,
                        now,
                    )
                    .await?;
                self.logger
                    .log_transition(id, EntityStatus::Contacted, EntityStatus::Interested);
                Ok(updated)
            }
            other => Err(PipelineError::Ineligible {
                message: format!("cannot approve entity {} in status {}", id, other),
            }),
        }
    }
}
