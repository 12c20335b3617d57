//! Worker orchestration: spawns the background loops and owns shutdown.
//!
//! Four loops run concurrently over shared components:
//! - ingestion: matches unassigned entities against campaign criteria
//! - outreach ticks: first contacts plus due follow-ups
//! - follow-up sweeps: due follow-ups only, on a tighter interval
//! - agreement work: drains the drafting queue and reviews sent agreements
//!
//! Shutdown is cooperative: a watch flag flips, every loop finishes its
//! current entity and exits, and `shutdown` joins them all.

use crate::agreements::AgreementManager;
use crate::api::DashboardApi;
use crate::config::PipelineConfig;
use crate::delivery::{AgreementStore, MessageDelivery};
use crate::domain::{Campaign, Clock, PipelineError};
use crate::metrics::MetricsAggregator;
use crate::pipeline_log::PipelineLogger;
use crate::registry::EntityRegistry;
use crate::scheduler::OutreachScheduler;
use crate::signals::SignalProcessor;
use crate::targeting;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Capacity of the signal-processor -> agreement-manager drafting queue.
const DRAFT_QUEUE_CAPACITY: usize = 64;

pub struct PipelineRuntime {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    registry: Arc<dyn EntityRegistry>,
    metrics: Arc<MetricsAggregator>,
    logger: Arc<PipelineLogger>,
    signals: Arc<SignalProcessor>,
    agreements: Arc<AgreementManager>,
    api: Arc<DashboardApi>,
}

impl PipelineRuntime {
    /// Builds the component graph and spawns the worker loops.
    pub fn start(
        config: &PipelineConfig,
        campaigns: Vec<Campaign>,
        registry: Arc<dyn EntityRegistry>,
        delivery: Arc<dyn MessageDelivery>,
        store: Arc<dyn AgreementStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        for campaign in &campaigns {
            campaign
                .validate()
                .with_context(|| format!("campaign '{}' failed validation", campaign.name))?;
        }

        let logger = Arc::new(PipelineLogger::new(&config.logs_dir)?);
        let metrics = Arc::new(MetricsAggregator::new());
        let (draft_tx, draft_rx) = mpsc::channel(DRAFT_QUEUE_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        let scheduler = Arc::new(OutreachScheduler::new(
            Arc::clone(&registry),
            delivery.clone(),
            Arc::clone(&metrics),
            Arc::clone(&logger),
            Arc::clone(&clock),
            config.scheduler.clone(),
        ));
        let signals = Arc::new(SignalProcessor::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            Arc::clone(&logger),
            Arc::clone(&clock),
            config.signals.clone(),
            config.agreements.negotiation_threshold,
            config.scoring.priority_industries.clone(),
            &campaigns,
            draft_tx,
        ));
        let agreements = Arc::new(AgreementManager::new(
            Arc::clone(&registry),
            store,
            delivery,
            Arc::clone(&metrics),
            Arc::clone(&logger),
            Arc::clone(&clock),
            config.agreements.clone(),
        ));
        let api = Arc::new(DashboardApi::new(
            Arc::clone(&registry),
            Arc::clone(&metrics),
            Arc::clone(&logger),
            Arc::clone(&clock),
            config.scoring.priority_industries.clone(),
        ));

        let campaigns = Arc::new(campaigns);
        let mut handles = Vec::new();

        handles.push(Self::spawn_ingestion(
            Arc::clone(&registry),
            Arc::clone(&campaigns),
            config.scoring.priority_industries.clone(),
            Duration::from_secs(u64::from(config.ingestion.interval_hours) * 3600),
            shutdown_tx.subscribe(),
        ));
        handles.push(Self::spawn_outreach(
            Arc::clone(&scheduler),
            Arc::clone(&campaigns),
            Duration::from_secs(u64::from(config.scheduler.tick_interval_hours) * 3600),
            true,
            shutdown_tx.subscribe(),
        ));
        handles.push(Self::spawn_outreach(
            Arc::clone(&scheduler),
            Arc::clone(&campaigns),
            Duration::from_secs(u64::from(config.scheduler.follow_up_sweep_minutes) * 60),
            false,
            shutdown_tx.subscribe(),
        ));
        handles.push(Self::spawn_agreement_worker(
            Arc::clone(&agreements),
            draft_rx,
            Duration::from_secs(u64::from(config.agreements.review_interval_hours) * 3600),
            shutdown_tx.subscribe(),
        ));

        logger.log(
            "Runtime",
            serde_json::json!({
                "type": "Start",
                "campaigns": campaigns.len(),
            }),
        );

        Ok(Self {
            shutdown_tx,
            handles,
            registry,
            metrics,
            logger,
            signals,
            agreements,
            api,
        })
    }

    fn spawn_ingestion(
        registry: Arc<dyn EntityRegistry>,
        campaigns: Arc<Vec<Campaign>>,
        priority_industries: Vec<String>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        ingest_targets(&registry, &campaigns, &priority_industries).await;
                    }
                }
            }
        })
    }

    fn spawn_outreach(
        scheduler: Arc<OutreachScheduler>,
        campaigns: Arc<Vec<Campaign>>,
        every: Duration,
        include_new: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        for campaign in campaigns.iter() {
                            if *cancel.borrow() {
                                break;
                            }
                            if include_new {
                                scheduler.run_tick(campaign, &cancel).await;
                            } else {
                                scheduler.sweep_follow_ups(campaign, &cancel).await;
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_agreement_worker(
        agreements: Arc<AgreementManager>,
        mut draft_rx: mpsc::Receiver<crate::domain::EntityId>,
        review_every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut review = interval(review_every);
            review.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    maybe_id = draft_rx.recv() => match maybe_id {
                        Some(entity_id) => draft_and_send(&agreements, entity_id).await,
                        None => break,
                    },
                    _ = review.tick() => {
                        agreements.review_sweep().await;
                    }
                }
            }
        })
    }

    /// Flips the shutdown flag and joins every worker loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        self.logger
            .log("Runtime", serde_json::json!({"type": "Stop"}));
    }

    pub fn registry(&self) -> Arc<dyn EntityRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.metrics)
    }

    pub fn signals(&self) -> Arc<SignalProcessor> {
        Arc::clone(&self.signals)
    }

    pub fn agreements(&self) -> Arc<AgreementManager> {
        Arc::clone(&self.agreements)
    }

    pub fn api(&self) -> Arc<DashboardApi> {
        Arc::clone(&self.api)
    }
}

/// One ingestion pass: assigns unassigned matching entities to campaigns
/// and scores them.
async fn ingest_targets(
    registry: &Arc<dyn EntityRegistry>,
    campaigns: &[Campaign],
    priority_industries: &[String],
) {
    for campaign in campaigns {
        let targets = targeting::select_targets(campaign, registry).await;
        for target in targets {
            if target.campaign.is_some() {
                continue;
            }
            // Skip entities another worker grabbed since selection.
            let Some(_lease) = registry.try_lock(target.id) else {
                continue;
            };
            let mut entity = match registry.get(target.id).await {
                Ok(entity) => entity,
                Err(_) => continue,
            };
            if entity.campaign.is_some() || entity.is_engaged() {
                continue;
            }
            entity.campaign = Some(campaign.id);
            entity.rescore(priority_industries);
            if let Err(err) = registry.upsert(entity).await {
                tracing::warn!(entity = %target.id, error = %err, "ingestion upsert failed");
            }
        }
    }
}

async fn draft_and_send(agreements: &AgreementManager, entity_id: crate::domain::EntityId) {
    match agreements.draft_for(entity_id).await {
        Ok(agreement) => {
            if let Err(err) = agreements.send(agreement.id).await {
                tracing::warn!(
                    agreement = %agreement.id,
                    error = %err,
                    "agreement send failed, retrying on the next signal"
                );
            }
        }
        // The entity moved on between enqueue and drain.
        Err(PipelineError::Ineligible { message }) => {
            tracing::debug!(entity = %entity_id, message, "draft skipped");
        }
        Err(err) => {
            tracing::warn!(entity = %entity_id, error = %err, "agreement draft failed");
        }
    }
}

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
