use acquisition_pipeline::config::PipelineConfig;
use acquisition_pipeline::delivery::{
    AgreementStore, DeliveryReceipt, MessageDelivery, RenderedMessage, SignatureStatus,
};
use acquisition_pipeline::domain::{
    Agreement, AgreementId, Campaign, Clock, Entity, EntityCategory, EntityId, EntityProfile,
    ManualClock, SystemClock, TimestampUtc,
};
use acquisition_pipeline::metrics::{MetricsAggregator, RollupPeriod};
use acquisition_pipeline::pipeline_log::PipelineLogger;
use acquisition_pipeline::registry::{EntityRegistry, InMemoryRegistry};
use acquisition_pipeline::runtime::PipelineRuntime;
use acquisition_pipeline::scheduler::OutreachScheduler;
use acquisition_pipeline::signals::{ResponseSignal, SignalKind, SignalProcessor};
use acquisition_pipeline::{agreements::AgreementManager, targeting};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Autonomous acquisition pipeline: targeting, outreach, and agreements")]
#[command(version)]
struct Cli {
    /// Pipeline config file (YAML); defaults to the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline workers until interrupted
    Run {
        /// Campaign definitions (YAML list)
        #[arg(long)]
        campaigns: PathBuf,
        /// Entity seed file (YAML list of {category, profile})
        #[arg(long)]
        entities: Option<PathBuf>,
    },
    /// Replay a scripted scenario on a virtual clock
    Simulate {
        /// Scenario file (YAML)
        scenario: PathBuf,
    },
    /// Validate config and campaign files without running anything
    CheckConfig {
        /// Campaign definitions to validate alongside the config
        #[arg(long)]
        campaigns: Option<PathBuf>,
    },
}

/// Delivery used when no real provider is wired up: accepts every message
/// and logs it, so `run` exercises the full pipeline without sending mail.
struct LoggingDelivery {
    logger: Arc<PipelineLogger>,
}

#[async_trait]
impl MessageDelivery for LoggingDelivery {
    async fn send(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> Result<DeliveryReceipt> {
        self.logger.log(
            "Delivery",
            serde_json::json!({
                "type": "OutboundMessage",
                "recipient": recipient,
                "template": message.template_id,
                "subject": message.subject,
            }),
        );
        Ok(DeliveryReceipt {
            provider_message_id: uuid::Uuid::new_v4().to_string(),
            accepted_at: TimestampUtc::now(),
        })
    }
}

/// In-process agreement store; signatures are injected (simulation) or
/// never arrive (dry run).
#[derive(Default)]
struct InMemoryAgreementStore {
    agreements: Mutex<HashMap<AgreementId, Agreement>>,
    signatures: Mutex<HashMap<AgreementId, SignatureStatus>>,
}

impl InMemoryAgreementStore {
    fn record_signature(&self, id: AgreementId, status: SignatureStatus) {
        self.signatures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, status);
    }
}

#[async_trait]
impl AgreementStore for InMemoryAgreementStore {
    async fn store(&self, agreement: &Agreement) -> Result<()> {
        self.agreements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(agreement.id, agreement.clone());
        Ok(())
    }

    async fn signature_status(&self, id: AgreementId) -> Result<SignatureStatus> {
        Ok(self
            .signatures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
            .unwrap_or(SignatureStatus::Pending))
    }
}

#[derive(Debug, Deserialize)]
struct SeedEntity {
    category: EntityCategory,
    profile: EntityProfile,
}

/// A scripted simulation: a fixed pool, campaigns, and a step list driven
/// on a manual clock.
#[derive(Debug, Deserialize)]
struct Scenario {
    campaigns: Vec<Campaign>,
    #[serde(default)]
    entities: Vec<SeedEntity>,
    script: Vec<ScriptStep>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ScriptStep {
    /// Move the virtual clock forward.
    Advance { hours: u32 },
    /// Assign unengaged matching entities to campaigns.
    Ingest,
    /// Full outreach tick over every campaign.
    Tick,
    /// Follow-up sweep over every campaign.
    Sweep,
    /// Record an open-tracking ping for the nth scripted entity.
    Open { entity: usize },
    /// Deliver a response signal to the nth scripted entity.
    Signal {
        entity: usize,
        #[serde(flatten)]
        kind: SignalKind,
    },
    /// Mark the nth entity's outstanding agreement as signed.
    Sign { entity: usize },
    /// Agreement review sweep.
    Review,
    /// Print a metrics snapshot.
    Report,
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {} file {}", what, path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {} file {}", what, path.display()))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => match PipelineConfig::default_path() {
            Some(default) if default.exists() => PipelineConfig::load(&default),
            _ => Ok(PipelineConfig::default()),
        },
    }
}

fn load_campaigns(path: &Path) -> Result<Vec<Campaign>> {
    let campaigns: Vec<Campaign> = load_yaml(path, "campaign")?;
    if campaigns.is_empty() {
        bail!("campaign file {} defines no campaigns", path.display());
    }
    for campaign in &campaigns {
        campaign
            .validate()
            .with_context(|| format!("campaign '{}' failed validation", campaign.name))?;
    }
    Ok(campaigns)
}

async fn seed_registry(
    registry: &Arc<dyn EntityRegistry>,
    seeds: Vec<SeedEntity>,
    priority_industries: &[String],
    now: TimestampUtc,
) -> Result<Vec<EntityId>> {
    let mut ids = Vec::with_capacity(seeds.len());
    for seed in seeds {
        let mut entity = Entity::new(seed.category, seed.profile, now);
        entity.rescore(priority_industries);
        ids.push(entity.id);
        registry.upsert(entity).await?;
    }
    Ok(ids)
}

async fn run(config: PipelineConfig, campaigns: PathBuf, entities: Option<PathBuf>) -> Result<()> {
    let campaigns = load_campaigns(&campaigns)?;
    let registry: Arc<dyn EntityRegistry> = Arc::new(InMemoryRegistry::new());
    if let Some(path) = entities {
        let seeds: Vec<SeedEntity> = load_yaml(&path, "entity seed")?;
        let count = seeds.len();
        seed_registry(
            &registry,
            seeds,
            &config.scoring.priority_industries,
            TimestampUtc::now(),
        )
        .await?;
        println!("seeded {} entities", count);
    }

    let logger = Arc::new(PipelineLogger::new(&config.logs_dir)?);
    let delivery = Arc::new(LoggingDelivery {
        logger: Arc::clone(&logger),
    });
    let store = Arc::new(InMemoryAgreementStore::default());

    let runtime = PipelineRuntime::start(
        &config,
        campaigns,
        registry,
        delivery,
        store,
        Arc::new(SystemClock),
    )?;
    println!("pipeline running; logs at {}", config.logs_dir.display());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    println!("shutting down");
    runtime.shutdown().await;
    Ok(())
}

async fn simulate(config: PipelineConfig, scenario_path: PathBuf) -> Result<()> {
    let scenario: Scenario = load_yaml(&scenario_path, "scenario")?;
    for campaign in &scenario.campaigns {
        campaign
            .validate()
            .with_context(|| format!("campaign '{}' failed validation", campaign.name))?;
    }

    let clock = Arc::new(ManualClock::starting_at(TimestampUtc::now()));
    let registry: Arc<dyn EntityRegistry> = Arc::new(InMemoryRegistry::new());
    let logger = Arc::new(PipelineLogger::new(&config.logs_dir)?);
    let metrics = Arc::new(MetricsAggregator::new());
    let store = Arc::new(InMemoryAgreementStore::default());
    let delivery = Arc::new(LoggingDelivery {
        logger: Arc::clone(&logger),
    });
    let (draft_tx, mut draft_rx) = mpsc::channel(64);

    let scheduler = OutreachScheduler::new(
        Arc::clone(&registry),
        delivery.clone(),
        Arc::clone(&metrics),
        Arc::clone(&logger),
        clock.clone() as Arc<dyn Clock>,
        config.scheduler.clone(),
    );
    let signals = SignalProcessor::new(
        Arc::clone(&registry),
        Arc::clone(&metrics),
        Arc::clone(&logger),
        clock.clone() as Arc<dyn Clock>,
        config.signals.clone(),
        config.agreements.negotiation_threshold,
        config.scoring.priority_industries.clone(),
        &scenario.campaigns,
        draft_tx,
    );
    let agreements = AgreementManager::new(
        Arc::clone(&registry),
        Arc::clone(&store) as Arc<dyn AgreementStore>,
        delivery,
        Arc::clone(&metrics),
        Arc::clone(&logger),
        clock.clone() as Arc<dyn Clock>,
        config.agreements.clone(),
    );

    let entity_ids = seed_registry(
        &registry,
        scenario.entities,
        &config.scoring.priority_industries,
        clock.now(),
    )
    .await?;
    let (_stop_tx, stop_rx) = watch::channel(false);

    let entity_at = |index: usize| -> Result<EntityId> {
        entity_ids
            .get(index)
            .copied()
            .with_context(|| format!("script references entity #{} of {}", index, entity_ids.len()))
    };

    for (step_no, step) in scenario.script.into_iter().enumerate() {
        match step {
            ScriptStep::Advance { hours } => {
                clock.advance(chrono::Duration::hours(i64::from(hours)));
            }
            ScriptStep::Ingest => {
                for campaign in &scenario.campaigns {
                    let targets = targeting::select_targets(campaign, &registry).await;
                    for target in targets {
                        if target.campaign.is_some() {
                            continue;
                        }
                        let mut entity = registry.get(target.id).await?;
                        entity.campaign = Some(campaign.id);
                        entity.rescore(&config.scoring.priority_industries);
                        registry.upsert(entity).await?;
                    }
                }
            }
            ScriptStep::Tick => {
                for campaign in &scenario.campaigns {
                    let summary = scheduler.run_tick(campaign, &stop_rx).await;
                    println!("tick [{}]: {}", campaign.name, serde_json::to_string(&summary)?);
                }
            }
            ScriptStep::Sweep => {
                for campaign in &scenario.campaigns {
                    scheduler.sweep_follow_ups(campaign, &stop_rx).await;
                }
            }
            ScriptStep::Open { entity } => {
                let id = entity_at(entity)?;
                signals.note_opened(id).await?;
            }
            ScriptStep::Signal { entity, kind } => {
                let id = entity_at(entity)?;
                match signals
                    .apply(ResponseSignal {
                        entity_id: id,
                        kind,
                    })
                    .await
                {
                    Ok(outcome) => println!("signal -> {:?}", outcome),
                    Err(err) => println!("signal rejected at step {}: {}", step_no + 1, err),
                }
                // Drain any drafting work the signal queued.
                while let Ok(entity_id) = draft_rx.try_recv() {
                    let agreement = agreements.draft_for(entity_id).await?;
                    agreements.send(agreement.id).await?;
                }
            }
            ScriptStep::Sign { entity } => {
                let id = entity_at(entity)?;
                let outstanding = agreements
                    .outstanding()
                    .into_iter()
                    .find(|a| a.entity_id == id)
                    .with_context(|| format!("entity #{} has no outstanding agreement", entity))?;
                store.record_signature(outstanding.id, SignatureStatus::Signed);
            }
            ScriptStep::Review => {
                let summary = agreements.review_sweep().await;
                println!("review: {}", serde_json::to_string(&summary)?);
            }
            ScriptStep::Report => {
                print_report(&registry, &metrics, clock.now()).await?;
            }
        }
    }

    println!("== final state ==");
    print_report(&registry, &metrics, clock.now()).await?;
    Ok(())
}

async fn print_report(
    registry: &Arc<dyn EntityRegistry>,
    metrics: &MetricsAggregator,
    now: TimestampUtc,
) -> Result<()> {
    use futures::StreamExt;
    let entities: Vec<Entity> = registry.query(Box::new(|_| true)).collect().await;
    let mut by_status: HashMap<String, usize> = HashMap::new();
    for entity in &entities {
        *by_status.entry(entity.status.to_string()).or_default() += 1;
    }

    let active: Vec<Entity> = entities
        .iter()
        .filter(|e| e.status.is_active())
        .cloned()
        .collect();
    let rollup = metrics.rollup(RollupPeriod::Daily, now, &active);

    println!("entities: {}", serde_json::to_string(&by_status)?);
    println!("totals:   {}", serde_json::to_string(&metrics.totals())?);
    println!(
        "daily:    {} (conversion {:.2}, pipeline value {:.0})",
        serde_json::to_string(&rollup.window)?,
        rollup.conversion_rate,
        rollup.pipeline_value,
    );
    Ok(())
}

fn check_config(config: &PipelineConfig, campaigns: Option<PathBuf>) -> Result<()> {
    config.validate()?;
    println!("config: ok");
    if let Some(path) = campaigns {
        let campaigns = load_campaigns(&path)?;
        println!("campaigns: {} ok", campaigns.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            campaigns,
            entities,
        } => run(config, campaigns, entities).await,
        Command::Simulate { scenario } => simulate(config, scenario).await,
        Command::CheckConfig { campaigns } => check_config(&config, campaigns),
    }
}
