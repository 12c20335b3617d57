use super::*;
use crate::delivery::{DeliveryReceipt, RenderedMessage, SignatureStatus};
use crate::domain::{
    Agreement, AgreementId, AutomationRules, CampaignId, ContactInfo, Entity, EntityCategory,
    EntityProfile, EntityStatus, MessageTemplate, Probability, SystemClock, TargetingCriteria,
    TimestampUtc,
};
use crate::registry::InMemoryRegistry;
use crate::signals::{ResponseClassification, ResponseSignal, SignalKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingDelivery {
    sent: Mutex<Vec<(String, RenderedMessage)>>,
}

impl RecordingDelivery {
    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageDelivery for RecordingDelivery {
    async fn send(
        &self,
        recipient: &str,
        message: &RenderedMessage,
    ) -> anyhow::Result<DeliveryReceipt> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient.to_string(), message.clone()));
        Ok(DeliveryReceipt {
            provider_message_id: format!("msg-{}", sent.len()),
            accepted_at: TimestampUtc::now(),
        })
    }
}

#[derive(Default)]
struct FakeAgreementStore {
    stored: Mutex<Vec<Agreement>>,
    statuses: Mutex<HashMap<AgreementId, SignatureStatus>>,
}

impl FakeAgreementStore {
    fn stored_ids(&self) -> Vec<AgreementId> {
        self.stored.lock().unwrap().iter().map(|a| a.id).collect()
    }

    fn set_status(&self, id: AgreementId, status: SignatureStatus) {
        self.statuses.lock().unwrap().insert(id, status);
    }
}

#[async_trait]
impl AgreementStore for FakeAgreementStore {
    async fn store(&self, agreement: &Agreement) -> anyhow::Result<()> {
        self.stored.lock().unwrap().push(agreement.clone());
        Ok(())
    }

    async fn signature_status(&self, id: AgreementId) -> anyhow::Result<SignatureStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .unwrap_or(SignatureStatus::Pending))
    }
}

fn lead_campaign() -> Campaign {
    Campaign {
        id: CampaignId::new(),
        name: "lead-outreach".to_string(),
        criteria: TargetingCriteria {
            category: EntityCategory::Lead,
            revenue: None,
            fleet_size: None,
            regions: vec![],
            capabilities: vec![],
            min_rating: None,
        },
        initial: MessageTemplate {
            id: "intro".into(),
            subject: "Hello {{company}}".to_string(),
            body: "Hi {{name}}".to_string(),
        },
        follow_ups: vec![],
        rules: AutomationRules::default(),
        created_at: TimestampUtc::now(),
    }
}

fn lead_entity() -> Entity {
    Entity::new(
        EntityCategory::Lead,
        EntityProfile {
            contact: ContactInfo {
                name: "Alex Duran".to_string(),
                company: "Duran Goods".to_string(),
                email: "alex@durangoods.example".to_string(),
                phone: None,
            },
            estimated_revenue: 800_000.0,
            fleet_size: 0,
            monthly_volume: 150,
            industry: "Retail".to_string(),
            region: "East".to_string(),
            capabilities: vec![],
            rating: 4.0,
        },
        TimestampUtc::now(),
    )
}

struct Harness {
    runtime: PipelineRuntime,
    registry: Arc<InMemoryRegistry>,
    delivery: Arc<RecordingDelivery>,
    store: Arc<FakeAgreementStore>,
    _logs: TempDir,
}

fn start(campaigns: Vec<Campaign>) -> Harness {
    let logs = TempDir::new().expect("temp logs dir");
    let mut config = PipelineConfig::default();
    config.logs_dir = logs.path().to_path_buf();

    let registry = Arc::new(InMemoryRegistry::new());
    let delivery = Arc::new(RecordingDelivery::default());
    let store = Arc::new(FakeAgreementStore::default());
    let runtime = PipelineRuntime::start(
        &config,
        campaigns,
        Arc::clone(&registry) as Arc<dyn EntityRegistry>,
        Arc::clone(&delivery) as Arc<dyn MessageDelivery>,
        Arc::clone(&store) as Arc<dyn AgreementStore>,
        Arc::new(SystemClock),
    )
    .expect("runtime start");

    Harness {
        runtime,
        registry,
        delivery,
        store,
        _logs: logs,
    }
}

#[tokio::test(start_paused = true)]
async fn ingestion_assigns_and_outreach_contacts_new_entities() {
    let campaign = lead_campaign();
    let harness = start(vec![campaign.clone()]);
    let entity = lead_entity();
    let id = entity.id;
    harness.registry.upsert(entity).await.unwrap();

    // Covers the first ingestion pass (12h interval, immediate first tick)
    // and at least one outreach tick after assignment.
    tokio::time::sleep(Duration::from_secs(13 * 3600)).await;

    let entity = harness.registry.get(id).await.unwrap();
    assert_eq!(entity.campaign, Some(campaign.id));
    assert_eq!(entity.status, EntityStatus::Contacted);
    assert!(entity.priority.score > 0);
    assert!(harness.delivery.sent_count() >= 1);

    harness.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn qualifying_signal_flows_through_to_a_sent_agreement() {
    let campaign = lead_campaign();
    let harness = start(vec![campaign.clone()]);
    let mut entity = lead_entity();
    entity.status = EntityStatus::Interested;
    entity.conversion_probability = Probability::new(0.6);
    entity.campaign = Some(campaign.id);
    let id = entity.id;
    harness.registry.upsert(entity).await.unwrap();

    let outcome = harness
        .runtime
        .signals()
        .apply(ResponseSignal {
            entity_id: id,
            kind: SignalKind::Responded {
                classification: ResponseClassification::Interested,
            },
        })
        .await
        .unwrap();
    assert!(matches!(outcome, crate::signals::SignalOutcome::Applied { .. }));

    // Let the agreement worker drain the drafting queue.
    tokio::time::sleep(Duration::from_secs(60)).await;
    let stored = harness.store.stored_ids();
    assert!(!stored.is_empty(), "agreement drafted and persisted");
    let agreement_id = stored[0];

    // Signature lands; the next review sweep (6h interval) settles it.
    harness
        .store
        .set_status(agreement_id, SignatureStatus::Signed);
    tokio::time::sleep(Duration::from_secs(7 * 3600)).await;

    assert_eq!(
        harness.registry.get(id).await.unwrap().status,
        EntityStatus::Closed
    );
    let totals = harness.runtime.metrics().totals();
    assert_eq!(totals.agreements_signed, 1);
    assert_eq!(totals.revenue, 800_000.0);

    harness.runtime.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_joins_all_workers() {
    let harness = start(vec![lead_campaign()]);
    tokio::time::sleep(Duration::from_secs(1)).await;
    // Must return rather than hang on a worker loop.
    harness.runtime.shutdown().await;
}

#[tokio::test]
async fn invalid_campaign_fails_startup() {
    let mut campaign = lead_campaign();
    campaign.name = String::new();

    let logs = TempDir::new().unwrap();
    let mut config = PipelineConfig::default();
    config.logs_dir = logs.path().to_path_buf();

    let result = PipelineRuntime::start(
        &config,
        vec![campaign],
        Arc::new(InMemoryRegistry::new()) as Arc<dyn EntityRegistry>,
        Arc::new(RecordingDelivery::default()) as Arc<dyn MessageDelivery>,
        Arc::new(FakeAgreementStore::default()) as Arc<dyn AgreementStore>,
        Arc::new(SystemClock),
    );
    assert!(result.is_err());
}
