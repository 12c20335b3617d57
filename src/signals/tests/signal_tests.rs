use super::*;
use crate::domain::{
    AutomationRules, ContactInfo, EntityCategory, EntityProfile, ManualClock, MessageTemplate,
    TargetingCriteria,
};
use crate::registry::InMemoryRegistry;
use crate::metrics::RollupPeriod;
use tempfile::TempDir;

fn entity_with(status: EntityStatus, probability: f64) -> Entity {
    let mut entity = Entity::new(
        EntityCategory::Lead,
        EntityProfile {
            contact: ContactInfo {
                name: "Riley Okafor".to_string(),
                company: "Okafor Retail Group".to_string(),
                email: "riley@okaforretail.example".to_string(),
                phone: None,
            },
            estimated_revenue: 1_200_000.0,
            fleet_size: 0,
            monthly_volume: 300,
            industry: "Retail".to_string(),
            region: "Southeast".to_string(),
            capabilities: vec![],
            rating: 4.5,
        },
        TimestampUtc::now(),
    );
    entity.status = status;
    entity.conversion_probability = Probability::new(probability);
    entity.messages_sent = 2;
    entity
}

fn campaign_with_threshold(threshold: Option<f64>) -> Campaign {
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
            subject: "Hello".to_string(),
            body: "Hi {{name}}".to_string(),
        },
        follow_ups: vec![],
        rules: AutomationRules {
            escalation_threshold: threshold,
            ..AutomationRules::default()
        },
        created_at: TimestampUtc::now(),
    }
}

struct Fixture {
    registry: Arc<InMemoryRegistry>,
    metrics: Arc<MetricsAggregator>,
    processor: SignalProcessor,
    draft_rx: mpsc::Receiver<EntityId>,
    _logs: TempDir,
}

fn fixture(campaigns: &[Campaign]) -> Fixture {
    let logs = TempDir::new().expect("temp logs dir");
    let registry = Arc::new(InMemoryRegistry::new());
    let metrics = Arc::new(MetricsAggregator::new());
    let clock = Arc::new(ManualClock::starting_at(TimestampUtc::now()));
    let (draft_tx, draft_rx) = mpsc::channel(8);
    let processor = SignalProcessor::new(
        Arc::clone(&registry) as Arc<dyn EntityRegistry>,
        Arc::clone(&metrics),
        Arc::new(PipelineLogger::new(logs.path()).expect("logger")),
        clock,
        SignalConfig::default(),
        0.7,
        crate::domain::scoring::default_priority_industries(),
        campaigns,
        draft_tx,
    );
    Fixture {
        registry,
        metrics,
        processor,
        draft_rx,
        _logs: logs,
    }
}

fn responded(entity_id: EntityId, classification: ResponseClassification) -> ResponseSignal {
    ResponseSignal {
        entity_id,
        kind: SignalKind::Responded { classification },
    }
}

#[tokio::test]
async fn interested_reply_advances_contacted_to_interested() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Contacted, 0.2);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let outcome = fx
        .processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SignalOutcome::Applied {
            from: EntityStatus::Contacted,
            to: EntityStatus::Interested,
        }
    );

    let updated = fx.registry.get(id).await.unwrap();
    assert_eq!(updated.status, EntityStatus::Interested);
    assert_eq!(updated.response_count, 1);
    assert!((updated.conversion_probability.value() - 0.35).abs() < 1e-9);
    assert_eq!(fx.metrics.totals().replied, 1);
}

#[tokio::test]
async fn detail_request_raises_probability_by_smaller_step() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Contacted, 0.2);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    fx.processor
        .apply(responded(id, ResponseClassification::RequestedDetail))
        .await
        .unwrap();

    let updated = fx.registry.get(id).await.unwrap();
    assert_eq!(updated.status, EntityStatus::Interested);
    assert!((updated.conversion_probability.value() - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn not_interested_rejects_and_zeroes_probability() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Contacted, 0.4);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let outcome = fx
        .processor
        .apply(responded(id, ResponseClassification::NotInterested))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SignalOutcome::Applied {
            from: EntityStatus::Contacted,
            to: EntityStatus::Rejected,
        }
    );

    let updated = fx.registry.get(id).await.unwrap();
    assert_eq!(updated.status, EntityStatus::Rejected);
    assert_eq!(updated.conversion_probability.value(), 0.0);
    assert_eq!(updated.next_follow_up, None);
}

#[tokio::test]
async fn interested_opt_out_goes_stale() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Interested, 0.5);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let outcome = fx
        .processor
        .apply(responded(id, ResponseClassification::NotInterested))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SignalOutcome::Applied {
            from: EntityStatus::Interested,
            to: EntityStatus::Stale,
        }
    );
}

#[tokio::test]
async fn timeout_signal_marks_stale_and_clears_schedule() {
    let fx = fixture(&[]);
    let mut entity = entity_with(EntityStatus::Contacted, 0.3);
    let now = TimestampUtc::now();
    entity.last_contact = Some(now);
    entity.next_follow_up = Some(now.plus(chrono::Duration::hours(72)));
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let outcome = fx
        .processor
        .apply(ResponseSignal {
            entity_id: id,
            kind: SignalKind::TimedOut,
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SignalOutcome::Applied {
            from: EntityStatus::Contacted,
            to: EntityStatus::Stale,
        }
    );

    let updated = fx.registry.get(id).await.unwrap();
    assert_eq!(updated.next_follow_up, None);
    // A timeout is not a response.
    assert_eq!(updated.response_count, 0);
    assert_eq!(fx.metrics.totals().replied, 0);
}

#[tokio::test]
async fn terminal_entity_ignores_further_signals() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Rejected, 0.0);
    let id = entity.id;
    fx.registry.upsert(entity.clone()).await.unwrap();

    let outcome = fx
        .processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::AlreadyTerminal);
    assert_eq!(fx.registry.get(id).await.unwrap(), entity, "state untouched");
}

#[tokio::test]
async fn unknown_entity_is_not_found() {
    let fx = fixture(&[]);
    let err = fx
        .processor
        .apply(responded(EntityId::new(), ResponseClassification::Interested))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}

#[tokio::test]
async fn signal_on_new_entity_is_recorded_without_transition() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::New, 0.0);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let outcome = fx
        .processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Recorded);
    assert_eq!(fx.registry.get(id).await.unwrap().status, EntityStatus::New);
    assert_eq!(fx.registry.get(id).await.unwrap().response_count, 1);
}

#[tokio::test]
async fn held_lock_surfaces_conflict_after_retries() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Contacted, 0.2);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let _lease = fx.registry.try_lock(id).expect("lock");
    let err = fx
        .processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Conflict { .. }));
    assert_eq!(
        fx.registry.get(id).await.unwrap().status,
        EntityStatus::Contacted
    );
}

#[tokio::test]
async fn manual_override_rejects_off_table_transition() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Contacted, 0.2);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    let err = fx
        .processor
        .apply(ResponseSignal {
            entity_id: id,
            kind: SignalKind::ManualOverride {
                target: EntityStatus::Closed,
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(
        fx.registry.get(id).await.unwrap().status,
        EntityStatus::Contacted
    );
}

#[tokio::test]
async fn manual_close_counts_a_conversion() {
    let fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Negotiating, 0.8);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    fx.processor
        .apply(ResponseSignal {
            entity_id: id,
            kind: SignalKind::ManualOverride {
                target: EntityStatus::Closed,
            },
        })
        .await
        .unwrap();

    assert_eq!(
        fx.registry.get(id).await.unwrap().status,
        EntityStatus::Closed
    );
    let rollup = fx
        .metrics
        .rollup(RollupPeriod::Daily, TimestampUtc::now(), &[]);
    assert_eq!(rollup.window.converted, 1);
}

#[tokio::test]
async fn negotiating_above_threshold_enqueues_agreement_draft() {
    let mut fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Interested, 0.6);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    // 0.6 + 0.15 = 0.75 > 0.7: the entity qualifies for drafting.
    let outcome = fx
        .processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SignalOutcome::Applied {
            from: EntityStatus::Interested,
            to: EntityStatus::Negotiating,
        }
    );

    assert_eq!(fx.draft_rx.try_recv().ok(), Some(id));
    let updated = fx.registry.get(id).await.unwrap();
    assert_eq!(updated.next_follow_up, None, "outreach stops in negotiation");
}

#[tokio::test]
async fn below_threshold_negotiation_is_not_enqueued() {
    let mut fx = fixture(&[]);
    let entity = entity_with(EntityStatus::Interested, 0.3);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    fx.processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();

    assert_eq!(
        fx.registry.get(id).await.unwrap().status,
        EntityStatus::Negotiating
    );
    assert!(fx.draft_rx.try_recv().is_err());
}

#[tokio::test]
async fn campaign_escalation_threshold_overrides_global() {
    let campaign = campaign_with_threshold(Some(0.9));
    let mut fx = fixture(&[campaign.clone()]);
    let mut entity = entity_with(EntityStatus::Interested, 0.6);
    entity.campaign = Some(campaign.id);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    // 0.75 clears the global 0.7 but not the campaign's 0.9.
    fx.processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();

    assert_eq!(
        fx.registry.get(id).await.unwrap().status,
        EntityStatus::Negotiating
    );
    assert!(fx.draft_rx.try_recv().is_err());
}

#[tokio::test]
async fn open_ping_counts_toward_campaign_metrics() {
    let campaign = campaign_with_threshold(None);
    let fx = fixture(&[campaign.clone()]);
    let mut entity = entity_with(EntityStatus::Contacted, 0.2);
    entity.campaign = Some(campaign.id);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    fx.processor.note_opened(id).await.unwrap();

    assert_eq!(fx.metrics.campaign_metrics(campaign.id).opened, 1);
    assert_eq!(fx.metrics.totals().opened, 1);
    // An open is not a reply and moves no state.
    assert_eq!(fx.metrics.totals().replied, 0);
    assert_eq!(
        fx.registry.get(id).await.unwrap().status,
        EntityStatus::Contacted
    );
}

#[tokio::test]
async fn replies_rescore_priority() {
    let fx = fixture(&[]);
    // Revenue 1.2M (40) + Retail (20) + no responses yet.
    let entity = entity_with(EntityStatus::Contacted, 0.0);
    let id = entity.id;
    fx.registry.upsert(entity).await.unwrap();

    fx.processor
        .apply(responded(id, ResponseClassification::Interested))
        .await
        .unwrap();

    let updated = fx.registry.get(id).await.unwrap();
    // 40 (revenue) + 20 (Retail) + 10 (1/2 response rate) + 5 (0.15 x 30, rounded)
    assert_eq!(updated.priority.score, 75);
}
