//! Metrics aggregator: append-only counters with derived rollups.
//!
//! Counters are bucketed per UTC day and summed into daily/weekly/monthly
//! views on read. Derived values (pipeline value, conversion rate) are
//! computed on read, never stored. Revenue is recorded at most once per
//! agreement id.

use crate::domain::{AgreementId, CampaignId, Entity, TimestampUtc};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

/// One pipeline event worth counting.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    MessageSent { campaign: CampaignId },
    MessageOpened { campaign: CampaignId },
    ReplyReceived { campaign: Option<CampaignId> },
    EntityContacted,
    EntityConverted { campaign: Option<CampaignId> },
    DeliveryFailed,
    AgreementDrafted,
    AgreementSent,
    AgreementSigned { agreement: AgreementId, value: f64 },
    AgreementExpired,
}

/// Raw counters for one UTC day (and for the running totals).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Counters {
    pub sent: u64,
    pub opened: u64,
    pub replied: u64,
    pub contacted: u64,
    pub converted: u64,
    pub failed_deliveries: u64,
    pub agreements_drafted: u64,
    pub agreements_sent: u64,
    pub agreements_signed: u64,
    pub agreements_expired: u64,
    pub revenue: f64,
}

impl Counters {
    fn add(&mut self, other: &Counters) {
        self.sent += other.sent;
        self.opened += other.opened;
        self.replied += other.replied;
        self.contacted += other.contacted;
        self.converted += other.converted;
        self.failed_deliveries += other.failed_deliveries;
        self.agreements_drafted += other.agreements_drafted;
        self.agreements_sent += other.agreements_sent;
        self.agreements_signed += other.agreements_signed;
        self.agreements_expired += other.agreements_expired;
        self.revenue += other.revenue;
    }
}

/// Per-campaign tracking counters. Atomic increments, no cross-entity
/// ordering guarantees.
#[derive(Debug, Default)]
struct CampaignStats {
    sent: AtomicU64,
    opened: AtomicU64,
    replied: AtomicU64,
    converted: AtomicU64,
}

/// Read-side snapshot of a campaign's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub sent: u64,
    pub opened: u64,
    pub replied: u64,
    pub converted: u64,
}

/// Rollup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollupPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl RollupPeriod {
    fn days(&self) -> u64 {
        match self {
            RollupPeriod::Daily => 1,
            RollupPeriod::Weekly => 7,
            RollupPeriod::Monthly => 30,
        }
    }
}

/// Derived aggregates for a window, computed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRollup {
    pub period: RollupPeriod,
    pub window: Counters,
    /// closed / contacted over the whole pipeline history.
    pub conversion_rate: f64,
    /// Probability-weighted revenue across active entities.
    pub pipeline_value: f64,
}

/// Probability-weighted sum of revenue across active (non-terminal)
/// entities. Pure.
pub fn pipeline_value(entities: &[Entity]) -> f64 {
    entities
        .iter()
        .filter(|e| e.status.is_active())
        .map(|e| e.profile.estimated_revenue * e.conversion_probability.value())
        .sum()
}

/// Shared, append-only metrics store.
pub struct MetricsAggregator {
    days: Mutex<BTreeMap<NaiveDate, Counters>>,
    totals: Mutex<Counters>,
    campaigns: RwLock<HashMap<CampaignId, CampaignStats>>,
    recorded_agreements: Mutex<HashSet<AgreementId>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            days: Mutex::new(BTreeMap::new()),
            totals: Mutex::new(Counters::default()),
            campaigns: RwLock::new(HashMap::new()),
            recorded_agreements: Mutex::new(HashSet::new()),
        }
    }

    /// Records one event into the day bucket for `now`.
    ///
    /// `AgreementSigned` is idempotent per agreement id: re-delivering the
    /// same signature signal never double-counts revenue.
    pub fn record(&self, event: MetricEvent, now: TimestampUtc) {
        let mut delta = Counters::default();
        match &event {
            MetricEvent::MessageSent { campaign } => {
                delta.sent = 1;
                self.campaign_stats(*campaign, |s| s.sent.fetch_add(1, Ordering::Relaxed));
            }
            MetricEvent::MessageOpened { campaign } => {
                delta.opened = 1;
                self.campaign_stats(*campaign, |s| s.opened.fetch_add(1, Ordering::Relaxed));
            }
            MetricEvent::ReplyReceived { campaign } => {
                delta.replied = 1;
                if let Some(campaign) = campaign {
                    self.campaign_stats(*campaign, |s| s.replied.fetch_add(1, Ordering::Relaxed));
                }
            }
            MetricEvent::EntityContacted => delta.contacted = 1,
            MetricEvent::EntityConverted { campaign } => {
                delta.converted = 1;
                if let Some(campaign) = campaign {
                    self.campaign_stats(*campaign, |s| s.converted.fetch_add(1, Ordering::Relaxed));
                }
            }
            MetricEvent::DeliveryFailed => delta.failed_deliveries = 1,
            MetricEvent::AgreementDrafted => delta.agreements_drafted = 1,
            MetricEvent::AgreementSent => delta.agreements_sent = 1,
            MetricEvent::AgreementSigned { agreement, value } => {
                let mut recorded = self
                    .recorded_agreements
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if !recorded.insert(*agreement) {
                    return;
                }
                delta.agreements_signed = 1;
                delta.revenue = *value;
            }
            MetricEvent::AgreementExpired => delta.agreements_expired = 1,
        }

        let day = now.0.date_naive();
        {
            let mut days = self.days.lock().unwrap_or_else(|e| e.into_inner());
            days.entry(day).or_default().add(&delta);
        }
        let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.add(&delta);
    }

    fn campaign_stats<R>(&self, campaign: CampaignId, f: impl FnOnce(&CampaignStats) -> R) -> R {
        {
            let campaigns = self.campaigns.read().unwrap_or_else(|e| e.into_inner());
            if let Some(stats) = campaigns.get(&campaign) {
                return f(stats);
            }
        }
        let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
        f(campaigns.entry(campaign).or_default())
    }

    /// Snapshot of one campaign's counters.
    pub fn campaign_metrics(&self, campaign: CampaignId) -> CampaignMetrics {
        let campaigns = self.campaigns.read().unwrap_or_else(|e| e.into_inner());
        match campaigns.get(&campaign) {
            Some(stats) => CampaignMetrics {
                sent: stats.sent.load(Ordering::Relaxed),
                opened: stats.opened.load(Ordering::Relaxed),
                replied: stats.replied.load(Ordering::Relaxed),
                converted: stats.converted.load(Ordering::Relaxed),
            },
            None => CampaignMetrics::default(),
        }
    }

    /// Sums the window ending at `now` and derives rates on read.
    ///
    /// `active_entities` is the caller's registry snapshot; pipeline value
    /// is derived from it rather than stored.
    pub fn rollup(
        &self,
        period: RollupPeriod,
        now: TimestampUtc,
        active_entities: &[Entity],
    ) -> MetricsRollup {
        let end = now.0.date_naive();
        let start = end - chrono::Duration::days(period.days() as i64 - 1);

        let mut window = Counters::default();
        {
            let days = self.days.lock().unwrap_or_else(|e| e.into_inner());
            for (_, counters) in days.range(start..=end) {
                window.add(counters);
            }
        }

        let totals = *self.totals.lock().unwrap_or_else(|e| e.into_inner());
        let conversion_rate = if totals.contacted == 0 {
            0.0
        } else {
            totals.converted as f64 / totals.contacted as f64
        };

        MetricsRollup {
            period,
            window,
            conversion_rate,
            pipeline_value: pipeline_value(active_entities),
        }
    }

    /// Running totals since process start.
    pub fn totals(&self) -> Counters {
        *self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
