//! The addressable entity tracked through the pipeline.

use crate::domain::errors::PipelineError;
use crate::domain::scoring::{priority_score, PriorityScore, ScoreInput};
use crate::domain::types::{
    CampaignId, EntityCategory, EntityId, EntityStatus, Probability, TimestampUtc,
};
use serde::{Deserialize, Serialize};

/// Contact details for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub name: String,
    pub company: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Qualification attributes used by targeting and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProfile {
    pub contact: ContactInfo,
    /// Annualized revenue estimate in dollars.
    pub estimated_revenue: f64,
    /// Number of trucks (carriers) or shipments-capable vehicles.
    #[serde(default)]
    pub fleet_size: u32,
    /// Estimated shipment volume per month.
    #[serde(default)]
    pub monthly_volume: u32,
    pub industry: String,
    pub region: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Safety/quality rating on a 0-5 scale.
    #[serde(default)]
    pub rating: f64,
}

/// An addressable party (lead, carrier, or partner) with its pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub category: EntityCategory,
    pub profile: EntityProfile,

    // Pipeline state
    pub status: EntityStatus,
    #[serde(default)]
    pub priority: PriorityScore,
    #[serde(default)]
    pub response_count: u32,
    #[serde(default)]
    pub messages_sent: u32,
    #[serde(default)]
    pub conversion_probability: Probability,
    #[serde(default)]
    pub campaign: Option<CampaignId>,

    // Scheduling
    #[serde(default)]
    pub last_contact: Option<TimestampUtc>,
    #[serde(default)]
    pub next_follow_up: Option<TimestampUtc>,
    #[serde(default)]
    pub follow_ups_sent: u32,
    /// Consecutive failed delivery attempts for the current message.
    #[serde(default)]
    pub delivery_attempts: u32,

    pub created_at: TimestampUtc,
    pub updated_at: TimestampUtc,
}

impl Entity {
    /// Creates a fresh entity in `new` status.
    pub fn new(category: EntityCategory, profile: EntityProfile, now: TimestampUtc) -> Self {
        Self {
            id: EntityId::new(),
            category,
            profile,
            status: EntityStatus::New,
            priority: PriorityScore::default(),
            response_count: 0,
            messages_sent: 0,
            conversion_probability: Probability::default(),
            campaign: None,
            last_contact: None,
            next_follow_up: None,
            follow_ups_sent: 0,
            delivery_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates profile data at the registry boundary.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |message: &str| {
            Err(PipelineError::Validation {
                message: message.to_string(),
            })
        };

        if self.profile.contact.name.trim().is_empty() {
            return fail("contact name is empty");
        }
        if !self.profile.contact.email.contains('@') {
            return fail("contact email is malformed");
        }
        if self.profile.estimated_revenue < 0.0 || !self.profile.estimated_revenue.is_finite() {
            return fail("estimated revenue must be a non-negative number");
        }
        if !(0.0..=5.0).contains(&self.profile.rating) {
            return fail("rating must be within 0-5");
        }
        if let (Some(last), Some(next)) = (self.last_contact, self.next_follow_up) {
            if next <= last {
                return fail("next follow-up must be strictly after last contact");
            }
        }
        Ok(())
    }

    /// Fraction of sent messages that drew a response.
    pub fn response_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            f64::from(self.response_count) / f64::from(self.messages_sent)
        }
    }

    /// Recomputes the priority score from current profile and history.
    pub fn rescore(&mut self, priority_industries: &[String]) {
        let input = ScoreInput {
            estimated_revenue: self.profile.estimated_revenue,
            industry: &self.profile.industry,
            response_rate: self.response_rate(),
            conversion_probability: self.conversion_probability,
        };
        self.priority = priority_score(&input, priority_industries);
    }

    /// Records a successful dispatch: advances `last_contact` and schedules
    /// the next follow-up (or clears it when the cadence is exhausted).
    ///
    /// Enforces the invariant that `next_follow_up`, when set, is strictly
    /// after `last_contact`.
    pub fn record_dispatch(
        &mut self,
        now: TimestampUtc,
        next_follow_up: Option<TimestampUtc>,
    ) -> Result<(), PipelineError> {
        if let Some(next) = next_follow_up {
            if next <= now {
                return Err(PipelineError::Validation {
                    message: format!(
                        "next follow-up {} is not after contact time {}",
                        next, now
                    ),
                });
            }
        }
        self.last_contact = Some(now);
        self.next_follow_up = next_follow_up;
        self.messages_sent += 1;
        self.delivery_attempts = 0;
        self.updated_at = now;
        Ok(())
    }

    /// True once the entity has moved beyond `new`.
    pub fn is_engaged(&self) -> bool {
        self.status != EntityStatus::New
    }
}
