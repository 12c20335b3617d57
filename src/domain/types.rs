//! Strongly typed domain primitives for the acquisition pipeline.
//!
//! These newtypes provide type safety and semantic clarity for entity,
//! campaign, and agreement identifiers, timestamps, and probabilities.
//! They are used throughout the domain model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an addressable entity (lead, carrier, partner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Creates a new random entity ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity ID from a string.
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an outreach campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub Uuid);

impl CampaignId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an agreement document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgreementId(pub Uuid);

impl AgreementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgreementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgreementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a message template within a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

impl TemplateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TemplateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TemplateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UTC timestamp used for all scheduling and lifecycle bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the timestamp as an RFC3339 string.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Returns this timestamp shifted forward by the given duration.
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }
}

impl Default for TimestampUtc {
    fn default() -> Self {
        Self::now()
    }
}

impl std::fmt::Display for TimestampUtc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

/// Conversion probability, clamped to the [0, 1] range on construction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Probability(f64);

impl Probability {
    /// Creates a probability, clamping the input into [0, 1].
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Returns a probability raised by `step`, clamped to 1.0.
    pub fn raised_by(&self, step: f64) -> Self {
        Self::new(self.0 + step)
    }

    pub fn zero() -> Self {
        Self(0.0)
    }
}

impl Default for Probability {
    fn default() -> Self {
        Self(0.0)
    }
}

/// Category of an addressable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Lead,
    Carrier,
    Partner,
}

impl EntityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Lead => "lead",
            EntityCategory::Carrier => "carrier",
            EntityCategory::Partner => "partner",
        }
    }
}

impl std::fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline status of an entity.
///
/// The transition table is the single source of truth for which status
/// changes are legal; every mutation path checks it via
/// [`EntityStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    New,
    Contacted,
    Interested,
    Negotiating,
    Closed,
    Rejected,
    Stale,
    FailedDelivery,
}

impl EntityStatus {
    /// Returns true if no further transitions are allowed from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityStatus::Closed
                | EntityStatus::Rejected
                | EntityStatus::Stale
                | EntityStatus::FailedDelivery
        )
    }

    /// Returns true when the entity still counts toward pipeline value.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks the transition table.
    ///
    /// `new -> contacted`; `contacted -> {interested, rejected}`;
    /// `interested -> negotiating`; `negotiating -> {closed, rejected}`.
    /// Any non-terminal status may move to `stale` (follow-up exhaustion)
    /// or `failed_delivery` (delivery-retry exhaustion).
    pub fn can_transition_to(&self, to: EntityStatus) -> bool {
        use EntityStatus::*;

        if self.is_terminal() {
            return false;
        }
        match to {
            Stale | FailedDelivery => true,
            Contacted => *self == New,
            Interested => *self == Contacted,
            Negotiating => *self == Interested,
            Closed => *self == Negotiating,
            Rejected => *self == Contacted || *self == Negotiating,
            New => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::New => "new",
            EntityStatus::Contacted => "contacted",
            EntityStatus::Interested => "interested",
            EntityStatus::Negotiating => "negotiating",
            EntityStatus::Closed => "closed",
            EntityStatus::Rejected => "rejected",
            EntityStatus::Stale => "stale",
            EntityStatus::FailedDelivery => "failed_delivery",
        }
    }

    /// All statuses, in pipeline order. Used by tests and dashboard queries.
    pub fn all() -> &'static [EntityStatus] {
        use EntityStatus::*;
        &[
            New,
            Contacted,
            Interested,
            Negotiating,
            Closed,
            Rejected,
            Stale,
            FailedDelivery,
        ]
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority bucket derived from the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    High,
    Medium,
    Low,
}

impl PriorityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityBucket::High => "high",
            PriorityBucket::Medium => "medium",
            PriorityBucket::Low => "low",
        }
    }
}

impl std::fmt::Display for PriorityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agreement lifecycle status: `draft -> sent -> {signed, rejected, expired}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    #[default]
    Draft,
    Sent,
    Signed,
    Rejected,
    Expired,
}

impl AgreementStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgreementStatus::Signed | AgreementStatus::Rejected | AgreementStatus::Expired
        )
    }

    pub fn can_transition_to(&self, to: AgreementStatus) -> bool {
        use AgreementStatus::*;
        matches!(
            (self, to),
            (Draft, Sent) | (Sent, Signed) | (Sent, Rejected) | (Sent, Expired)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgreementStatus::Draft => "draft",
            AgreementStatus::Sent => "sent",
            AgreementStatus::Signed => "signed",
            AgreementStatus::Rejected => "rejected",
            AgreementStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for AgreementStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
