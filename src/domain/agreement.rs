//! Agreement (contract/partnership) records and their lifecycle.

use crate::domain::errors::PipelineError;
use crate::domain::types::{AgreementId, AgreementStatus, EntityId, TimestampUtc};
use serde::{Deserialize, Serialize};

/// A volume threshold above which a percentage discount applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscountTier {
    pub monthly_volume_threshold: u32,
    pub discount_pct: f64,
}

/// Base rate plus threshold-based discounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateStructure {
    /// Base rate per shipment, in dollars.
    pub base_rate: f64,
    #[serde(default)]
    pub discount_tiers: Vec<DiscountTier>,
}

impl RateStructure {
    /// Effective per-shipment rate at the given monthly volume, applying the
    /// deepest tier whose threshold is met.
    pub fn effective_rate(&self, monthly_volume: u32) -> f64 {
        let discount = self
            .discount_tiers
            .iter()
            .filter(|tier| monthly_volume >= tier.monthly_volume_threshold)
            .map(|tier| tier.discount_pct)
            .fold(0.0, f64::max);
        self.base_rate * (1.0 - discount / 100.0)
    }
}

/// Commercial terms of an agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgreementTerms {
    pub duration_months: u32,
    pub monthly_volume: u32,
    pub rates: RateStructure,
    pub payment_terms_days: u32,
}

/// A contract/partnership record.
///
/// `annual_value` is fixed at draft time from the entity's revenue estimate
/// and never recomputed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agreement {
    pub id: AgreementId,
    pub entity_id: EntityId,
    pub terms: AgreementTerms,
    pub status: AgreementStatus,
    pub annual_value: f64,
    pub drafted_at: TimestampUtc,
    #[serde(default)]
    pub sent_at: Option<TimestampUtc>,
    #[serde(default)]
    pub resolved_at: Option<TimestampUtc>,
}

impl Agreement {
    /// Creates a draft agreement.
    pub fn draft(
        entity_id: EntityId,
        terms: AgreementTerms,
        annual_value: f64,
        now: TimestampUtc,
    ) -> Self {
        Self {
            id: AgreementId::new(),
            entity_id,
            terms,
            status: AgreementStatus::Draft,
            annual_value,
            drafted_at: now,
            sent_at: None,
            resolved_at: None,
        }
    }

    /// Applies a lifecycle transition, rejecting anything outside
    /// `draft -> sent -> {signed, rejected, expired}`.
    pub fn transition_to(
        &mut self,
        to: AgreementStatus,
        now: TimestampUtc,
    ) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(to) {
            return Err(PipelineError::invalid_transition(self.status, to));
        }
        self.status = to;
        match to {
            AgreementStatus::Sent => self.sent_at = Some(now),
            AgreementStatus::Signed | AgreementStatus::Rejected | AgreementStatus::Expired => {
                self.resolved_at = Some(now)
            }
            AgreementStatus::Draft => {}
        }
        Ok(())
    }
}
