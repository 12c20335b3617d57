//! Campaign configuration: targeting criteria, template set, automation rules.

use crate::domain::errors::PipelineError;
use crate::domain::types::{CampaignId, EntityCategory, TemplateId, TimestampUtc};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// An inclusive numeric range; unbounded ends are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RangeCriterion {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl RangeCriterion {
    pub fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// Range containment, inclusive on both ends.
    pub fn contains(&self, value: f64) -> bool {
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }
}

/// Criteria a campaign uses to select eligible entities.
///
/// All present criteria must match (intersection semantics). Empty set
/// filters are unconstrained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingCriteria {
    pub category: EntityCategory,
    #[serde(default)]
    pub revenue: Option<RangeCriterion>,
    #[serde(default)]
    pub fleet_size: Option<RangeCriterion>,
    /// Entity region must be one of these. Empty = any region.
    #[serde(default)]
    pub regions: Vec<String>,
    /// Entity capabilities must intersect these. Empty = any capabilities.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub min_rating: Option<f64>,
}

/// A renderable outreach message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub subject: String,
    pub body: String,
}

/// Condition under which a follow-up step fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpTrigger {
    #[default]
    NoResponse,
    OpenedNoReply,
}

/// One step of the follow-up cadence.
///
/// `delay_hours` is measured from the initial contact, so the sequence must
/// be strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUpStep {
    pub template: MessageTemplate,
    pub delay_hours: u32,
    #[serde(default)]
    pub trigger: FollowUpTrigger,
}

/// Automation knobs for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRules {
    #[serde(default = "default_max_follow_ups")]
    pub max_follow_ups: u32,
    /// Hours to keep waiting for a reply after the final message before
    /// the entity goes stale.
    #[serde(default = "default_follow_up_interval_hours")]
    pub follow_up_interval_hours: u32,
    /// Per-campaign override of the negotiation probability threshold.
    #[serde(default)]
    pub escalation_threshold: Option<f64>,
}

fn default_max_follow_ups() -> u32 {
    2
}

fn default_follow_up_interval_hours() -> u32 {
    96
}

impl Default for AutomationRules {
    fn default() -> Self {
        Self {
            max_follow_ups: default_max_follow_ups(),
            follow_up_interval_hours: default_follow_up_interval_hours(),
            escalation_threshold: None,
        }
    }
}

/// A targeting + messaging configuration driving outreach to a set of
/// entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub criteria: TargetingCriteria,
    pub initial: MessageTemplate,
    #[serde(default)]
    pub follow_ups: Vec<FollowUpStep>,
    #[serde(default)]
    pub rules: AutomationRules,
    pub created_at: TimestampUtc,
}

impl Campaign {
    /// Validates the campaign configuration.
    ///
    /// The follow-up sequence must be monotonically ordered by delay.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Validation {
                message: "campaign name is empty".to_string(),
            });
        }
        let mut previous = 0u32;
        for (index, step) in self.follow_ups.iter().enumerate() {
            if step.delay_hours <= previous {
                return Err(PipelineError::Validation {
                    message: format!(
                        "campaign '{}': follow-up #{} delay {}h is not after previous {}h",
                        self.name,
                        index + 1,
                        step.delay_hours,
                        previous
                    ),
                });
            }
            previous = step.delay_hours;
        }
        if let Some(threshold) = self.rules.escalation_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(PipelineError::Validation {
                    message: format!(
                        "campaign '{}': escalation threshold {} outside [0, 1]",
                        self.name, threshold
                    ),
                });
            }
        }
        Ok(())
    }

    /// The template for the given message index (0 = initial contact).
    pub fn template_for(&self, message_index: u32) -> Option<&MessageTemplate> {
        if message_index == 0 {
            Some(&self.initial)
        } else {
            self.follow_ups
                .get(message_index as usize - 1)
                .map(|step| &step.template)
        }
    }

    /// Gap to wait after sending message `message_index` before the next one,
    /// or `None` when the cadence is exhausted.
    ///
    /// Step delays are offsets from the initial contact, so the gap is the
    /// difference between consecutive offsets; validation guarantees the
    /// offsets are strictly increasing.
    pub fn gap_after(&self, message_index: u32) -> Option<Duration> {
        let effective_max = self.rules.max_follow_ups.min(self.follow_ups.len() as u32);
        if message_index >= effective_max {
            return None;
        }
        let next = self.follow_ups.get(message_index as usize)?;
        let previous_offset = if message_index == 0 {
            0
        } else {
            self.follow_ups[message_index as usize - 1].delay_hours
        };
        Some(Duration::hours(i64::from(
            next.delay_hours.saturating_sub(previous_offset),
        )))
    }
}
