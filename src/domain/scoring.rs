//! Deterministic priority scoring.
//!
//! The score is a weighted sum of revenue tier, industry bonus, response
//! history, and conversion probability, bucketed into high/medium/low.
//! It is a pure function of its inputs so both the targeting engine and
//! the response state machine can recompute it without shared state.

use crate::domain::types::{PriorityBucket, Probability};
use serde::{Deserialize, Serialize};

const REVENUE_TIER_TOP: f64 = 1_000_000.0;
const REVENUE_TIER_MID: f64 = 500_000.0;
const REVENUE_TIER_LOW: f64 = 100_000.0;

const RESPONSE_WEIGHT: f64 = 20.0;
const PROBABILITY_WEIGHT: f64 = 30.0;

const HIGH_THRESHOLD: u32 = 80;
const MEDIUM_THRESHOLD: u32 = 50;

/// Industries given the full industry bonus when no override is configured.
pub const DEFAULT_PRIORITY_INDUSTRIES: &[&str] =
    &["Retail", "Manufacturing", "Wholesale", "Logistics"];

/// Inputs to the priority score, captured at scoring time.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreInput<'a> {
    pub estimated_revenue: f64,
    pub industry: &'a str,
    /// Fraction of outreach messages that drew a response, in [0, 1].
    pub response_rate: f64,
    pub conversion_probability: Probability,
}

/// A computed score with its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityScore {
    pub score: u32,
    pub bucket: PriorityBucket,
}

impl Default for PriorityScore {
    fn default() -> Self {
        Self {
            score: 0,
            bucket: PriorityBucket::Low,
        }
    }
}

/// Computes the weighted priority score.
///
/// Revenue tier: >=1M -> 40, >=500k -> 30, >=100k -> 20, else 10.
/// Industry: 20 for priority industries, 10 otherwise.
/// Response history: response rate x 20. Probability: probability x 30.
/// Buckets: >80 high, 50-80 medium, <50 low.
pub fn priority_score(input: &ScoreInput<'_>, priority_industries: &[String]) -> PriorityScore {
    let revenue_points = if input.estimated_revenue >= REVENUE_TIER_TOP {
        40
    } else if input.estimated_revenue >= REVENUE_TIER_MID {
        30
    } else if input.estimated_revenue >= REVENUE_TIER_LOW {
        20
    } else {
        10
    };

    let industry_points = if priority_industries
        .iter()
        .any(|p| p.eq_ignore_ascii_case(input.industry))
    {
        20
    } else {
        10
    };

    let response_points = (input.response_rate.clamp(0.0, 1.0) * RESPONSE_WEIGHT).round() as u32;
    let probability_points =
        (input.conversion_probability.value() * PROBABILITY_WEIGHT).round() as u32;

    let score = revenue_points + industry_points + response_points + probability_points;

    PriorityScore {
        score,
        bucket: bucket_for(score),
    }
}

/// Buckets a raw score.
pub fn bucket_for(score: u32) -> PriorityBucket {
    if score > HIGH_THRESHOLD {
        PriorityBucket::High
    } else if score >= MEDIUM_THRESHOLD {
        PriorityBucket::Medium
    } else {
        PriorityBucket::Low
    }
}

/// The default priority-industry list as owned strings, for configs.
pub fn default_priority_industries() -> Vec<String> {
    DEFAULT_PRIORITY_INDUSTRIES
        .iter()
        .map(|s| s.to_string())
        .collect()
}
