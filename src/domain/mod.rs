//! Domain model for the acquisition pipeline.
//!
//! - **Types** (`types.rs`): identifiers, timestamps, status machines
//! - **Entity** (`entity.rs`): the addressable party and its pipeline state
//! - **Campaign** (`campaign.rs`): targeting criteria + message cadence
//! - **Agreement** (`agreement.rs`): contract terms and lifecycle
//! - **Scoring** (`scoring.rs`): pure priority scoring
//! - **Services** (`services.rs`): the injected clock seam
//! - **Errors** (`errors.rs`): the pipeline error taxonomy

pub mod agreement;
pub mod campaign;
pub mod entity;
pub mod errors;
pub mod scoring;
pub mod services;
pub mod types;

pub use agreement::{Agreement, AgreementTerms, DiscountTier, RateStructure};
pub use campaign::{
    AutomationRules, Campaign, FollowUpStep, FollowUpTrigger, MessageTemplate, RangeCriterion,
    TargetingCriteria,
};
pub use entity::{ContactInfo, Entity, EntityProfile};
pub use errors::PipelineError;
pub use scoring::{priority_score, PriorityScore, ScoreInput};
pub use services::{Clock, ManualClock, SystemClock};
pub use types::{
    AgreementId, AgreementStatus, CampaignId, EntityCategory, EntityId, EntityStatus,
    PriorityBucket, Probability, TemplateId, TimestampUtc,
};
