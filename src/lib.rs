//! Autonomous acquisition pipeline.
//!
//! Discovers, scores, contacts, and converts entities (leads, carriers,
//! partners) through a campaign-driven outreach loop:
//!
//! - [`registry`]: the entity pool, with per-entity locks and
//!   compare-and-set status updates
//! - [`targeting`]: pure campaign-criteria matching
//! - [`scheduler`]: periodic outreach ticks and follow-up sweeps
//! - [`signals`]: the response state machine
//! - [`agreements`]: contract drafting, sending, and review
//! - [`metrics`]: counters and derived rollups
//! - [`api`]: the dashboard query/command surface
//! - [`runtime`]: worker orchestration and shutdown
//!
//! External collaborators (mail provider, document store) sit behind the
//! traits in [`delivery`]; time sits behind [`domain::Clock`].

pub mod agreements;
pub mod api;
pub mod config;
pub mod delivery;
pub mod domain;
pub mod metrics;
pub mod pipeline_log;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod signals;
pub mod targeting;

pub use config::PipelineConfig;
pub use domain::PipelineError;
pub use runtime::PipelineRuntime;
