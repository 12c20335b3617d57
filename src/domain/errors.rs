//! Error types for the acquisition pipeline domain.

use std::fmt::{Display, Formatter};

/// Errors that can occur while driving entities through the pipeline.
///
/// Per-entity errors are isolated by callers: one entity's failure never
/// aborts a batch. Only infrastructure failures abort a whole tick, and
/// those travel as `anyhow::Error` at the orchestration seams.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Malformed or incomplete entity/campaign data, rejected at the
    /// registry boundary.
    Validation { message: String },
    /// Optimistic-lock mismatch on a status update; re-read and retry.
    Conflict { message: String },
    /// External send or signature-check failure; retried with bounded
    /// backoff before the entity moves to a terminal failure status.
    TransientDelivery { message: String },
    /// Attempted state change outside the transition table.
    InvalidTransition { from: String, to: String },
    /// Precondition failure on agreement drafting.
    Ineligible { message: String },
    /// Unknown entity or agreement id.
    NotFound { id: String },
}

impl PipelineError {
    /// Convenience constructor for transition rejections.
    pub fn invalid_transition(from: impl Display, to: impl Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns true if the caller may retry after re-reading state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Conflict { .. } | PipelineError::TransientDelivery { .. }
        )
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { message } => write!(f, "validation failed: {}", message),
            Self::Conflict { message } => write!(f, "status conflict: {}", message),
            Self::TransientDelivery { message } => {
                write!(f, "transient delivery failure: {}", message)
            }
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {} -> {}", from, to)
            }
            Self::Ineligible { message } => write!(f, "entity not eligible: {}", message),
            Self::NotFound { id } => write!(f, "not found: {}", id),
        }
    }
}

impl std::error::Error for PipelineError {}
