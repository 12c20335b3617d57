//! Collaborator seams for external services.
//!
//! The pipeline core never talks to a mail provider or document store
//! directly; it depends on these traits. Failures and timeouts from any
//! implementation are mapped to `PipelineError::TransientDelivery` at the
//! call site.

use crate::domain::{Agreement, AgreementId, TemplateId, TimestampUtc};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A fully personalized message ready for handoff to the delivery provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub template_id: TemplateId,
    pub subject: String,
    pub body: String,
}

/// Provider acknowledgement for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
    pub accepted_at: TimestampUtc,
}

/// External message-delivery service.
#[async_trait]
pub trait MessageDelivery: Send + Sync {
    /// Submits one rendered message to one recipient.
    async fn send(&self, recipient: &str, message: &RenderedMessage)
        -> anyhow::Result<DeliveryReceipt>;
}

/// Signature state reported by the agreement store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Pending,
    Signed,
    Declined,
}

/// Durable storage for agreement documents and their signature status.
#[async_trait]
pub trait AgreementStore: Send + Sync {
    /// Persists (or re-persists) an agreement document.
    async fn store(&self, agreement: &Agreement) -> anyhow::Result<()>;

    /// Polls the signature status of a previously stored agreement.
    async fn signature_status(&self, id: AgreementId) -> anyhow::Result<SignatureStatus>;
}
