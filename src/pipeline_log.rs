//! Structured JSONL logger for pipeline events.
//!
//! Machine-parseable log with monotonic sequence numbers, ISO 8601
//! timestamps with microsecond precision, and structured event data. Used
//! to reconstruct what the scheduler, signal processor, and agreement
//! manager did on each tick.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::domain::{AgreementId, CampaignId, EntityId, EntityStatus};

/// Structured JSONL logger shared by all pipeline workers.
pub struct PipelineLogger {
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across the process lifetime)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    /// Component that emitted the log
    pub component: String,
    /// Structured event data
    pub event: Value,
}

impl PipelineLogger {
    /// Creates a logger writing to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created or the log
    /// file cannot be opened.
    pub fn new(logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event as a single JSON line. Thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs a dispatched outreach message.
    pub fn log_dispatch(
        &self,
        entity: EntityId,
        campaign: CampaignId,
        template: &str,
        attempt: u32,
    ) {
        self.log(
            "Scheduler",
            serde_json::json!({
                "type": "Dispatch",
                "entity": entity,
                "campaign": campaign,
                "template": template,
                "attempt": attempt,
            }),
        );
    }

    /// Logs a status transition.
    pub fn log_transition(&self, entity: EntityId, from: EntityStatus, to: EntityStatus) {
        self.log(
            "StateMachine",
            serde_json::json!({
                "type": "Transition",
                "entity": entity,
                "from": from,
                "to": to,
            }),
        );
    }

    /// Logs a rejected transition attempt. State is unchanged.
    pub fn log_invalid_transition(&self, entity: EntityId, from: EntityStatus, to: EntityStatus) {
        self.log(
            "StateMachine",
            serde_json::json!({
                "type": "InvalidTransition",
                "entity": entity,
                "from": from,
                "to": to,
            }),
        );
    }

    /// Logs an inbound response signal.
    pub fn log_signal(&self, entity: EntityId, kind: &str, classification: Option<&str>) {
        self.log(
            "Signals",
            serde_json::json!({
                "type": "Signal",
                "entity": entity,
                "kind": kind,
                "classification": classification,
            }),
        );
    }

    /// Logs an agreement lifecycle event.
    pub fn log_agreement(&self, agreement: AgreementId, entity: EntityId, status: &str) {
        self.log(
            "Agreements",
            serde_json::json!({
                "type": "Agreement",
                "agreement": agreement,
                "entity": entity,
                "status": status,
            }),
        );
    }

    /// Logs a scheduler tick summary.
    pub fn log_tick_summary(&self, event: impl Serialize) {
        self.log("Scheduler", event);
    }

    /// Logs a per-entity delivery failure.
    pub fn log_delivery_failure(&self, entity: EntityId, attempt: u32, error: &str) {
        self.log(
            "Scheduler",
            serde_json::json!({
                "type": "DeliveryFailure",
                "entity": entity,
                "attempt": attempt,
                "error": error,
            }),
        );
    }

    /// Logs an optimistic-concurrency conflict.
    pub fn log_conflict(&self, entity: EntityId, detail: &str) {
        self.log(
            "Registry",
            serde_json::json!({
                "type": "Conflict",
                "entity": entity,
                "detail": detail,
            }),
        );
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityStatus;
    use tempfile::TempDir;

    #[test]
    fn entries_are_sequenced_and_parseable() {
        let temp = TempDir::new().expect("temp dir");
        let logger = PipelineLogger::new(temp.path()).expect("logger");

        let entity = EntityId::new();
        logger.log_transition(entity, EntityStatus::New, EntityStatus::Contacted);
        logger.log_signal(entity, "responded", Some("interested"));
        logger.log_delivery_failure(entity, 2, "provider 503");

        let contents = std::fs::read_to_string(logger.path()).expect("read log");
        let entries: Vec<LogEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("parseable entry"))
            .collect();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert_eq!(entries[2].seq, 3);
        assert_eq!(entries[0].component, "StateMachine");
        assert_eq!(entries[1].event["classification"], "interested");
    }

    #[test]
    fn logger_appends_across_instances() {
        let temp = TempDir::new().expect("temp dir");
        {
            let logger = PipelineLogger::new(temp.path()).expect("logger");
            logger.log("Runtime", serde_json::json!({"type": "Start"}));
        }
        let logger = PipelineLogger::new(temp.path()).expect("logger");
        logger.log("Runtime", serde_json::json!({"type": "Start"}));

        let contents = std::fs::read_to_string(logger.path()).expect("read log");
        assert_eq!(contents.lines().count(), 2);
    }
}
