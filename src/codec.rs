//! Status record codec.
//!
//! Learners append status records to the coordination store either as a bare
//! status token (`"COMPLETED"`) or as a JSON wrapper carrying the timestamp
//! and error details. Both forms decode into a [`StatusUpdate`]; anything
//! else is a [`CodecError`], never a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::TrainingStatus;

/// Error code reported when the compute cluster client cannot be established.
pub const ERR_CLUSTER_CONNECTION: &str = "CLUSTER_CONNECTION_FAILED";
/// Error code reported when the coordination store client cannot be established.
pub const ERR_STORE_CONNECTION: &str = "COORDINATION_CONNECTION_FAILED";
/// Error code reported when the job's image cannot be pulled.
pub const ERR_IMAGE_PULL: &str = "IMAGE_PULL_FAILED";
/// Error code reported when the cluster cannot schedule the job.
pub const ERR_INSUFFICIENT_RESOURCES: &str = "INSUFFICIENT_RESOURCES";
/// Error code reported when the job never left NOT_STARTED.
pub const ERR_JOB_NOT_STARTED: &str = "JOB_NOT_STARTED";

/// Status message attached to monitor-originated failures.
pub const MSG_INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty status record")]
    Empty,

    #[error("unrecognized status record {record:?}: {reason}")]
    Malformed { record: String, reason: String },
}

/// One decoded status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TrainingStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: TrainingStatus) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            status_message: None,
            error_code: None,
        }
    }

    pub fn with_error(
        status: TrainingStatus,
        error_code: impl Into<String>,
        status_message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            status_message: Some(status_message.into()),
            error_code: Some(error_code.into()),
        }
    }

    /// Encodes the update into its store representation.
    pub fn to_store_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.status.to_string())
    }
}

/// Decodes a raw status record from the store.
pub fn decode_status(raw: &str) -> Result<StatusUpdate, CodecError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }

    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|err| CodecError::Malformed {
            record: trimmed.to_string(),
            reason: err.to_string(),
        });
    }

    let status = trimmed
        .parse::<TrainingStatus>()
        .map_err(|reason| CodecError::Malformed {
            record: trimmed.to_string(),
            reason,
        })?;
    Ok(StatusUpdate::new(status))
}
