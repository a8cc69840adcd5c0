//! Trainer port and the retry-wrapped status reporter.
//!
//! The trainer service is the job-metadata store external observers read;
//! every accepted overall-status change is pushed to it. The connection is
//! short-lived: opened per report, dropped on every exit path.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::backoff::{retry_notify, RetryPolicy};
use crate::error::RemoteError;
use crate::metrics::MonitorMetrics;
use crate::status::TrainingStatus;

/// Status update pushed to the trainer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub training_id: String,
    pub user_id: String,
    pub status: TrainingStatus,
    pub timestamp: DateTime<Utc>,
    pub status_message: Option<String>,
    pub error_code: Option<String>,
}

#[async_trait]
pub trait TrainerConnection: Send + Sync {
    async fn update_training_job(&self, request: &UpdateStatusRequest) -> Result<(), RemoteError>;
}

/// Establishes a short-lived [`TrainerConnection`].
#[async_trait]
pub trait TrainerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TrainerConnection>, RemoteError>;
}

/// Retry-wrapped reporter pushing status updates to the trainer.
pub struct StatusReporter {
    connector: Arc<dyn TrainerConnector>,
    policy: RetryPolicy,
    metrics: Arc<MonitorMetrics>,
}

impl StatusReporter {
    pub fn new(connector: Arc<dyn TrainerConnector>, metrics: Arc<MonitorMetrics>) -> Self {
        Self {
            connector,
            policy: RetryPolicy::remote_call(),
            metrics,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Persists `update` with the trainer, retrying under the backoff
    /// policy. On exhaustion the failure is returned to the caller; the
    /// caller decides whether that is fatal.
    pub async fn report(&self, update: &UpdateStatusRequest) -> Result<(), RemoteError> {
        info!(
            training_id = %update.training_id,
            status = %update.status,
            "updating job status with the trainer"
        );

        let connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(err) => {
                self.metrics.record_trainer_connectivity_failure();
                error!(
                    training_id = %update.training_id,
                    error = %err,
                    "creating the trainer client for a status update failed"
                );
                return Err(err);
            }
        };

        let result = retry_notify(
            &self.policy,
            || {
                let connection = Arc::clone(&connection);
                let request = update.clone();
                async move { connection.update_training_job(&request).await }
            },
            |err, wait| {
                warn!(
                    training_id = %update.training_id,
                    error = %err,
                    retry_in = ?wait,
                    "failed to update status with the trainer; retrying. The externally \
                     visible status of this job may be temporarily inconsistent"
                );
            },
        )
        .await;

        if let Err(err) = &result {
            self.metrics.record_trainer_connectivity_failure();
            error!(
                training_id = %update.training_id,
                error = %err,
                "giving up updating the trainer; the recorded status of this job is likely stale"
            );
        }
        result
    }
}
