//! Lifecycle-manager port and the retry-wrapped job terminator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::backoff::{retry_notify, RetryPolicy};
use crate::error::RemoteError;
use crate::metrics::MonitorMetrics;

/// Request to tear down a deployed job's compute resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobKillRequest {
    pub name: String,
    pub training_id: String,
    pub user_id: String,
}

#[async_trait]
pub trait LifecycleConnection: Send + Sync {
    async fn kill_training_job(&self, request: &JobKillRequest) -> Result<(), RemoteError>;
}

/// Establishes a short-lived [`LifecycleConnection`].
#[async_trait]
pub trait LifecycleConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn LifecycleConnection>, RemoteError>;
}

/// Retry-wrapped teardown of a deployed job through the lifecycle manager.
pub struct JobTerminator {
    connector: Arc<dyn LifecycleConnector>,
    policy: RetryPolicy,
    teardown_delay: Duration,
    metrics: Arc<MonitorMetrics>,
}

impl JobTerminator {
    pub fn new(connector: Arc<dyn LifecycleConnector>, metrics: Arc<MonitorMetrics>) -> Self {
        Self {
            connector,
            policy: RetryPolicy::remote_call(),
            teardown_delay: Duration::from_secs(10),
            metrics,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_teardown_delay(mut self, delay: Duration) -> Self {
        self.teardown_delay = delay;
        self
    }

    /// Asks the lifecycle manager to garbage collect the job. A fixed delay
    /// precedes the request on every path.
    pub async fn kill(&self, request: &JobKillRequest) -> Result<(), RemoteError> {
        sleep(self.teardown_delay).await;
        info!(
            training_id = %request.training_id,
            job_name = %request.name,
            "sending job kill request to the lifecycle manager"
        );

        let connection = match self.connector.connect().await {
            Ok(connection) => connection,
            Err(err) => {
                self.metrics.record_lifecycle_connectivity_failure();
                error!(
                    training_id = %request.training_id,
                    error = %err,
                    "cannot create the lifecycle manager client"
                );
                return Err(err);
            }
        };

        let result = retry_notify(
            &self.policy,
            || {
                let connection = Arc::clone(&connection);
                let request = request.clone();
                async move { connection.kill_training_job(&request).await }
            },
            |err, wait| {
                warn!(
                    training_id = %request.training_id,
                    error = %err,
                    retry_in = ?wait,
                    "failed to request garbage collection of the job; retrying"
                );
            },
        )
        .await;

        if let Err(err) = &result {
            self.metrics.record_lifecycle_connectivity_failure();
            error!(
                training_id = %request.training_id,
                error = %err,
                "giving up asking the lifecycle manager to garbage collect the job"
            );
        }
        result
    }
}
