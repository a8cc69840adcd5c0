//! Compute-cluster port.
//!
//! The cluster owns the job's containers. The monitor only needs two things
//! from it: a verified connection at construction time, and the deployment's
//! startup health for the job-started probe. Teardown goes through the
//! lifecycle manager, not through this port.

use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("cluster connection failed: {0}")]
    Connection(String),

    #[error("cluster api error: {0}")]
    Api(String),
}

/// Observed startup health of a job's compute deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentHealth {
    /// Resources are being scheduled or containers are still coming up.
    Starting,
    Running,
    ImagePullFailed,
    InsufficientResources,
}

#[async_trait]
pub trait ComputeCluster: Send + Sync {
    async fn deployment_health(&self, job_name: &str) -> Result<DeploymentHealth, ClusterError>;
}

/// Establishes a [`ComputeCluster`] connection.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ComputeCluster>, ClusterError>;
}
