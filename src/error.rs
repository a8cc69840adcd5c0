//! Error taxonomy for the monitor.

use crate::cluster::ClusterError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::coordination::StoreError;

/// Failure of a call to the trainer or lifecycle-manager service.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("connecting to the {service} service failed: {reason}")]
    Connection { service: &'static str, reason: String },

    #[error("{service} call failed: {reason}")]
    Call { service: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid job identity: {reason}")]
    InvalidIdentity { reason: String },

    #[error("failed to connect to the compute cluster: {0}")]
    ClusterConnection(#[source] ClusterError),

    #[error("failed to connect to the coordination store: {0}")]
    StoreConnection(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Decode(#[from] CodecError),

    #[error("overall job status at {key} was empty; a value is expected after bootstrap")]
    EmptyOverallStatus { key: String },
}

pub type Result<T> = std::result::Result<T, MonitorError>;
