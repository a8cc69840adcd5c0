use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a training job, or of a single learner within one.
///
/// The same value set is used for both: the overall job status is derived
/// from learner statuses through the transition table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingStatus {
    NotStarted,
    Pending,
    Downloading,
    Processing,
    Storing,
    Completed,
    Failed,
    Halted,
}

impl TrainingStatus {
    /// Returns true for statuses with no legal outgoing transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrainingStatus::Completed | TrainingStatus::Failed | TrainingStatus::Halted
        )
    }

    /// The set of current statuses from which this status may be reached.
    ///
    /// NOT_STARTED is only ever the seeded default and PENDING is set out of
    /// band by the metadata service, so neither is reachable through the
    /// table.
    fn allowed_predecessors(self) -> &'static [TrainingStatus] {
        use TrainingStatus::*;
        match self {
            NotStarted | Pending => &[],
            Downloading => &[Pending, NotStarted],
            Processing => &[Processing, Downloading, Pending],
            Storing | Completed | Failed | Halted => {
                &[Storing, Processing, Downloading, Pending, NotStarted]
            }
        }
    }
}

/// Whether moving the overall job status from `current` to `candidate` is
/// legal.
pub fn is_transition_allowed(current: TrainingStatus, candidate: TrainingStatus) -> bool {
    candidate.allowed_predecessors().contains(&current)
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingStatus::NotStarted => write!(f, "NOT_STARTED"),
            TrainingStatus::Pending => write!(f, "PENDING"),
            TrainingStatus::Downloading => write!(f, "DOWNLOADING"),
            TrainingStatus::Processing => write!(f, "PROCESSING"),
            TrainingStatus::Storing => write!(f, "STORING"),
            TrainingStatus::Completed => write!(f, "COMPLETED"),
            TrainingStatus::Failed => write!(f, "FAILED"),
            TrainingStatus::Halted => write!(f, "HALTED"),
        }
    }
}

impl FromStr for TrainingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(TrainingStatus::NotStarted),
            "PENDING" => Ok(TrainingStatus::Pending),
            "DOWNLOADING" => Ok(TrainingStatus::Downloading),
            "PROCESSING" => Ok(TrainingStatus::Processing),
            "STORING" => Ok(TrainingStatus::Storing),
            "COMPLETED" => Ok(TrainingStatus::Completed),
            "FAILED" => Ok(TrainingStatus::Failed),
            "HALTED" => Ok(TrainingStatus::Halted),
            _ => Err(format!("Invalid TrainingStatus: {}", s)),
        }
    }
}
