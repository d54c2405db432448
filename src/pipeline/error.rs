use serde::Serialize;
use thiserror::Error;

use crate::models::{StageError, StageErrorKind};
use crate::pipeline::state::Phase;

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineError {
    /// Rejected before any stage ran.
    #[error("invalid input: {message}")]
    Input { message: String },
    #[error("{stage} stage failed: {message}")]
    Stage { stage: Phase, message: String },
    #[error("{stage} stage timed out: {message}")]
    Timeout { stage: Phase, message: String },
    #[error("job deadline exceeded during {stage}")]
    Deadline { stage: Phase },
    #[error("cancelled during {stage}")]
    Cancelled { stage: Phase },
}

impl PipelineError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn from_stage(stage: Phase, err: StageError) -> Self {
        match err.kind {
            StageErrorKind::Timeout => Self::Timeout {
                stage,
                message: err.message,
            },
            StageErrorKind::Transport | StageErrorKind::Status => Self::Stage {
                stage,
                message: err.to_string(),
            },
        }
    }

    /// Errors that end the job no matter which stage they hit.
    #[must_use]
    pub fn is_job_level(&self) -> bool {
        matches!(self, Self::Deadline { .. } | Self::Cancelled { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Deadline { .. })
    }
}
