use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::error::StageError;
use crate::state::{Artifact, PipelineState, StateField};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Need {
    /// The stage cannot run without the field
    Required,
    /// The stage runs either way and substitutes a default when absent
    Optional,
}

/// A state field a stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRead {
    pub field: StateField,
    pub need: Need,
}

pub const fn required(field: StateField) -> FieldRead {
    FieldRead {
        field,
        need: Need::Required,
    }
}

pub const fn optional(field: StateField) -> FieldRead {
    FieldRead {
        field,
        need: Need::Optional,
    }
}

/// One processing step of the workflow.
///
/// A stage reads nothing but the pipeline state, the config subset it
/// reports from [`Stage::config_fingerprint`], and the collaborators it was
/// built with. Files it writes must live at deterministic paths so that
/// running it twice on the same inputs is harmless.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bump when the stage's output for the same inputs changes
    fn version(&self) -> u32 {
        1
    }

    fn reads(&self) -> &'static [FieldRead];

    fn writes(&self) -> StateField;

    /// The config values this stage's output depends on
    fn config_fingerprint(&self, config: &Config) -> Value;

    async fn execute(&self, state: &PipelineState) -> Result<Artifact, StageError>;
}

/// Result of a stage invocation as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Success(Artifact),
    Recoverable(StageError),
    Fatal(StageError),
}

impl StageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StageOutcome::Success(_))
    }
}

impl From<Result<Artifact, StageError>> for StageOutcome {
    fn from(result: Result<Artifact, StageError>) -> Self {
        match result {
            Ok(artifact) => StageOutcome::Success(artifact),
            Err(err) if err.kind.is_recoverable() => StageOutcome::Recoverable(err),
            Err(err) => StageOutcome::Fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_outcome_classification() {
        let ok: StageOutcome = Ok(Artifact::AudioPath(PathBuf::from("a.wav"))).into();
        assert!(ok.is_success());

        let transient: StageOutcome = Err(StageError::transient("model loading")).into();
        assert!(matches!(transient, StageOutcome::Recoverable(_)));

        let input: StageOutcome = Err(StageError::input("not a video")).into();
        assert!(matches!(input, StageOutcome::Fatal(_)));

        let resource: StageOutcome = Err(StageError::resource("disk full")).into();
        assert!(matches!(resource, StageOutcome::Fatal(_)));
    }
}
