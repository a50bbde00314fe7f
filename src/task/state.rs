//! Run state machine.
//!
//! # State Machine
//! ```text
//! Received -> Validating -> Resolving -> Generating -> Publishing -> Reporting -> Completed
//!     \____________\____________\____________\_____________\____________\-> Failed(stage, reason)
//! ```
//!
//! Transitions are strictly sequential. `Completed` and `Failed` are terminal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{FailureKind, TaskError};

/// A non-terminal pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validating,
    Resolving,
    Generating,
    Publishing,
    Reporting,
}

impl Stage {
    /// The stage that must follow this one, or `None` after `Reporting`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Received => Some(Stage::Validating),
            Stage::Validating => Some(Stage::Resolving),
            Stage::Resolving => Some(Stage::Generating),
            Stage::Generating => Some(Stage::Publishing),
            Stage::Publishing => Some(Stage::Reporting),
            Stage::Reporting => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid run transition from {from} to {to}")]
pub struct TransitionError {
    pub from: String,
    pub to: String,
}

/// Where a run currently is.
///
/// # Property
/// `is_terminal() => ` every transition method returns `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Active {
        stage: Stage,
    },
    Completed,
    Failed {
        /// Stage whose component failed
        stage: Stage,
        reason: FailureKind,
        detail: String,
    },
}

impl Default for RunState {
    fn default() -> Self {
        RunState::Active {
            stage: Stage::Received,
        }
    }
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed { .. })
    }

    /// Current stage while active.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Active { stage } => Some(*stage),
            _ => None,
        }
    }

    /// Move to `next`.
    ///
    /// # Precondition
    /// `self == Active { stage }` with `stage.next() == Some(next)`
    pub fn advance(&mut self, next: Stage) -> Result<(), TransitionError> {
        match self {
            RunState::Active { stage } if stage.next() == Some(next) => {
                *self = RunState::Active { stage: next };
                Ok(())
            }
            other => Err(TransitionError {
                from: format!("{:?}", other),
                to: format!("{:?}", next),
            }),
        }
    }

    /// Move to `Completed`.
    ///
    /// # Precondition
    /// `self == Active { Reporting }`
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        match self {
            RunState::Active {
                stage: Stage::Reporting,
            } => {
                *self = RunState::Completed;
                Ok(())
            }
            other => Err(TransitionError {
                from: format!("{:?}", other),
                to: "Completed".to_string(),
            }),
        }
    }

    /// Move to `Failed`, attributing the failure to `stage`.
    ///
    /// # Precondition
    /// `!self.is_terminal()`
    pub fn fail(&mut self, stage: Stage, error: &TaskError) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                from: format!("{:?}", self),
                to: "Failed".to_string(),
            });
        }
        *self = RunState::Failed {
            stage,
            reason: error.kind(),
            detail: error.to_string(),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_every_stage_in_order() {
        let mut state = RunState::default();
        for next in [
            Stage::Validating,
            Stage::Resolving,
            Stage::Generating,
            Stage::Publishing,
            Stage::Reporting,
        ] {
            state.advance(next).unwrap();
            assert_eq!(state.stage(), Some(next));
        }
        state.complete().unwrap();
        assert_eq!(state, RunState::Completed);
        assert!(state.is_terminal());
    }

    #[test]
    fn rejects_skipped_stages() {
        let mut state = RunState::default();
        assert!(state.advance(Stage::Generating).is_err());
        assert!(state.complete().is_err());
        assert_eq!(state.stage(), Some(Stage::Received));
    }

    #[test]
    fn failed_is_terminal() {
        let mut state = RunState::Active {
            stage: Stage::Generating,
        };
        state
            .fail(Stage::Generating, &TaskError::GenerationFailed("empty".into()))
            .unwrap();
        assert!(state.is_terminal());
        assert!(state.advance(Stage::Publishing).is_err());
        assert!(state
            .fail(Stage::Publishing, &TaskError::PublishPermanent("x".into()))
            .is_err());
        match state {
            RunState::Failed { stage, reason, .. } => {
                assert_eq!(stage, Stage::Generating);
                assert_eq!(reason, FailureKind::GenerationFailed);
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn serializes_with_state_tag() {
        let json = serde_json::to_value(RunState::Active {
            stage: Stage::Publishing,
        })
        .unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["stage"], "publishing");
    }
}
