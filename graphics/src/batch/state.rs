//! Batch lifecycle.

use std::fmt;

use crate::error::GraphicsError;

use super::BatchId;

/// Lifecycle state of a batch.
///
/// ```text
/// Open -> Closed -> Submitted -> Complete -> Retrieved
///           |           |
///           +-> Failed <+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    /// Accepting views.
    Open,
    /// Full or flushed, waiting for a slot.
    Closed,
    /// Recorded and handed to the device queues.
    Submitted,
    /// Results read back to host memory.
    Complete,
    /// Results handed to the caller.
    Retrieved,
    /// Submission or execution failed.
    Failed,
}

impl BatchState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Open, Closed)
                | (Closed, Submitted)
                | (Closed, Failed)
                | (Submitted, Complete)
                | (Submitted, Failed)
                | (Complete, Retrieved)
        )
    }

    /// Whether the batch no longer occupies device resources.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Retrieved | Self::Failed)
    }

    /// Move to `next`, rejecting illegal transitions.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] and leaves the state
    /// unchanged if the transition is not allowed.
    pub fn transition(&mut self, batch: BatchId, next: BatchState) -> Result<(), GraphicsError> {
        if !self.can_transition_to(next) {
            log::warn!("Batch {}: rejected transition {} -> {}", batch, self, next);
            return Err(GraphicsError::InvalidParameter(format!(
                "batch {batch} cannot move from {self} to {next}"
            )));
        }
        log::trace!("Batch {}: {} -> {}", batch, self, next);
        *self = next;
        Ok(())
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Submitted => "submitted",
            Self::Complete => "complete",
            Self::Retrieved => "retrieved",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BatchState; 6] = [
        BatchState::Open,
        BatchState::Closed,
        BatchState::Submitted,
        BatchState::Complete,
        BatchState::Retrieved,
        BatchState::Failed,
    ];

    #[test]
    fn test_happy_path() {
        let id = BatchId::new(0);
        let mut state = BatchState::Open;
        for next in [
            BatchState::Closed,
            BatchState::Submitted,
            BatchState::Complete,
            BatchState::Retrieved,
        ] {
            state.transition(id, next).unwrap();
        }
        assert_eq!(state, BatchState::Retrieved);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in ALL {
            assert!(!BatchState::Retrieved.can_transition_to(next));
            assert!(!BatchState::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_rejected_transition_keeps_state() {
        let mut state = BatchState::Open;
        let err = state
            .transition(BatchId::new(3), BatchState::Complete)
            .unwrap_err();
        assert_eq!(state, BatchState::Open);
        assert_eq!(
            err.to_string(),
            "invalid parameter: batch #3 cannot move from open to complete"
        );
    }

    #[test]
    fn test_failure_reachable_from_closed_and_submitted() {
        let sources: Vec<_> = ALL
            .into_iter()
            .filter(|s| s.can_transition_to(BatchState::Failed))
            .collect();
        assert_eq!(sources, vec![BatchState::Closed, BatchState::Submitted]);
    }
}
