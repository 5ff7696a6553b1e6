use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Pipeline lifecycle states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Running {
        #[serde(skip)]
        start_time: Option<Instant>,
    },
    /// Finishing the in-flight cycle and releasing the source
    Stopping,
    /// The source was lost or the retry budget ran out
    Faulted { error_msg: String },
}

impl PipelineState {
    pub fn running() -> Self {
        Self::Running {
            start_time: Some(Instant::now()),
        }
    }

    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, target),
            (Idle, Running { .. })
                | (Running { .. }, Stopping)
                | (Running { .. }, Faulted { .. })
                | (Stopping, Idle)
                | (Faulted { .. }, Idle)
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Running { .. } => "Running",
            Self::Stopping => "Stopping",
            Self::Faulted { .. } => "Faulted",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        let running = PipelineState::running();

        assert!(PipelineState::Idle.can_transition_to(&running));
        assert!(running.can_transition_to(&PipelineState::Stopping));
        assert!(PipelineState::Stopping.can_transition_to(&PipelineState::Idle));
    }

    #[test]
    fn test_fault_path() {
        let faulted = PipelineState::Faulted {
            error_msg: "device unplugged".to_string(),
        };

        assert!(PipelineState::running().can_transition_to(&faulted));
        assert!(faulted.can_transition_to(&PipelineState::Idle));
        assert!(!faulted.can_transition_to(&PipelineState::running()));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!PipelineState::Idle.can_transition_to(&PipelineState::Stopping));
        assert!(!PipelineState::Stopping.can_transition_to(&PipelineState::running()));
        assert!(!PipelineState::Idle.can_transition_to(&PipelineState::Faulted {
            error_msg: String::new()
        }));
    }
}
