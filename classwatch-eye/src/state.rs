//! Pipeline run states and the transitions between them

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a run ended in `Failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Stopped by the caller; partial results are kept
    Cancelled,
    SourceUnavailable(String),
    DurationExceeded { duration: f64, limit: f64 },
    /// Any other run-aborting error
    Error(String),
}

impl FailureReason {
    /// Reason recorded for a run-aborting error
    pub fn from_error(err: &PipelineError) -> Self {
        match err {
            PipelineError::Cancelled => FailureReason::Cancelled,
            PipelineError::SourceUnavailable(msg) => FailureReason::SourceUnavailable(msg.clone()),
            PipelineError::DurationExceeded { duration, limit } => FailureReason::DurationExceeded {
                duration: *duration,
                limit: *limit,
            },
            other => FailureReason::Error(other.to_string()),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::SourceUnavailable(msg) => write!(f, "source unavailable: {}", msg),
            FailureReason::DurationExceeded { duration, limit } => {
                write!(f, "video exceeds {} second limit (duration {:.1}s)", limit, duration)
            }
            FailureReason::Error(msg) => write!(f, "{}", msg),
        }
    }
}

/// Pipeline run states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    /// Source metadata (duration, dimensions) is known
    SourceReady,
    Running,
    Cancelling,
    Completed,
    Failed(FailureReason),
}

impl PipelineState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        matches!(
            (self, target),
            // From Idle
            (Idle, SourceReady) |
            (Idle, Failed(_)) |

            // From SourceReady
            (SourceReady, Running) |
            (SourceReady, Failed(_)) |
            (SourceReady, Idle) |

            // From Running
            (Running, Completed) |
            (Running, Cancelling) |
            (Running, Failed(FailureReason::SourceUnavailable(_))) |
            (Running, Failed(FailureReason::Error(_))) |

            // From Cancelling
            (Cancelling, Failed(FailureReason::Cancelled)) |

            // A stopped live feed keeps its source and may start again
            (Failed(FailureReason::Cancelled), Running) |

            // Manual retry starts over from source selection
            (Completed, Idle) |
            (Failed(_), Idle)
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::SourceReady => "SourceReady",
            Self::Running => "Running",
            Self::Cancelling => "Cancelling",
            Self::Completed => "Completed",
            Self::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Failed(FailureReason::Cancelled))
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "Failed ({})", reason),
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Current state plus a broadcast of every change.
///
/// Only the owning controller holds the cell; everyone else gets a receiver.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<PipelineState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(PipelineState::Idle);
        Self { tx }
    }

    pub(crate) fn get(&self) -> PipelineState {
        self.tx.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.tx.subscribe()
    }

    /// Move to `target`, refusing transitions the state machine does not allow
    pub(crate) fn transition(&self, target: PipelineState) -> Result<(), PipelineError> {
        let current = self.get();
        if !current.can_transition_to(&target) {
            warn!("Rejected transition {} -> {}", current, target);
            return Err(PipelineError::InvalidTransition {
                from: current.to_string(),
                to: target.to_string(),
            });
        }

        match &target {
            PipelineState::Failed(reason) if *reason != FailureReason::Cancelled => {
                warn!("Pipeline {} -> {}", current, target)
            }
            PipelineState::Completed | PipelineState::Failed(_) => info!("Pipeline {} -> {}", current, target),
            _ => debug!("Pipeline {} -> {}", current, target),
        }
        self.tx.send_replace(target);
        Ok(())
    }

    /// Record a run-aborting error from whatever state the run is in
    pub(crate) fn fail(&self, err: &PipelineError) {
        let reason = FailureReason::from_error(err);
        if let Err(e) = self.transition(PipelineState::Failed(reason)) {
            debug!("Failure not recorded: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), PipelineState::Idle);
        cell.transition(PipelineState::SourceReady).unwrap();
        cell.transition(PipelineState::Running).unwrap();
        cell.transition(PipelineState::Completed).unwrap();
        assert!(cell.get().is_terminal());
    }

    #[test]
    fn test_cancel_path() {
        let running = PipelineState::Running;
        assert!(running.can_transition_to(&PipelineState::Cancelling));
        assert!(!running.can_transition_to(&PipelineState::Failed(FailureReason::Cancelled)));
        assert!(PipelineState::Cancelling.can_transition_to(&PipelineState::Failed(FailureReason::Cancelled)));
        assert!(!PipelineState::Cancelling.can_transition_to(&PipelineState::Completed));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let cell = StateCell::new();
        assert!(matches!(
            cell.transition(PipelineState::Running),
            Err(PipelineError::InvalidTransition { .. })
        ));
        assert_eq!(cell.get(), PipelineState::Idle);

        assert!(!PipelineState::Completed.can_transition_to(&PipelineState::Running));
        assert!(!PipelineState::Running.can_transition_to(&PipelineState::SourceReady));
    }

    #[test]
    fn test_live_restart_after_stop() {
        let stopped = PipelineState::Failed(FailureReason::Cancelled);
        assert!(stopped.can_transition_to(&PipelineState::Running));
        assert!(stopped.is_cancelled());

        let broken = PipelineState::Failed(FailureReason::SourceUnavailable("denied".into()));
        assert!(!broken.can_transition_to(&PipelineState::Running));
        assert!(broken.can_transition_to(&PipelineState::Idle));
    }

    #[test]
    fn test_released_source_returns_to_idle() {
        let cell = StateCell::new();
        cell.transition(PipelineState::SourceReady).unwrap();
        cell.transition(PipelineState::Idle).unwrap();
        assert_eq!(cell.get(), PipelineState::Idle);
        assert!(!PipelineState::Running.can_transition_to(&PipelineState::Idle));
    }

    #[test]
    fn test_failure_reason_from_error() {
        assert_eq!(
            FailureReason::from_error(&PipelineError::DurationExceeded { duration: 90.0, limit: 60.0 }),
            FailureReason::DurationExceeded { duration: 90.0, limit: 60.0 }
        );
        assert_eq!(FailureReason::from_error(&PipelineError::Cancelled), FailureReason::Cancelled);
    }

    #[test]
    fn test_subscribers_see_changes() {
        let cell = StateCell::new();
        let rx = cell.subscribe();
        cell.fail(&PipelineError::SourceUnavailable("Permission denied".into()));
        assert_eq!(rx.borrow().name(), "Failed");
        assert_eq!(
            rx.borrow().to_string(),
            "Failed (source unavailable: Permission denied)"
        );
    }
}
