//! Rollout domain types
//!
//! Each service in an instruction walks the same state machine. The phases
//! it passed through are recorded so the final report shows exactly where a
//! service ended up.

use std::time::{Duration, Instant};

use crate::error::RolloutError;

/// Phase of one service's rollout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutPhase {
    Pending,
    /// Existing workload must be settled before anything is applied
    ReadyCheck,
    Rendering,
    ApplyingStorage,
    ApplyingWorkload,
    /// Only entered when the routing table changed
    ApplyingProxy,
    /// Bounded wait on the rollout status
    Observing,
    Committed,
    RollingBack,
    RolledBack,
    PostAction,
    Done,
}

impl RolloutPhase {
    /// Get human-readable name for the phase
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::ReadyCheck => "Ready Check",
            Self::Rendering => "Rendering",
            Self::ApplyingStorage => "Applying Storage",
            Self::ApplyingWorkload => "Applying Workload",
            Self::ApplyingProxy => "Applying Proxy",
            Self::Observing => "Observing",
            Self::Committed => "Committed",
            Self::RollingBack => "Rolling Back",
            Self::RolledBack => "Rolled Back",
            Self::PostAction => "Post Action",
            Self::Done => "Done",
        }
    }

    /// Get emoji for the phase
    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::ReadyCheck => "🔍",
            Self::Rendering => "📝",
            Self::ApplyingStorage => "💾",
            Self::ApplyingWorkload => "🚀",
            Self::ApplyingProxy => "🌐",
            Self::Observing => "👀",
            Self::Committed => "✅",
            Self::RollingBack => "⏪",
            Self::RolledBack => "↩️",
            Self::PostAction => "🔧",
            Self::Done => "🏁",
        }
    }

    /// Whether `next` is a legal successor of this phase
    pub fn can_transition_to(&self, next: RolloutPhase) -> bool {
        use RolloutPhase::*;
        matches!(
            (self, next),
            (Pending, ReadyCheck)
                | (Pending, Rendering)
                | (ReadyCheck, Rendering)
                | (Rendering, ApplyingStorage)
                | (Rendering, ApplyingWorkload)
                | (ApplyingStorage, ApplyingWorkload)
                | (ApplyingWorkload, ApplyingProxy)
                | (ApplyingWorkload, Observing)
                | (ApplyingProxy, Observing)
                | (Observing, Committed)
                | (Observing, RollingBack)
                | (RollingBack, RolledBack)
                | (Committed, PostAction)
                | (Committed, Done)
                | (PostAction, Done)
                | (RolledBack, Done)
        )
    }
}

/// Final verdict for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    /// Rolled out and healthy
    Deployed,
    /// Unhealthy, reverted to the previous revision
    RolledBack,
}

/// Progress record of one service through the state machine
#[derive(Debug, Clone)]
pub struct ServiceRollout {
    pub name: String,
    phase: RolloutPhase,
    phases: Vec<RolloutPhase>,
    outcome: Option<ServiceOutcome>,
    started: Instant,
    duration: Option<Duration>,
}

impl ServiceRollout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: RolloutPhase::Pending,
            phases: vec![RolloutPhase::Pending],
            outcome: None,
            started: Instant::now(),
            duration: None,
        }
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    /// Every phase entered so far, in order
    pub fn phases(&self) -> &[RolloutPhase] {
        &self.phases
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Move to `next`. Illegal transitions are a controller bug.
    pub fn advance(&mut self, next: RolloutPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal rollout transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::info!("{} {}: {}", next.emoji(), self.name, next.name());
        self.phase = next;
        self.phases.push(next);
    }

    /// Record the verdict and enter `Done`
    pub fn finish(&mut self, outcome: ServiceOutcome) {
        self.advance(RolloutPhase::Done);
        self.outcome = Some(outcome);
        self.duration = Some(self.started.elapsed());
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Some(ServiceOutcome::Deployed)
    }
}

/// Outcome of a whole instruction
#[derive(Debug, Default)]
pub struct DeploymentReport {
    pub services: Vec<ServiceRollout>,
    /// Services decommissioned after the rollouts
    pub removed: Vec<String>,
}

impl DeploymentReport {
    pub fn is_success(&self) -> bool {
        self.services.iter().all(ServiceRollout::is_success)
    }

    pub fn failed_names(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| !s.is_success())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Fail with the names of every service that did not deploy
    pub fn into_result(self) -> Result<Self, RolloutError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RolloutError::ServicesFailed {
                names: self.failed_names(),
            })
        }
    }
}
