//! Provider lifecycle state model.
//!
//! [`ProviderState`] enumerates the lifecycle states and owns the static
//! transition table. [`ProviderStateInfo`] is the immutable snapshot the
//! lifecycle engine swaps wholesale on every change.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::ProviderError;

/// Consecutive failures at which a provider stops reporting itself healthy.
pub const UNHEALTHY_FAILURE_THRESHOLD: u32 = 3;

/// Lifecycle state of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderState {
    /// Constructed but never initialized.
    Uninitialized,
    /// Initialization in progress.
    Initializing,
    /// Accepting operations, none in flight.
    Ready,
    /// Accepting operations, at least one in flight.
    Busy,
    /// Initialization or an operation faulted.
    Error,
    /// Shutdown in progress.
    ShuttingDown,
    /// Shut down; may be re-initialized.
    Shutdown,
    /// Temporarily not accepting operations.
    Suspended,
}

impl ProviderState {
    /// All states, in declaration order.
    pub const ALL: [ProviderState; 8] = [
        ProviderState::Uninitialized,
        ProviderState::Initializing,
        ProviderState::Ready,
        ProviderState::Busy,
        ProviderState::Error,
        ProviderState::ShuttingDown,
        ProviderState::Shutdown,
        ProviderState::Suspended,
    ];

    /// States reachable from `self` in a single transition.
    pub fn allowed_transitions(&self) -> &'static [ProviderState] {
        use ProviderState::*;
        match self {
            Uninitialized => &[Initializing, Shutdown],
            Initializing => &[Ready, Error, Shutdown],
            Ready => &[Busy, Error, ShuttingDown, Suspended],
            Busy => &[Ready, Error, ShuttingDown, Suspended],
            Error => &[Initializing, Shutdown],
            ShuttingDown => &[Shutdown],
            Shutdown => &[Initializing],
            Suspended => &[Ready, Error, ShuttingDown],
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: ProviderState) -> bool {
        self.allowed_transitions().contains(&to)
    }

    /// Initializing or ShuttingDown.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, ProviderState::Initializing | ProviderState::ShuttingDown)
    }

    /// Returns the string representation used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Uninitialized => "uninitialized",
            ProviderState::Initializing => "initializing",
            ProviderState::Ready => "ready",
            ProviderState::Busy => "busy",
            ProviderState::Error => "error",
            ProviderState::ShuttingDown => "shutting_down",
            ProviderState::Shutdown => "shutdown",
            ProviderState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of a provider's lifecycle state.
///
/// Never mutated in place: every change builds a new record through one of
/// the `with_*` constructors and replaces the previous snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStateInfo {
    /// Current state.
    pub state: ProviderState,
    /// When the last transition happened.
    pub last_transition: DateTime<Utc>,
    /// Human-readable description of why the provider is in this state.
    pub description: String,
    /// Free-form context attached to the transition.
    pub context: HashMap<String, String>,
    /// Error that caused the most recent `Error` transition.
    pub error: Option<ProviderError>,
    /// When the last operation succeeded.
    pub last_successful_operation: Option<DateTime<Utc>>,
    /// Number of `Error` transitions since the last successful operation.
    pub consecutive_failures: u32,
}

impl ProviderStateInfo {
    /// The snapshot every provider starts with.
    pub fn initial() -> Self {
        Self {
            state: ProviderState::Uninitialized,
            last_transition: Utc::now(),
            description: "Provider created".to_string(),
            context: HashMap::new(),
            error: None,
            last_successful_operation: None,
            consecutive_failures: 0,
        }
    }

    /// Builds the snapshot that follows a transition to `state`.
    ///
    /// Entering `Error` stores `error` and bumps the consecutive failure
    /// counter; any other state keeps the previous error for inspection.
    /// Context belongs to a single transition and starts out empty.
    pub fn transitioned(
        &self,
        state: ProviderState,
        description: impl Into<String>,
        error: Option<ProviderError>,
    ) -> Self {
        let entering_error = state == ProviderState::Error;
        Self {
            state,
            last_transition: Utc::now(),
            description: description.into(),
            context: HashMap::new(),
            error: if entering_error {
                error.or_else(|| self.error.clone())
            } else {
                self.error.clone()
            },
            last_successful_operation: self.last_successful_operation,
            consecutive_failures: if entering_error {
                self.consecutive_failures + 1
            } else {
                self.consecutive_failures
            },
        }
    }

    /// Builds the snapshot that records a successful operation.
    pub fn with_success(&self, at: DateTime<Utc>) -> Self {
        let last = match self.last_successful_operation {
            Some(prev) if prev > at => prev,
            _ => at,
        };
        Self {
            last_successful_operation: Some(last),
            consecutive_failures: 0,
            ..self.clone()
        }
    }

    /// Builds a copy with an extra context entry.
    pub fn with_context(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.context.insert(key.into(), value.into());
        next
    }

    /// Ready or Busy.
    pub fn can_accept_operations(&self) -> bool {
        matches!(self.state, ProviderState::Ready | ProviderState::Busy)
    }

    /// Error or Shutdown.
    pub fn requires_reinitialization(&self) -> bool {
        matches!(self.state, ProviderState::Error | ProviderState::Shutdown)
    }

    /// Shutdown.
    pub fn is_terminal(&self) -> bool {
        self.state == ProviderState::Shutdown
    }

    /// Initializing or ShuttingDown.
    pub fn is_transitioning(&self) -> bool {
        self.state.is_transitioning()
    }

    /// Accepting operations and below the failure threshold. Both must hold.
    pub fn is_healthy(&self) -> bool {
        self.can_accept_operations() && self.consecutive_failures < UNHEALTHY_FAILURE_THRESHOLD
    }
}

impl Default for ProviderStateInfo {
    fn default() -> Self {
        Self::initial()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn transition_table_matches_lifecycle() {
        use ProviderState::*;

        assert!(Uninitialized.can_transition_to(Initializing));
        assert!(Uninitialized.can_transition_to(Shutdown));
        assert!(!Uninitialized.can_transition_to(Ready));

        assert!(Ready.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Ready));
        assert!(Busy.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Ready));
        assert!(!Suspended.can_transition_to(Busy));

        assert!(Error.can_transition_to(Initializing));
        assert!(Shutdown.can_transition_to(Initializing));
        assert!(!Shutdown.can_transition_to(Ready));
        assert!(ShuttingDown.can_transition_to(Shutdown));
        assert!(!ShuttingDown.can_transition_to(Error));
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for state in ProviderState::ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn context_does_not_outlive_its_transition() {
        let suspended = ProviderStateInfo::initial()
            .transitioned(ProviderState::Initializing, "init", None)
            .transitioned(ProviderState::Ready, "ready", None)
            .transitioned(ProviderState::Suspended, "paused", None)
            .with_context("retry_after", "60");
        assert_eq!(suspended.context.get("retry_after").map(String::as_str), Some("60"));

        let resumed = suspended.transitioned(ProviderState::Ready, "resumed", None);
        assert!(resumed.context.is_empty());
    }

    #[test]
    fn only_initializing_and_shutting_down_are_transitioning() {
        let transitioning: Vec<ProviderState> = ProviderState::ALL
            .into_iter()
            .filter(|s| s.is_transitioning())
            .collect();

        assert_eq!(
            transitioning,
            vec![ProviderState::Initializing, ProviderState::ShuttingDown]
        );
    }

    #[test]
    fn every_state_is_reachable() {
        for target in ProviderState::ALL {
            if target == ProviderState::Uninitialized {
                continue;
            }
            let reachable = ProviderState::ALL
                .iter()
                .any(|from| from.can_transition_to(target));
            assert!(reachable, "{target} is unreachable");
        }
    }

    #[test]
    fn entering_error_counts_failures() {
        let info = ProviderStateInfo::initial()
            .transitioned(ProviderState::Initializing, "init", None)
            .transitioned(
                ProviderState::Error,
                "failed",
                Some(ProviderError::Configuration("bad".into())),
            );

        assert_eq!(info.consecutive_failures, 1);
        assert_eq!(
            info.error,
            Some(ProviderError::Configuration("bad".into()))
        );
        assert!(info.requires_reinitialization());

        let again = info
            .transitioned(ProviderState::Initializing, "retry", None)
            .transitioned(ProviderState::Error, "failed again", None);
        assert_eq!(again.consecutive_failures, 2);
        assert_eq!(
            again.error,
            Some(ProviderError::Configuration("bad".into()))
        );
    }

    #[test]
    fn success_resets_failures_and_is_monotonic() {
        let failed = ProviderStateInfo {
            consecutive_failures: 4,
            ..ProviderStateInfo::initial()
        };

        let now = Utc::now();
        let ok = failed.with_success(now);
        assert_eq!(ok.consecutive_failures, 0);
        assert_eq!(ok.last_successful_operation, Some(now));

        let earlier = ok.with_success(now - Duration::seconds(5));
        assert_eq!(earlier.last_successful_operation, Some(now));
    }

    #[test]
    fn healthy_requires_both_conditions() {
        let ready = ProviderStateInfo {
            state: ProviderState::Ready,
            ..ProviderStateInfo::initial()
        };
        assert!(ready.is_healthy());

        let ready_but_failing = ProviderStateInfo {
            consecutive_failures: UNHEALTHY_FAILURE_THRESHOLD,
            ..ready.clone()
        };
        assert!(!ready_but_failing.is_healthy());

        let suspended = ProviderStateInfo {
            state: ProviderState::Suspended,
            ..ready
        };
        assert!(!suspended.is_healthy());
    }

    #[test]
    fn derived_flags() {
        let mut info = ProviderStateInfo::initial();
        assert!(!info.can_accept_operations());
        assert!(!info.is_transitioning());

        info.state = ProviderState::Initializing;
        assert!(info.is_transitioning());

        info.state = ProviderState::Shutdown;
        assert!(info.is_terminal());
        assert!(info.requires_reinitialization());
    }

    #[test]
    fn state_serialization() {
        let json = serde_json::to_string(&ProviderState::ShuttingDown).unwrap();
        assert_eq!(json, "\"shutting_down\"");
    }
}
