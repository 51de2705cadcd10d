//! Formal finite state machine for InnoDBCluster lifecycle management.
//!
//! The phase is derived anew every cycle from what the diff engine and the
//! collector report, then checked against an explicit transition table so
//! that only valid phase changes are persisted.
//!
//! ## Phases
//!
//! Initializing → Growing | Shrinking | Stable
//! Growing ⇄ Shrinking ⇄ Stable, with Degraded reachable from any live phase
//! Deleting → Deleted

use std::fmt;

use crate::crd::ClusterPhase;

/// Events that trigger state transitions in the cluster lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// Members or owned objects must be created or repaired
    Grow,
    /// Surplus members must be removed
    Shrink,
    /// Nothing to do and every member is ready
    Converged,
    /// A member has been not ready for longer than the grace window
    MemberFailure,
    /// Deletion timestamp has been set on the cluster
    DeletionRequested,
    /// No member pod and no router remain
    MembersDrained,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::Grow => write!(f, "Grow"),
            ClusterEvent::Shrink => write!(f, "Shrink"),
            ClusterEvent::Converged => write!(f, "Converged"),
            ClusterEvent::MemberFailure => write!(f, "MemberFailure"),
            ClusterEvent::DeletionRequested => write!(f, "DeletionRequested"),
            ClusterEvent::MembersDrained => write!(f, "MembersDrained"),
        }
    }
}

/// Context information available during state transitions
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Desired number of members
    pub desired_instances: i32,
    /// Members ready and in the group
    pub ready_members: i32,
    /// Members not ready beyond the grace window
    pub failed_members: i32,
    /// Number of actions the diff produced
    pub pending_actions: usize,
    /// Number of member removals among them
    pub pending_removals: usize,
    /// Deletion requested and nothing but services and finalizer remain
    pub drained: bool,
}

impl TransitionContext {
    /// Create a new transition context
    pub fn new(desired_instances: i32, ready_members: i32) -> Self {
        Self {
            desired_instances,
            ready_members,
            ..Default::default()
        }
    }

    /// Check if all desired members are ready
    pub fn all_members_ready(&self) -> bool {
        self.ready_members >= self.desired_instances
    }

    pub fn with_failed(mut self, failed: i32) -> Self {
        self.failed_members = failed;
        self
    }

    pub fn with_actions(mut self, actions: usize, removals: usize) -> Self {
        self.pending_actions = actions;
        self.pending_removals = removals;
        self
    }

    pub fn with_drained(mut self, drained: bool) -> Self {
        self.drained = drained;
        self
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    /// Source state
    pub from: ClusterPhase,
    /// Target state
    pub to: ClusterPhase,
    /// Event that triggers this transition
    pub event: ClusterEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    /// Create a new transition
    const fn new(
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: ClusterPhase,
        event: ClusterEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        reason: String,
    },
}

impl TransitionResult {
    /// Phase after applying the result to `current`.
    pub fn next_phase(&self, current: ClusterPhase) -> ClusterPhase {
        match self {
            TransitionResult::Success { to, .. } => *to,
            _ => current,
        }
    }
}

/// Phases in which the cluster is live and reconciled toward its spec.
const LIVE_PHASES: [ClusterPhase; 5] = [
    ClusterPhase::Initializing,
    ClusterPhase::Growing,
    ClusterPhase::Shrinking,
    ClusterPhase::Stable,
    ClusterPhase::Degraded,
];

/// Formal state machine for InnoDBCluster lifecycle
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        let mut transitions = Vec::new();

        // Every live phase reacts to the same five events.
        for from in LIVE_PHASES {
            transitions.extend([
                Transition::new(
                    from,
                    ClusterPhase::Growing,
                    ClusterEvent::Grow,
                    "Creating or repairing members",
                ),
                Transition::new(
                    from,
                    ClusterPhase::Shrinking,
                    ClusterEvent::Shrink,
                    "Removing surplus members",
                ),
                Transition::new(
                    from,
                    ClusterPhase::Degraded,
                    ClusterEvent::MemberFailure,
                    "Member failing beyond grace window",
                ),
                Transition::new(
                    from,
                    ClusterPhase::Deleting,
                    ClusterEvent::DeletionRequested,
                    "Cluster deletion requested",
                ),
                Transition::new(
                    from,
                    ClusterPhase::Stable,
                    ClusterEvent::Converged,
                    "Topology matches spec and all members ready",
                ),
            ]);
        }

        transitions.extend([
            Transition::new(
                ClusterPhase::Deleting,
                ClusterPhase::Deleting,
                ClusterEvent::DeletionRequested,
                "Draining members",
            ),
            Transition::new(
                ClusterPhase::Deleting,
                ClusterPhase::Deleted,
                ClusterEvent::MembersDrained,
                "All members drained",
            ),
        ]);

        Self { transitions }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &ClusterPhase,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        // Find a matching transition
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &ClusterPhase, event: &ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &ClusterPhase) -> Vec<&ClusterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            ClusterEvent::Converged if ctx.pending_actions > 0 || !ctx.all_members_ready() => {
                Some(format!(
                    "Not converged: {} pending actions, {}/{} members ready",
                    ctx.pending_actions, ctx.ready_members, ctx.desired_instances
                ))
            }
            ClusterEvent::MemberFailure if ctx.failed_members == 0 => {
                Some("No member is failing".to_string())
            }
            ClusterEvent::MembersDrained if !ctx.drained => {
                Some("Members or router still present".to_string())
            }
            _ => None,
        }
    }
}

/// Determine the appropriate event based on context
pub fn determine_event(ctx: &TransitionContext, has_deletion_timestamp: bool) -> ClusterEvent {
    // Deletion always takes priority
    if has_deletion_timestamp {
        return if ctx.drained {
            ClusterEvent::MembersDrained
        } else {
            ClusterEvent::DeletionRequested
        };
    }
    if ctx.failed_members > 0 {
        ClusterEvent::MemberFailure
    } else if ctx.pending_removals > 0 {
        ClusterEvent::Shrink
    } else if ctx.pending_actions > 0 || !ctx.all_members_ready() {
        ClusterEvent::Grow
    } else {
        ClusterEvent::Converged
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_initializing_to_growing() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(3, 0).with_actions(3, 0);

        let result = sm.transition(&ClusterPhase::Initializing, ClusterEvent::Grow, &ctx);
        match result {
            TransitionResult::Success { from, to, .. } => {
                assert_eq!(from, ClusterPhase::Initializing);
                assert_eq!(to, ClusterPhase::Growing);
            }
            _ => panic!("Expected successful transition"),
        }
    }

    #[test]
    fn test_converged_guard() {
        let sm = ClusterStateMachine::new();
        let not_ready = TransitionContext::new(3, 2);
        assert!(matches!(
            sm.transition(&ClusterPhase::Growing, ClusterEvent::Converged, &not_ready),
            TransitionResult::GuardFailed { .. }
        ));

        let ready = TransitionContext::new(3, 3);
        assert_eq!(
            sm.transition(&ClusterPhase::Growing, ClusterEvent::Converged, &ready)
                .next_phase(ClusterPhase::Growing),
            ClusterPhase::Stable
        );
    }

    #[test]
    fn test_degraded_reachable_from_live_phases() {
        let sm = ClusterStateMachine::new();
        for phase in LIVE_PHASES {
            assert!(sm.can_transition(&phase, &ClusterEvent::MemberFailure));
            assert!(sm.can_transition(&phase, &ClusterEvent::DeletionRequested));
        }
        assert!(!sm.can_transition(&ClusterPhase::Deleting, &ClusterEvent::MemberFailure));
    }

    #[test]
    fn test_deleting_only_moves_forward() {
        let sm = ClusterStateMachine::new();
        for event in [
            ClusterEvent::Grow,
            ClusterEvent::Shrink,
            ClusterEvent::Converged,
        ] {
            assert!(!sm.can_transition(&ClusterPhase::Deleting, &event));
        }
        let drained = TransitionContext::default().with_drained(true);
        assert_eq!(
            sm.transition(&ClusterPhase::Deleting, ClusterEvent::MembersDrained, &drained)
                .next_phase(ClusterPhase::Deleting),
            ClusterPhase::Deleted
        );
        assert!(sm.valid_events(&ClusterPhase::Deleted).is_empty());
    }

    #[test]
    fn test_determine_event_priority() {
        let ctx = TransitionContext::new(3, 1)
            .with_failed(1)
            .with_actions(2, 1);
        assert_eq!(determine_event(&ctx, true), ClusterEvent::DeletionRequested);
        assert_eq!(determine_event(&ctx, false), ClusterEvent::MemberFailure);

        let shrinking = TransitionContext::new(1, 1).with_actions(2, 2);
        assert_eq!(determine_event(&shrinking, false), ClusterEvent::Shrink);

        let waiting = TransitionContext::new(3, 2);
        assert_eq!(determine_event(&waiting, false), ClusterEvent::Grow);

        let converged = TransitionContext::new(3, 3);
        assert_eq!(determine_event(&converged, false), ClusterEvent::Converged);

        let drained = TransitionContext::default().with_drained(true);
        assert_eq!(determine_event(&drained, true), ClusterEvent::MembersDrained);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(ClusterEvent::Grow.to_string(), "Grow");
        assert_eq!(ClusterEvent::MembersDrained.to_string(), "MembersDrained");
    }
}
