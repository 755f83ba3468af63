//! Operation lifecycle transition tables.
//!
//! Each machine is a static `(state, event) -> state` edge list plus the pure
//! [`transition`] function. Side effects (lock handling, persistence writes)
//! live with the caller and never inside the tables.
//!
//! ```text
//! durable:     pending --take--> in_progress --complete--> completed
//!                                  |      ^
//!                              pause      resume
//!                                  v      |
//!                                   paused
//!
//! inspection:  pending --approve--> approved
//!              pending --reject---> rejected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::types::{ItemId, OperationKind};

/// A closed state machine described entirely by its edge set.
pub trait TransitionTable {
    type State: Copy + Eq + fmt::Display + 'static;
    type Event: Copy + Eq + fmt::Display + 'static;

    /// Every legal edge. Anything absent is illegal.
    fn edges() -> &'static [(Self::State, Self::Event, Self::State)];

    /// A state with no outgoing edge.
    fn is_terminal(state: Self::State) -> bool {
        !Self::edges().iter().any(|(from, _, _)| *from == state)
    }
}

/// Rejected transition, before item context is attached.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("state {state} is terminal")]
    Terminal { state: String },

    #[error("no {event} edge from {from}")]
    Invalid { from: String, event: String },
}

impl TransitionError {
    /// Attaches item and operation context.
    #[must_use]
    pub fn into_error(self, item_id: &ItemId, operation: OperationKind) -> Error {
        match self {
            Self::Terminal { state } => Error::AlreadyCompleted {
                item_id: item_id.clone(),
                operation,
                state,
            },
            Self::Invalid { from, event } => Error::InvalidTransition {
                item_id: item_id.clone(),
                operation,
                from,
                event,
            },
        }
    }
}

/// Looks up the edge for `(state, event)`.
///
/// # Errors
///
/// `Terminal` if `state` has no outgoing edges, `Invalid` if it has some but
/// none labelled `event`.
pub fn transition<T: TransitionTable>(
    state: T::State,
    event: T::Event,
) -> Result<T::State, TransitionError> {
    if T::is_terminal(state) {
        return Err(TransitionError::Terminal {
            state: state.to_string(),
        });
    }
    T::edges()
        .iter()
        .find(|(from, on, _)| *from == state && *on == event)
        .map(|(_, _, to)| *to)
        .ok_or_else(|| TransitionError::Invalid {
            from: state.to_string(),
            event: event.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Durable operations (assembly, welding)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableState {
    #[default]
    Pending,
    InProgress,
    Paused,
    Completed,
}

impl fmt::Display for DurableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableEvent {
    /// Acquires the occupation lock.
    Take,
    /// Releases the lock, keeping partial progress.
    Pause,
    /// Re-acquires the lock.
    Resume,
    /// Releases the lock and stamps completion.
    Complete,
}

impl fmt::Display for DurableEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Take => "take",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
        })
    }
}

pub struct DurableMachine;

const DURABLE_EDGES: &[(DurableState, DurableEvent, DurableState)] = &[
    (DurableState::Pending, DurableEvent::Take, DurableState::InProgress),
    (DurableState::InProgress, DurableEvent::Pause, DurableState::Paused),
    (DurableState::Paused, DurableEvent::Resume, DurableState::InProgress),
    (DurableState::InProgress, DurableEvent::Complete, DurableState::Completed),
];

impl TransitionTable for DurableMachine {
    type State = DurableState;
    type Event = DurableEvent;

    fn edges() -> &'static [(DurableState, DurableEvent, DurableState)] {
        DURABLE_EDGES
    }
}

// ---------------------------------------------------------------------------
// Instant binary inspection
// ---------------------------------------------------------------------------

/// Both outcomes are terminal; re-inspection only happens through a separate
/// repair cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionState {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for InspectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionEvent {
    Approve,
    Reject,
}

impl fmt::Display for InspectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        })
    }
}

pub struct InspectionMachine;

const INSPECTION_EDGES: &[(InspectionState, InspectionEvent, InspectionState)] = &[
    (InspectionState::Pending, InspectionEvent::Approve, InspectionState::Approved),
    (InspectionState::Pending, InspectionEvent::Reject, InspectionState::Rejected),
];

impl TransitionTable for InspectionMachine {
    type State = InspectionState;
    type Event = InspectionEvent;

    fn edges() -> &'static [(InspectionState, InspectionEvent, InspectionState)] {
        INSPECTION_EDGES
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn durable_happy_path() {
        let s = transition::<DurableMachine>(DurableState::Pending, DurableEvent::Take).unwrap();
        assert_eq!(s, DurableState::InProgress);
        let s = transition::<DurableMachine>(s, DurableEvent::Pause).unwrap();
        assert_eq!(s, DurableState::Paused);
        let s = transition::<DurableMachine>(s, DurableEvent::Resume).unwrap();
        assert_eq!(s, DurableState::InProgress);
        let s = transition::<DurableMachine>(s, DurableEvent::Complete).unwrap();
        assert_eq!(s, DurableState::Completed);
    }

    #[test]
    fn complete_from_paused_is_invalid() {
        let err = transition::<DurableMachine>(DurableState::Paused, DurableEvent::Complete)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                from: "paused".into(),
                event: "complete".into()
            }
        );
    }

    #[test]
    fn terminal_states_are_derived_from_edges() {
        assert!(DurableMachine::is_terminal(DurableState::Completed));
        assert!(!DurableMachine::is_terminal(DurableState::Paused));
        assert!(InspectionMachine::is_terminal(InspectionState::Approved));
        assert!(InspectionMachine::is_terminal(InspectionState::Rejected));
        assert!(!InspectionMachine::is_terminal(InspectionState::Pending));
    }

    #[test]
    fn rejected_inspection_cannot_be_reinspected() {
        let err = transition::<InspectionMachine>(InspectionState::Rejected, InspectionEvent::Approve)
            .unwrap_err();
        assert!(matches!(err, TransitionError::Terminal { .. }));
    }

    #[test]
    fn errors_gain_item_context() {
        let id = ItemId::new("X");
        let err = TransitionError::Terminal {
            state: "completed".into(),
        }
        .into_error(&id, OperationKind::Assembly);
        assert!(matches!(err, Error::AlreadyCompleted { .. }));

        let err = TransitionError::Invalid {
            from: "paused".into(),
            event: "complete".into(),
        }
        .into_error(&id, OperationKind::Welding);
        assert!(matches!(
            err,
            Error::InvalidTransition { operation: OperationKind::Welding, .. }
        ));
    }

    fn durable_event() -> impl Strategy<Value = DurableEvent> {
        prop_oneof![
            Just(DurableEvent::Take),
            Just(DurableEvent::Pause),
            Just(DurableEvent::Resume),
            Just(DurableEvent::Complete),
        ]
    }

    fn inspection_event() -> impl Strategy<Value = InspectionEvent> {
        prop_oneof![Just(InspectionEvent::Approve), Just(InspectionEvent::Reject)]
    }

    proptest! {
        #[test]
        fn durable_never_leaves_completed(events in prop::collection::vec(durable_event(), 0..32)) {
            let mut state = DurableState::Pending;
            for event in events {
                let was_terminal = DurableMachine::is_terminal(state);
                match transition::<DurableMachine>(state, event) {
                    Ok(next) => {
                        prop_assert!(!was_terminal);
                        prop_assert!(DURABLE_EDGES.contains(&(state, event, next)));
                        state = next;
                    }
                    Err(TransitionError::Terminal { .. }) => prop_assert!(was_terminal),
                    Err(TransitionError::Invalid { .. }) => prop_assert!(!was_terminal),
                }
            }
        }

        #[test]
        fn inspection_takes_at_most_one_step(events in prop::collection::vec(inspection_event(), 1..8)) {
            let mut state = InspectionState::Pending;
            let mut moved = 0;
            for event in events {
                if let Ok(next) = transition::<InspectionMachine>(state, event) {
                    state = next;
                    moved += 1;
                }
            }
            prop_assert_eq!(moved, 1);
            prop_assert!(InspectionMachine::is_terminal(state));
        }
    }
}
