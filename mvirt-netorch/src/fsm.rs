//! Network and NIC state machines.
//!
//! Transitions are total: every (state, event) pair yields either the next
//! state or a rejection. A rejection leaves the record untouched; callers
//! decide on a fallback state themselves.

use std::fmt::Debug;

use crate::error::OrchestratorError;
use crate::model::{NetworkEvent, NetworkState, NicEvent, NicState};

/// A state type driven by an event table.
pub trait StateMachine: Copy + Debug {
    type Event: Copy + Debug;

    /// Next state, or None if the table has no entry.
    fn next(self, event: Self::Event) -> Option<Self>;
}

/// Outcome of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S, E> {
    Transitioned(S),
    Rejected { from: S, event: E },
}

impl<S: Debug, E: Debug> Transition<S, E> {
    /// Map a rejection to `NoTransition`.
    pub fn into_result(self) -> Result<S, OrchestratorError> {
        match self {
            Transition::Transitioned(state) => Ok(state),
            Transition::Rejected { from, event } => Err(OrchestratorError::NoTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            }),
        }
    }

    pub fn is_transitioned(&self) -> bool {
        matches!(self, Transition::Transitioned(_))
    }
}

pub fn transition<S: StateMachine>(from: S, event: S::Event) -> Transition<S, S::Event> {
    match from.next(event) {
        Some(state) => Transition::Transitioned(state),
        None => Transition::Rejected { from, event },
    }
}

impl StateMachine for NetworkState {
    type Event = NetworkEvent;

    fn next(self, event: NetworkEvent) -> Option<NetworkState> {
        use NetworkEvent::*;
        use NetworkState::*;

        match (self, event) {
            (Allocated, ImplementNetwork) => Some(Implementing),
            (Implementing, OperationSucceeded) => Some(Implemented),
            (Implementing, OperationFailed) => Some(Shutdown),
            (Implemented, DestroyNetwork) => Some(Shutdown),
            (Shutdown, OperationSucceeded) => Some(Allocated),
            (Shutdown, OperationFailed) => Some(Implemented),
            (Allocated, DestroyNetwork) | (Setup, DestroyNetwork) => Some(Destroy),
            _ => None,
        }
    }
}

impl StateMachine for NicState {
    type Event = NicEvent;

    fn next(self, event: NicEvent) -> Option<NicState> {
        use NicEvent::*;
        use NicState::*;

        match (self, event) {
            (Allocated, ReservationRequested) => Some(Reserving),
            (Reserving, OperationSucceeded) => Some(Reserved),
            (Reserving, OperationFailed) => Some(Allocated),
            (Reserved, ReleaseRequested) | (Reserving, ReleaseRequested) => Some(Releasing),
            (Releasing, OperationSucceeded) => Some(Allocated),
            (Releasing, OperationFailed) => Some(Reserved),
            (Allocated | Reserved | Reserving | Releasing, DeallocateRequested) => {
                Some(Deallocating)
            }
            _ => None,
        }
    }
}
