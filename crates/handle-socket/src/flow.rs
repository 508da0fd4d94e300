//! Freeze/thaw flow control for a handle socket.
//!
//! Reads happen on a worker thread as blocking calls, so once one is in
//! flight it cannot be called back. After a pause request the socket may
//! therefore receive one more chunk before the engine stops reading. The
//! four states below absorb that chunk and release it later.
//!
//! # Transitions
//!
//! | State    | Event     | Next     | Action                |
//! |----------|-----------|----------|-----------------------|
//! | Unfrozen | Pause     | Freezing | -                     |
//! | Unfrozen | Data      | Unfrozen | deliver               |
//! | Freezing | Resume    | Unfrozen | buffer must be empty  |
//! | Freezing | Data      | Frozen   | buffer, pause engine  |
//! | Frozen   | Resume    | Thawing  | schedule drain step   |
//! | Thawing  | Pause     | Frozen   | -                     |
//! | Thawing  | DrainStep | Thawing  | deliver oldest chunk  |
//! | Thawing  | Drained   | Unfrozen | resume engine reads   |
//!
//! Every other pair leaves the state alone and does nothing, except data
//! arriving while `Frozen` or `Thawing`: the engine has been told to stop
//! reading by then, so that is reported as a violation.
//!
//! [`transition`] is pure; the socket owns the buffer and performs the
//! returned [`FlowAction`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a socket stands in the pause/resume protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeState {
    /// Reading as normal; chunks go straight to the consumer.
    #[default]
    Unfrozen,
    /// Pause requested, but a read may still be in flight.
    Freezing,
    /// A chunk has been buffered and the engine has been throttled.
    Frozen,
    /// Resumed; buffered chunks are being released one step at a time.
    Thawing,
}

impl FreezeState {
    /// Whether the consumer currently considers the socket paused.
    #[must_use]
    pub const fn is_paused(self) -> bool {
        matches!(self, Self::Freezing | Self::Frozen)
    }

    /// Whether the engine has been told to stop issuing reads.
    #[must_use]
    pub const fn engine_throttled(self) -> bool {
        matches!(self, Self::Frozen | Self::Thawing)
    }
}

impl fmt::Display for FreezeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unfrozen => write!(f, "unfrozen"),
            Self::Freezing => write!(f, "freezing"),
            Self::Frozen => write!(f, "frozen"),
            Self::Thawing => write!(f, "thawing"),
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEvent {
    /// The consumer asked the socket to stop delivering.
    Pause,
    /// The consumer asked the socket to deliver again.
    Resume,
    /// A non-empty chunk arrived from the engine.
    Data,
    /// A previously scheduled drain step is running.
    DrainStep,
    /// A drain step found the pending buffer empty.
    Drained,
}

/// What the socket must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAction {
    /// Nothing.
    None,
    /// Hand the arriving chunk straight to the consumer.
    Deliver,
    /// Append the arriving chunk to the pending buffer and tell the engine
    /// to stop reading.
    BufferAndThrottle,
    /// Queue a drain step on the coordinating context.
    ScheduleDrain,
    /// Deliver the oldest pending chunk.
    DeliverPending,
    /// Let the engine read again.
    Unthrottle,
    /// The pending buffer must be empty at this point.
    AssertDrained,
    /// The event is impossible in this state; a precondition broke elsewhere.
    Violation(&'static str),
}

/// Result of [`transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: FreezeState,
    pub action: FlowAction,
}

impl Transition {
    const fn to(next: FreezeState, action: FlowAction) -> Self {
        Self { next, action }
    }

    const fn stay(state: FreezeState) -> Self {
        Self::to(state, FlowAction::None)
    }
}

/// Compute the next state and the action for `event` in `state`.
#[must_use]
pub const fn transition(state: FreezeState, event: FlowEvent) -> Transition {
    use FlowAction as A;
    use FlowEvent as E;
    use FreezeState as S;

    match (state, event) {
        (S::Unfrozen, E::Pause) => Transition::to(S::Freezing, A::None),
        (S::Unfrozen, E::Data) => Transition::to(S::Unfrozen, A::Deliver),

        (S::Freezing, E::Resume) => Transition::to(S::Unfrozen, A::AssertDrained),
        (S::Freezing, E::Data) => Transition::to(S::Frozen, A::BufferAndThrottle),

        (S::Frozen, E::Resume) => Transition::to(S::Thawing, A::ScheduleDrain),
        (S::Frozen | S::Thawing, E::Data) => Transition::to(
            state,
            A::Violation("data arrived after the engine was throttled"),
        ),

        (S::Thawing, E::Pause) => Transition::to(S::Frozen, A::None),
        (S::Thawing, E::DrainStep) => Transition::to(S::Thawing, A::DeliverPending),
        (S::Thawing, E::Drained) => Transition::to(S::Unfrozen, A::Unthrottle),

        // Pause while already pausing/paused, resume while running, and drain
        // steps that lost a race with a state change.
        _ => Transition::stay(state),
    }
}
