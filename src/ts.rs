//! The transition-system interface consumed by the exploration
//! algorithms.
//!
//! A transition system enumerates symbolic states lazily: `initial` and
//! `next` push `(status, state, transition)` triples into a caller-owned
//! container. Algorithms process the [`NodeStatus::Ok`] triples and
//! silently discard the rest; non-`Ok` statuses never abort a run.

use fixedbitset::FixedBitSet;

/// Per-transition status of a symbolic step.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// The step succeeded.
    Ok,
    /// The source locations of the vedge do not match the current tuple.
    IncompatibleEdge,
    /// The integer part of a source-location invariant is violated.
    IntvarsSrcInvariantViolated,
    /// The integer part of an edge guard is violated.
    IntvarsGuardViolated,
    /// A statement failed (out-of-bounds assignment, division by zero).
    IntvarsStatementFailed,
    /// The integer part of a target-location invariant is violated.
    IntvarsTgtInvariantViolated,
    /// The zone became empty in the source invariant.
    ClocksSrcInvariantViolated,
    /// The zone became empty in the guard.
    ClocksGuardViolated,
    /// The zone became empty in the target invariant.
    ClocksTgtInvariantViolated,
    /// The zone became empty elsewhere.
    ClocksEmptyZone,
}

impl NodeStatus {
    /// Whether this status is [`NodeStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == NodeStatus::Ok
    }
}

/// A lazily-enumerated transition system.
///
/// Implementations push successor triples into the supplied vector and
/// never clear it: containers reused across transitions are cleared by the
/// caller.
pub trait Ts {
    /// Type of symbolic states.
    type State: Clone;

    /// Type of transitions between states.
    type Transition: Clone;

    /// Push the initial `(status, state, transition)` triples.
    fn initial(&mut self, out: &mut Vec<(NodeStatus, Self::State, Self::Transition)>);

    /// Push the successor triples of `state`.
    fn next(
        &mut self,
        state: &Self::State,
        out: &mut Vec<(NodeStatus, Self::State, Self::Transition)>,
    );

    /// The labels of a state.
    fn labels(&self, state: &Self::State) -> FixedBitSet;

    /// Whether a state satisfies a non-empty set of accepting labels.
    fn satisfies(&self, state: &Self::State, labels: &FixedBitSet) -> bool {
        labels.count_ones(..) > 0 && labels.is_subset(&self.labels(state))
    }
}
