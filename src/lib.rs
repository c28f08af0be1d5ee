//! **zonegraph** is a zone-graph model-checking library for networks of
//! timed automata with bounded integer variables.
//!
//! The crate decides reachability and Büchi liveness properties over an
//! abstract state space, the *zone graph*, in which infinite sets of
//! real-valued clock valuations are represented symbolically by
//! difference-bound matrices ([`dbm::Dbm`]).
//!
//! The main pieces are:
//!
//! - the DBM algebra ([`dbm`]) and its generalisation to multiple reference
//!   clocks ([`dbm::refdbm`]),
//! - the symbolic transition semantics of timed automata: synchronised
//!   products ([`syncprod`]), integer-variable steps ([`ta`]) and zone
//!   semantics with extrapolation ([`zg`]),
//! - subsumption-indexed exploration graphs ([`graph`]),
//! - the exploration algorithms ([`algo`]): covering reachability,
//!   Couvreur's SCC-based emptiness check, nested DFS and lasso extraction.
//!
//! Systems are described programmatically with [`system::SystemBuilder`];
//! parsing a description language is out of scope.
//!
//! ```
//! use zonegraph::algo::covreach::{CoveringReachability, Policy};
//! use zonegraph::graph::subsumption::SubsumptionGraph;
//! use zonegraph::system::SystemBuilder;
//! use zonegraph::zg::{Extrapolation, Semantics, ZoneGraph};
//! use zonegraph::{expr, stmt};
//!
//! let mut b = SystemBuilder::new("ticker");
//! let p = b.add_process("p");
//! let tick = b.add_event("tick");
//! let x = b.add_clock("x");
//! let l0 = b.add_location(p, "l0");
//! b.set_initial(l0);
//! b.add_edge(p, l0, tick, l0, expr::clock_le(x, 10), stmt::reset_clock(x, 0));
//! let system = b.build().unwrap();
//!
//! let mut zg = ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
//! let mut graph = SubsumptionGraph::for_zone_graph(&zg);
//! let stats = CoveringReachability::new(Policy::Bfs)
//!     .run(&mut zg, &mut graph, &system.label_set(&[]).unwrap());
//! assert!(!stats.reachable);
//! ```

pub mod algo;
pub mod clockbounds;
pub mod dbm;
pub mod graph;
pub mod sharing;
pub mod syncprod;
pub mod system;
pub mod ta;
pub mod ts;
pub mod vm;
pub mod waiting;
pub mod zg;

pub use system::expr;
pub use system::stmt;
pub use ts::{NodeStatus, Ts};

/// Identifier of a process in a system.
pub type ProcessId = u32;

/// Identifier of an event in a system.
pub type EventId = u32;

/// Identifier of a location, unique across all processes of a system.
pub type LocationId = u32;

/// Identifier of an edge, unique across all processes of a system.
pub type SysEdgeId = u32;

/// Identifier of a bounded integer variable.
pub type IntVarId = u32;

/// Identifier of a label.
pub type LabelId = u32;

/// Identifier of a clock.
///
/// Index `0` is the implicit reference clock with constant value `0`; the
/// clocks declared on a system are numbered from `1`.
pub type ClockId = u32;

/// The implicit reference clock.
pub const REFERENCE_CLOCK: ClockId = 0;

/// Comparison operator of a clock constraint: strict or weak upper bound.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClockCmp {
    /// Strict inequality `<`.
    Lt,
    /// Weak inequality `≤`.
    Le,
}

/// A clock constraint `x - y cmp value`.
///
/// Either side may be the [`REFERENCE_CLOCK`], which encodes absolute
/// bounds `x cmp value` and `-y cmp value`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClockConstraint {
    /// Left-hand clock.
    pub x: ClockId,
    /// Right-hand clock.
    pub y: ClockId,
    /// Comparison operator.
    pub cmp: ClockCmp,
    /// Bound value.
    pub value: i32,
}

impl ClockConstraint {
    /// Constraint `x - y cmp value`.
    pub fn new(x: ClockId, y: ClockId, cmp: ClockCmp, value: i32) -> Self {
        ClockConstraint { x, y, cmp, value }
    }

    /// Upper bound `x cmp value` on a single clock.
    pub fn upper(x: ClockId, cmp: ClockCmp, value: i32) -> Self {
        ClockConstraint { x, y: REFERENCE_CLOCK, cmp, value }
    }

    /// Lower bound `x ≥ value` (resp. `>`), encoded as `0 - x cmp -value`.
    pub fn lower(x: ClockId, cmp: ClockCmp, value: i32) -> Self {
        ClockConstraint { x: REFERENCE_CLOCK, y: x, cmp, value: -value }
    }
}

/// A clock reset `x := y + value`.
///
/// `y = REFERENCE_CLOCK` gives the point reset `x := value`; `value = 0`
/// gives the clock copy `x := y`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClockReset {
    /// Reset clock.
    pub x: ClockId,
    /// Source clock.
    pub y: ClockId,
    /// Offset.
    pub value: i32,
}

impl ClockReset {
    /// Reset `x := value`.
    pub fn to_value(x: ClockId, value: i32) -> Self {
        ClockReset { x, y: REFERENCE_CLOCK, value }
    }

    /// Reset `x := y`.
    pub fn to_clock(x: ClockId, y: ClockId) -> Self {
        ClockReset { x, y, value: 0 }
    }

    /// Reset `x := y + value`.
    pub fn to_sum(x: ClockId, y: ClockId, value: i32) -> Self {
        ClockReset { x, y, value }
    }
}

/// Errors rejected when a system or a transition system is constructed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A location, edge, event, variable or clock id is out of range.
    #[error("invalid {kind} id {id}")]
    InvalidId {
        /// Kind of entity.
        kind: &'static str,
        /// Offending id.
        id: u32,
    },
    /// A process has no initial location.
    #[error("process {0:?} has no initial location")]
    NoInitialLocation(String),
    /// A process has more than one initial location.
    #[error("process {0:?} has several initial locations")]
    SeveralInitialLocations(String),
    /// A weakly-synchronised event carries a non-trivial guard.
    #[error("weakly synchronized event {event:?} has a non-trivial guard on edge {edge}")]
    WeakSyncNonTrivialGuard {
        /// Event name.
        event: String,
        /// Offending edge id.
        edge: SysEdgeId,
    },
    /// A synchronisation refers to the same process twice.
    #[error("synchronization constrains process {0} twice")]
    DuplicateSyncProcess(ProcessId),
    /// Incompatible dimensions (bound maps, valuations, zones).
    #[error("incompatible dimension: expected {expected}, got {got}")]
    Dimension {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        got: usize,
    },
    /// A name is declared twice.
    #[error("duplicate {kind} name {name:?}")]
    DuplicateName {
        /// Kind of entity.
        kind: &'static str,
        /// Duplicated name.
        name: String,
    },
    /// An unknown name was looked up.
    #[error("unknown {kind} {name:?}")]
    UnknownName {
        /// Kind of entity.
        kind: &'static str,
        /// Name that failed to resolve.
        name: String,
    },
}

/// Arithmetic range errors of the DBM algebra.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    /// A difference bound left the representable range.
    #[error("difference bound out of range")]
    BoundOverflow,
    /// A scale factor is not positive.
    #[error("scale factor must be positive")]
    BadScaleFactor,
    /// A matrix cell is not divisible by the scale factor.
    #[error("matrix is not divisible by the scale factor")]
    NotDivisible,
    /// The scale factor itself overflowed during concretisation.
    #[error("scale factor overflow")]
    ScaleOverflow,
}
