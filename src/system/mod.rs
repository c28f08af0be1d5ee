//! The typed, compiled system consumed by the transition systems.
//!
//! A [`System`] holds processes, locations, edges, events, labels, bounded
//! integer variables, clocks and synchronisation vectors, together with
//! the cached index maps the synchroniser needs (location × event →
//! edges, asynchronous-event sets) and the compiled bytecode of every
//! invariant, guard and statement.
//!
//! Systems are constructed through [`SystemBuilder`]; parsing a
//! description language is out of scope.

pub mod expr;
pub mod stmt;

use fixedbitset::FixedBitSet;
use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;

use crate::system::expr::Expr;
use crate::system::stmt::Stmt;
use crate::vm::Instr;
use crate::{
    ClockId, ConfigError, EventId, IntVarId, LabelId, LocationId, ProcessId, SysEdgeId,
};

/// Strength of a synchronisation constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncStrength {
    /// The process must have a matching edge for the synchronisation to be
    /// enabled.
    Strong,
    /// The constraint is dropped when the process has no matching edge.
    Weak,
}

/// One constraint of a synchronisation vector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SyncConstraint {
    /// Constrained process.
    pub pid: ProcessId,
    /// Synchronised event.
    pub event: EventId,
    /// Constraint strength.
    pub strength: SyncStrength,
}

/// A synchronisation vector.
#[derive(Clone, Debug)]
pub struct Synchronization {
    constraints: Vec<SyncConstraint>,
}

impl Synchronization {
    /// The constraints of this synchronisation.
    pub fn constraints(&self) -> &[SyncConstraint] {
        &self.constraints
    }
}

/// Semantics of a synchronisation in which exactly one weak constraint
/// matches (see the enabled-synchronisation filter in
/// [`crate::syncprod::Synchronizer`]).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WeakSyncPolicy {
    /// Emit the partial match: a synchronisation is enabled as soon as all
    /// strong constraints match and at least one constraint matches.
    #[default]
    EmitPartial,
    /// Require at least two matching constraints before a synchronisation
    /// without strong constraints is emitted.
    RequireTwo,
}

/// A bounded integer variable declaration.
#[derive(Clone, Debug)]
pub struct IntVar {
    name: String,
    min: i64,
    max: i64,
    initial: i64,
}

impl IntVar {
    /// Name of the variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared minimum.
    pub fn min(&self) -> i64 {
        self.min
    }

    /// Declared maximum.
    pub fn max(&self) -> i64 {
        self.max
    }

    /// Initial value.
    pub fn initial(&self) -> i64 {
        self.initial
    }
}

/// A location of one process.
#[derive(Clone, Debug)]
pub struct Location {
    pid: ProcessId,
    name: String,
    initial: bool,
    committed: bool,
    urgent: bool,
    invariant: Expr,
    invariant_code: Vec<Instr>,
    labels: FixedBitSet,
}

impl Location {
    /// Owning process.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Location name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is the initial location of its process.
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// Whether the location is committed.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether the location is urgent.
    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// The invariant expression.
    pub fn invariant_expr(&self) -> &Expr {
        &self.invariant
    }

    /// Compiled invariant.
    pub fn invariant_code(&self) -> &[Instr] {
        &self.invariant_code
    }

    /// Labels attached to the location.
    pub fn labels(&self) -> &FixedBitSet {
        &self.labels
    }
}

/// An edge of one process.
#[derive(Clone, Debug)]
pub struct Edge {
    pid: ProcessId,
    src: LocationId,
    event: EventId,
    tgt: LocationId,
    guard: Expr,
    guard_code: Vec<Instr>,
    stmt: Stmt,
    stmt_code: Vec<Instr>,
}

impl Edge {
    /// Owning process.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Source location.
    pub fn src(&self) -> LocationId {
        self.src
    }

    /// Event of the edge.
    pub fn event(&self) -> EventId {
        self.event
    }

    /// Target location.
    pub fn tgt(&self) -> LocationId {
        self.tgt
    }

    /// The guard expression.
    pub fn guard_expr(&self) -> &Expr {
        &self.guard
    }

    /// Compiled guard.
    pub fn guard_code(&self) -> &[Instr] {
        &self.guard_code
    }

    /// The statement tree.
    pub fn stmt(&self) -> &Stmt {
        &self.stmt
    }

    /// Compiled statement.
    pub fn stmt_code(&self) -> &[Instr] {
        &self.stmt_code
    }
}

/// A built system.
#[derive(Clone, Debug)]
pub struct System {
    name: String,
    processes: IndexMap<String, ProcessId>,
    events: IndexMap<String, EventId>,
    labels: IndexMap<String, LabelId>,
    clocks: IndexMap<String, ClockId>,
    intvars: Vec<IntVar>,
    intvar_names: IndexMap<String, IntVarId>,
    locations: Vec<Location>,
    initial_locations: Vec<LocationId>,
    edges: Vec<Edge>,
    syncs: Vec<Synchronization>,
    weak_sync_policy: WeakSyncPolicy,
    // Cached index maps.
    outgoing: HashMap<(LocationId, EventId), Vec<SysEdgeId>>,
    incoming: HashMap<(LocationId, EventId), Vec<SysEdgeId>>,
    outgoing_all: Vec<Vec<SysEdgeId>>,
    async_outgoing: Vec<Vec<SysEdgeId>>,
    sync_events: HashSet<(ProcessId, EventId)>,
    intvar_bounds: Vec<(i64, i64)>,
}

impl System {
    /// Name of the system.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of processes.
    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Name of a process.
    pub fn process_name(&self, pid: ProcessId) -> &str {
        self.processes.get_index(pid as usize).map(|(n, _)| n.as_str()).unwrap_or("?")
    }

    /// Number of events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Number of declared clocks (the reference clock is not counted).
    pub fn clock_count(&self) -> usize {
        self.clocks.len()
    }

    /// Name of a clock (clocks are numbered from 1).
    pub fn clock_name(&self, x: ClockId) -> &str {
        self.clocks.get_index(x as usize - 1).map(|(n, _)| n.as_str()).unwrap_or("?")
    }

    /// Declared integer variables.
    pub fn intvars(&self) -> &[IntVar] {
        &self.intvars
    }

    /// Initial valuation of the integer variables.
    pub fn initial_intvars(&self) -> Vec<i64> {
        self.intvars.iter().map(|v| v.initial).collect()
    }

    /// Look up an integer variable by name.
    pub fn intvar_id(&self, name: &str) -> Option<IntVarId> {
        self.intvar_names.get(name).copied()
    }

    /// Number of labels.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Name of a label.
    pub fn label_name(&self, l: LabelId) -> &str {
        self.labels.get_index(l as usize).map(|(n, _)| n.as_str()).unwrap_or("?")
    }

    /// The set of labels named in `names`, as a bit set.
    pub fn label_set(&self, names: &[&str]) -> Result<FixedBitSet, ConfigError> {
        let mut set = FixedBitSet::with_capacity(self.labels.len());
        for name in names {
            let id = self.labels.get(*name).ok_or_else(|| ConfigError::UnknownName {
                kind: "label",
                name: (*name).to_owned(),
            })?;
            set.insert(*id as usize);
        }
        Ok(set)
    }

    /// Number of locations, across all processes.
    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    /// A location by id.
    pub fn location(&self, loc: LocationId) -> &Location {
        &self.locations[loc as usize]
    }

    /// Number of edges, across all processes.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// An edge by id.
    pub fn edge(&self, e: SysEdgeId) -> &Edge {
        &self.edges[e as usize]
    }

    /// The initial location of a process.
    pub fn initial_location(&self, pid: ProcessId) -> LocationId {
        self.initial_locations[pid as usize]
    }

    /// Outgoing edges of a location carrying a given event.
    pub fn outgoing_edges(&self, loc: LocationId, event: EventId) -> &[SysEdgeId] {
        self.outgoing.get(&(loc, event)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges of a location carrying a given event.
    pub fn incoming_edges(&self, loc: LocationId, event: EventId) -> &[SysEdgeId] {
        self.incoming.get(&(loc, event)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a location has an outgoing edge with a given event.
    pub fn has_outgoing_event(&self, loc: LocationId, event: EventId) -> bool {
        !self.outgoing_edges(loc, event).is_empty()
    }

    /// All outgoing edges of a location.
    pub fn outgoing_edges_all(&self, loc: LocationId) -> &[SysEdgeId] {
        &self.outgoing_all[loc as usize]
    }

    /// Outgoing edges of a location whose event is asynchronous for the
    /// owning process.
    pub fn asynchronous_outgoing_edges(&self, loc: LocationId) -> &[SysEdgeId] {
        &self.async_outgoing[loc as usize]
    }

    /// Whether an event is asynchronous for a process: it appears in no
    /// synchronisation constraint of that process.
    pub fn is_asynchronous(&self, pid: ProcessId, event: EventId) -> bool {
        !self.sync_events.contains(&(pid, event))
    }

    /// The synchronisation vectors.
    pub fn synchronizations(&self) -> &[Synchronization] {
        &self.syncs
    }

    /// Semantics of partially-matched weak synchronisations.
    pub fn weak_sync_policy(&self) -> WeakSyncPolicy {
        self.weak_sync_policy
    }

    /// Declared `(min, max)` ranges of the integer variables, in id order.
    pub fn intvar_bounds(&self) -> &[(i64, i64)] {
        &self.intvar_bounds
    }

    /// Conservative interval of the values an expression can take over the
    /// declared variable ranges. Comparison and logic operators are
    /// `{0, 1}`-valued; anything unanalysable widens to a large range.
    pub fn expr_range(&self, e: &Expr) -> (i64, i64) {
        const WIDE: (i64, i64) = (-(1 << 40), 1 << 40);
        let clamp = |v: i64| v.clamp(WIDE.0, WIDE.1);
        match e {
            Expr::Const(c) => (*c, *c),
            Expr::Var(v) => match self.intvars.get(*v as usize) {
                Some(iv) => (iv.min, iv.max),
                None => WIDE,
            },
            Expr::Local(_) => WIDE,
            Expr::Neg(inner) => {
                let (lo, hi) = self.expr_range(inner);
                (clamp(-hi), clamp(-lo))
            }
            Expr::Not(_) => (0, 1),
            Expr::Binary(op, l, r) => {
                use crate::system::expr::BinOp::*;
                let (llo, lhi) = self.expr_range(l);
                let (rlo, rhi) = self.expr_range(r);
                match op {
                    Add => (clamp(llo + rlo), clamp(lhi + rhi)),
                    Sub => (clamp(llo - rhi), clamp(lhi - rlo)),
                    Mul => {
                        let candidates =
                            [llo * rlo, llo * rhi, lhi * rlo, lhi * rhi].map(clamp);
                        (
                            candidates.iter().copied().min().unwrap(),
                            candidates.iter().copied().max().unwrap(),
                        )
                    }
                    Div | Mod => WIDE,
                    And | Or | Eq | Ne | Lt | Le | Gt | Ge => (0, 1),
                }
            }
            Expr::ClockAtom { .. } => (0, 1),
        }
    }
}

/// Fluent constructor of a [`System`].
#[derive(Debug)]
pub struct SystemBuilder {
    name: String,
    processes: IndexMap<String, ProcessId>,
    events: IndexMap<String, EventId>,
    labels: IndexMap<String, LabelId>,
    clocks: IndexMap<String, ClockId>,
    intvars: Vec<IntVar>,
    intvar_names: IndexMap<String, IntVarId>,
    locations: Vec<BuilderLocation>,
    edges: Vec<BuilderEdge>,
    syncs: Vec<Vec<SyncConstraint>>,
    weak_sync_policy: WeakSyncPolicy,
    duplicate: Option<(&'static str, String)>,
}

#[derive(Debug)]
struct BuilderLocation {
    pid: ProcessId,
    name: String,
    initial: bool,
    committed: bool,
    urgent: bool,
    invariant: Expr,
    labels: Vec<LabelId>,
}

#[derive(Debug)]
struct BuilderEdge {
    pid: ProcessId,
    src: LocationId,
    event: EventId,
    tgt: LocationId,
    guard: Expr,
    stmt: Stmt,
}

impl SystemBuilder {
    /// New, empty system.
    pub fn new(name: impl Into<String>) -> SystemBuilder {
        SystemBuilder {
            name: name.into(),
            processes: IndexMap::new(),
            events: IndexMap::new(),
            labels: IndexMap::new(),
            clocks: IndexMap::new(),
            intvars: Vec::new(),
            intvar_names: IndexMap::new(),
            locations: Vec::new(),
            edges: Vec::new(),
            syncs: Vec::new(),
            weak_sync_policy: WeakSyncPolicy::default(),
            duplicate: None,
        }
    }

    fn record_duplicate(&mut self, kind: &'static str, name: &str) {
        if self.duplicate.is_none() {
            self.duplicate = Some((kind, name.to_owned()));
        }
    }

    /// Declare a process.
    pub fn add_process(&mut self, name: impl Into<String>) -> ProcessId {
        let name = name.into();
        if self.processes.contains_key(&name) {
            self.record_duplicate("process", &name);
        }
        let id = self.processes.len() as ProcessId;
        self.processes.insert(name, id);
        id
    }

    /// Declare an event.
    pub fn add_event(&mut self, name: impl Into<String>) -> EventId {
        let name = name.into();
        if self.events.contains_key(&name) {
            self.record_duplicate("event", &name);
        }
        let id = self.events.len() as EventId;
        self.events.insert(name, id);
        id
    }

    /// Declare a label.
    pub fn add_label(&mut self, name: impl Into<String>) -> LabelId {
        let name = name.into();
        if self.labels.contains_key(&name) {
            self.record_duplicate("label", &name);
        }
        let id = self.labels.len() as LabelId;
        self.labels.insert(name, id);
        id
    }

    /// Declare a clock. Clocks are numbered from 1; 0 is the reference.
    pub fn add_clock(&mut self, name: impl Into<String>) -> ClockId {
        let name = name.into();
        if self.clocks.contains_key(&name) {
            self.record_duplicate("clock", &name);
        }
        let id = (self.clocks.len() + 1) as ClockId;
        self.clocks.insert(name, id);
        id
    }

    /// Declare a bounded integer variable.
    pub fn add_intvar(
        &mut self,
        name: impl Into<String>,
        min: i64,
        max: i64,
        initial: i64,
    ) -> IntVarId {
        let id = self.intvars.len() as IntVarId;
        let name = name.into();
        if self.intvar_names.contains_key(&name) {
            self.record_duplicate("integer variable", &name);
        }
        self.intvar_names.insert(name.clone(), id);
        self.intvars.push(IntVar { name, min, max, initial });
        id
    }

    /// Declare a location of a process.
    pub fn add_location(&mut self, pid: ProcessId, name: impl Into<String>) -> LocationId {
        let id = self.locations.len() as LocationId;
        self.locations.push(BuilderLocation {
            pid,
            name: name.into(),
            initial: false,
            committed: false,
            urgent: false,
            invariant: expr::tt(),
            labels: Vec::new(),
        });
        id
    }

    /// Mark a location as the initial location of its process.
    pub fn set_initial(&mut self, loc: LocationId) {
        self.locations[loc as usize].initial = true;
    }

    /// Mark a location as committed.
    pub fn set_committed(&mut self, loc: LocationId) {
        self.locations[loc as usize].committed = true;
    }

    /// Mark a location as urgent.
    pub fn set_urgent(&mut self, loc: LocationId) {
        self.locations[loc as usize].urgent = true;
    }

    /// Set the invariant of a location.
    pub fn set_invariant(&mut self, loc: LocationId, invariant: Expr) {
        self.locations[loc as usize].invariant = invariant;
    }

    /// Attach labels to a location.
    pub fn set_location_labels(&mut self, loc: LocationId, labels: &[LabelId]) {
        self.locations[loc as usize].labels.extend_from_slice(labels);
    }

    /// Declare an edge of a process.
    pub fn add_edge(
        &mut self,
        pid: ProcessId,
        src: LocationId,
        event: EventId,
        tgt: LocationId,
        guard: Expr,
        stmt: Stmt,
    ) -> SysEdgeId {
        let id = self.edges.len() as SysEdgeId;
        self.edges.push(BuilderEdge { pid, src, event, tgt, guard, stmt });
        id
    }

    /// Declare a synchronisation vector.
    pub fn add_sync(&mut self, constraints: Vec<SyncConstraint>) {
        self.syncs.push(constraints);
    }

    /// Select the semantics of partially-matched weak synchronisations.
    pub fn set_weak_sync_policy(&mut self, policy: WeakSyncPolicy) {
        self.weak_sync_policy = policy;
    }

    /// Validate the declarations and compile all expressions.
    pub fn build(self) -> Result<System, ConfigError> {
        if let Some((kind, name)) = self.duplicate {
            return Err(ConfigError::DuplicateName { kind, name });
        }
        let nprocs = self.processes.len() as u32;
        let nlocs = self.locations.len() as u32;
        let nevents = self.events.len() as u32;
        let nclocks = self.clocks.len() as u32;

        // One initial location per process.
        let mut initial_locations = vec![u32::MAX; nprocs as usize];
        for (id, loc) in self.locations.iter().enumerate() {
            if loc.pid >= nprocs {
                return Err(ConfigError::InvalidId { kind: "process", id: loc.pid });
            }
            if loc.initial {
                let slot = &mut initial_locations[loc.pid as usize];
                if *slot != u32::MAX {
                    return Err(ConfigError::SeveralInitialLocations(
                        self.processes.get_index(loc.pid as usize).unwrap().0.clone(),
                    ));
                }
                *slot = id as LocationId;
            }
        }
        for (pid, slot) in initial_locations.iter().enumerate() {
            if *slot == u32::MAX {
                return Err(ConfigError::NoInitialLocation(
                    self.processes.get_index(pid).unwrap().0.clone(),
                ));
            }
        }

        // Edge endpoint and event validation.
        for e in &self.edges {
            if e.src >= nlocs || e.tgt >= nlocs {
                return Err(ConfigError::InvalidId { kind: "location", id: e.src.max(e.tgt) });
            }
            if e.event >= nevents {
                return Err(ConfigError::InvalidId { kind: "event", id: e.event });
            }
            if self.locations[e.src as usize].pid != e.pid
                || self.locations[e.tgt as usize].pid != e.pid
            {
                return Err(ConfigError::InvalidId { kind: "edge process", id: e.pid });
            }
            let mut bad_clock = None;
            e.guard.for_each_clock_atom(&mut |x, y, _, _| {
                if x > nclocks || y > nclocks {
                    bad_clock = Some(x.max(y));
                }
            });
            e.stmt.for_each_clock_reset(&mut |x, y, _| {
                if x == 0 || x > nclocks || y.is_some_and(|y| y == 0 || y > nclocks) {
                    bad_clock = Some(x);
                }
            });
            if let Some(id) = bad_clock {
                return Err(ConfigError::InvalidId { kind: "clock", id });
            }
        }

        // Synchronisation validation, and the synchronised-event index.
        let mut sync_events: HashSet<(ProcessId, EventId)> = HashSet::new();
        let mut syncs = Vec::with_capacity(self.syncs.len());
        for constraints in self.syncs {
            let mut seen = HashSet::new();
            for c in &constraints {
                if c.pid >= nprocs {
                    return Err(ConfigError::InvalidId { kind: "process", id: c.pid });
                }
                if c.event >= nevents {
                    return Err(ConfigError::InvalidId { kind: "event", id: c.event });
                }
                if !seen.insert(c.pid) {
                    return Err(ConfigError::DuplicateSyncProcess(c.pid));
                }
                sync_events.insert((c.pid, c.event));
                // A weakly synchronised event must have trivial guards on
                // every edge: dropping its constraint from a
                // synchronisation must not drop a needed restriction.
                if c.strength == SyncStrength::Weak {
                    for (eid, e) in self.edges.iter().enumerate() {
                        if e.pid == c.pid
                            && e.event == c.event
                            && !e.guard.is_trivially_true()
                        {
                            return Err(ConfigError::WeakSyncNonTrivialGuard {
                                event: self
                                    .events
                                    .get_index(c.event as usize)
                                    .unwrap()
                                    .0
                                    .clone(),
                                edge: eid as SysEdgeId,
                            });
                        }
                    }
                }
            }
            syncs.push(Synchronization { constraints });
        }

        let intvar_bounds: Vec<(i64, i64)> =
            self.intvars.iter().map(|v| (v.min, v.max)).collect();

        // Compile locations and edges.
        let mut locations = Vec::with_capacity(self.locations.len());
        for loc in self.locations {
            let mut labels = FixedBitSet::with_capacity(self.labels.len());
            for l in &loc.labels {
                labels.insert(*l as usize);
            }
            let invariant_code = loc.invariant.compile_program()?;
            locations.push(Location {
                pid: loc.pid,
                name: loc.name,
                initial: loc.initial,
                committed: loc.committed,
                urgent: loc.urgent,
                invariant: loc.invariant,
                invariant_code,
                labels,
            });
        }

        let mut edges = Vec::with_capacity(self.edges.len());
        let mut outgoing: HashMap<(LocationId, EventId), Vec<SysEdgeId>> = HashMap::new();
        let mut incoming: HashMap<(LocationId, EventId), Vec<SysEdgeId>> = HashMap::new();
        let mut outgoing_all = vec![Vec::new(); nlocs as usize];
        let mut async_outgoing = vec![Vec::new(); nlocs as usize];
        for (id, e) in self.edges.into_iter().enumerate() {
            let id = id as SysEdgeId;
            outgoing.entry((e.src, e.event)).or_default().push(id);
            incoming.entry((e.tgt, e.event)).or_default().push(id);
            outgoing_all[e.src as usize].push(id);
            if !sync_events.contains(&(e.pid, e.event)) {
                async_outgoing[e.src as usize].push(id);
            }
            let guard_code = e.guard.compile_program()?;
            let stmt_code = e.stmt.compile_program(&intvar_bounds)?;
            edges.push(Edge {
                pid: e.pid,
                src: e.src,
                event: e.event,
                tgt: e.tgt,
                guard: e.guard,
                guard_code,
                stmt: e.stmt,
                stmt_code,
            });
        }

        Ok(System {
            name: self.name,
            processes: self.processes,
            events: self.events,
            labels: self.labels,
            clocks: self.clocks,
            intvars: self.intvars,
            intvar_names: self.intvar_names,
            locations,
            initial_locations,
            edges,
            syncs,
            weak_sync_policy: self.weak_sync_policy,
            outgoing,
            incoming,
            outgoing_all,
            async_outgoing,
            sync_events,
            intvar_bounds,
        })
    }
}
