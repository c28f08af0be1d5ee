//! Discrete step semantics of timed automata: integer-variable updates
//! and the collection of clock constraints and resets along a transition.
//!
//! The order of operations is load-bearing for soundness: source
//! invariants are checked on the pre-state, guards on the pre-state after
//! the location update, statements then update the variables, and target
//! invariants are checked on the post-state.

use fixedbitset::FixedBitSet;

use crate::syncprod::{Synchronizer, Vedge, Vloc};
use crate::system::System;
use crate::ts::NodeStatus;
use crate::vm::{ClockSinks, Vm, VmError};
use crate::{ClockConstraint, ClockReset};

/// Clock-constraint and clock-reset containers filled by one step.
///
/// The containers are reused across transitions and cleared by the
/// caller; the step functions only append.
#[derive(Debug, Default)]
pub struct StepContainers {
    /// Clock part of the source-location invariants.
    pub src_invariant: Vec<ClockConstraint>,
    /// Clock part of the edge guards.
    pub guard: Vec<ClockConstraint>,
    /// Clock resets of the edge statements.
    pub resets: Vec<ClockReset>,
    /// Clock part of the target-location invariants.
    pub tgt_invariant: Vec<ClockConstraint>,
}

impl StepContainers {
    /// Empty containers.
    pub fn new() -> StepContainers {
        StepContainers::default()
    }

    /// Clear all four containers.
    pub fn clear(&mut self) {
        self.src_invariant.clear();
        self.guard.clear();
        self.resets.clear();
        self.tgt_invariant.clear();
    }
}

/// Whether time may elapse in a tuple of locations: no location is
/// committed or urgent.
pub fn delay_allowed(system: &System, vloc: &Vloc) -> bool {
    vloc.iter().all(|&l| {
        let loc = system.location(l);
        !loc.is_committed() && !loc.is_urgent()
    })
}

/// Union of the labels of the locations of a tuple.
pub fn labels(system: &System, vloc: &Vloc) -> FixedBitSet {
    let mut set = FixedBitSet::with_capacity(system.label_count());
    for &l in vloc.iter() {
        set.union_with(system.location(l).labels());
    }
    set
}

/// Evaluate a predicate program (guard or invariant): `1` means the
/// integer part holds, clock constraints go to `constraints`.
fn check_predicate(
    vm: &mut Vm,
    code: &[crate::vm::Instr],
    intvars: &mut [i64],
    constraints: &mut Vec<ClockConstraint>,
) -> Result<bool, VmError> {
    let mut sinks = ClockSinks { constraints: Some(constraints), resets: None };
    Ok(vm.run(code, intvars, &mut sinks)? != 0)
}

/// Execute a statement program: integer updates apply to `intvars`, clock
/// resets go to `resets`.
fn run_statement(
    vm: &mut Vm,
    code: &[crate::vm::Instr],
    intvars: &mut [i64],
    resets: &mut Vec<ClockReset>,
) -> Result<bool, VmError> {
    let mut sinks = ClockSinks { constraints: None, resets: Some(resets) };
    Ok(vm.run(code, intvars, &mut sinks)? != 0)
}

/// A predicate failure is a per-transition condition; a malformed program
/// is a construction bug and aborts.
fn predicate_status(err: VmError, failure: NodeStatus) -> NodeStatus {
    match err {
        VmError::OutOfBounds { .. }
        | VmError::DivisionByZero
        | VmError::Overflow => failure,
        other => panic!("invariant/guard/statement bytecode failed structurally: {other}"),
    }
}

/// Compute the initial `(vloc, intvars)` pair.
///
/// The source-invariant clock constraints of the initial locations are
/// appended to `containers.src_invariant`.
pub fn initial(
    system: &System,
    vm: &mut Vm,
    containers: &mut StepContainers,
) -> (NodeStatus, Vloc, Vec<i64>) {
    let vloc = Vloc::initial(system);
    let mut intvars = system.initial_intvars();
    for &l in vloc.iter() {
        match check_predicate(
            vm,
            system.location(l).invariant_code(),
            &mut intvars,
            &mut containers.src_invariant,
        ) {
            Ok(true) => {}
            Ok(false) => return (NodeStatus::IntvarsSrcInvariantViolated, vloc, intvars),
            Err(e) => {
                return (
                    predicate_status(e, NodeStatus::IntvarsSrcInvariantViolated),
                    vloc,
                    intvars,
                )
            }
        }
    }
    (NodeStatus::Ok, vloc, intvars)
}

/// Compute the `(vloc, intvars)` successor through a vedge.
///
/// On success the four containers have been extended with the clock
/// constraints and resets of the step, in evaluation order:
/// source invariants, guards, resets, target invariants.
pub fn next(
    system: &System,
    vm: &mut Vm,
    vloc: &Vloc,
    intvars: &[i64],
    vedge: &Vedge,
    containers: &mut StepContainers,
) -> (NodeStatus, Option<(Vloc, Vec<i64>)>) {
    let mut intvars: Vec<i64> = intvars.to_vec();

    // 1. Source invariants on the pre-state.
    for &l in vloc.iter() {
        match check_predicate(
            vm,
            system.location(l).invariant_code(),
            &mut intvars,
            &mut containers.src_invariant,
        ) {
            Ok(true) => {}
            Ok(false) => return (NodeStatus::IntvarsSrcInvariantViolated, None),
            Err(e) => {
                return (predicate_status(e, NodeStatus::IntvarsSrcInvariantViolated), None)
            }
        }
    }

    // 2. Location update.
    let next_vloc = match Synchronizer::new(system).next(vloc, vedge) {
        Some(v) => v,
        None => return (NodeStatus::IncompatibleEdge, None),
    };

    // 3. Guards of every edge of the vedge.
    for (_, e) in vedge.iter() {
        match check_predicate(
            vm,
            system.edge(e).guard_code(),
            &mut intvars,
            &mut containers.guard,
        ) {
            Ok(true) => {}
            Ok(false) => return (NodeStatus::IntvarsGuardViolated, None),
            Err(e) => return (predicate_status(e, NodeStatus::IntvarsGuardViolated), None),
        }
    }

    // 4. Statements, in vedge order.
    for (_, e) in vedge.iter() {
        match run_statement(vm, system.edge(e).stmt_code(), &mut intvars, &mut containers.resets)
        {
            Ok(true) => {}
            Ok(false) => return (NodeStatus::IntvarsStatementFailed, None),
            Err(e) => return (predicate_status(e, NodeStatus::IntvarsStatementFailed), None),
        }
    }

    // 5. Target invariants on the post-state.
    for &l in next_vloc.iter() {
        match check_predicate(
            vm,
            system.location(l).invariant_code(),
            &mut intvars,
            &mut containers.tgt_invariant,
        ) {
            Ok(true) => {}
            Ok(false) => return (NodeStatus::IntvarsTgtInvariantViolated, None),
            Err(e) => {
                return (predicate_status(e, NodeStatus::IntvarsTgtInvariantViolated), None)
            }
        }
    }

    (NodeStatus::Ok, Some((next_vloc, intvars)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{expr, stmt, SystemBuilder};

    fn counter_system() -> System {
        let mut b = SystemBuilder::new("count");
        let p = b.add_process("p");
        let up = b.add_event("up");
        let x = b.add_clock("x");
        let n = b.add_intvar("n", 0, 2, 0);
        let l0 = b.add_location(p, "l0");
        b.set_initial(l0);
        b.set_invariant(l0, expr::clock_le(x, 10));
        b.add_edge(
            p,
            l0,
            up,
            l0,
            expr::lt(expr::var(n), expr::int(2)),
            stmt::seq(vec![
                stmt::assign(n, expr::add(expr::var(n), expr::int(1))),
                stmt::reset_clock(x, 0),
            ]),
        );
        b.build().unwrap()
    }

    #[test]
    fn initial_collects_invariant_constraints() {
        let system = counter_system();
        let mut vm = Vm::new(system.clock_count());
        let mut containers = StepContainers::new();
        let (status, vloc, intvars) = initial(&system, &mut vm, &mut containers);
        assert_eq!(status, NodeStatus::Ok);
        assert_eq!(*vloc.iter().next().unwrap(), 0);
        assert_eq!(intvars, vec![0]);
        assert_eq!(containers.src_invariant.len(), 1);
    }

    #[test]
    fn next_updates_intvars_and_collects_resets() {
        let system = counter_system();
        let mut vm = Vm::new(system.clock_count());
        let mut containers = StepContainers::new();
        let (_, vloc, intvars) = initial(&system, &mut vm, &mut containers);

        let vedge = crate::syncprod::Vedge::asynchronous(1, 0, 0);
        containers.clear();
        let (status, result) = next(&system, &mut vm, &vloc, &intvars, &vedge, &mut containers);
        assert_eq!(status, NodeStatus::Ok);
        let (vloc2, intvars2) = result.unwrap();
        assert_eq!(intvars2, vec![1]);
        assert_eq!(containers.resets, vec![ClockReset::to_value(1, 0)]);
        // Source and target invariants of the self-loop both collected.
        assert_eq!(containers.src_invariant.len(), 1);
        assert_eq!(containers.tgt_invariant.len(), 1);

        // Guard blocks at n = 2.
        containers.clear();
        let (status, _) = next(&system, &mut vm, &vloc2, &[2], &vedge, &mut containers);
        assert_eq!(status, NodeStatus::IntvarsGuardViolated);
    }

    #[test]
    fn urgent_location_forbids_delay() {
        let mut b = SystemBuilder::new("urgent");
        let p = b.add_process("p");
        let l0 = b.add_location(p, "l0");
        b.set_initial(l0);
        b.set_urgent(l0);
        let system = b.build().unwrap();
        assert!(!delay_allowed(&system, &Vloc::initial(&system)));
    }
}
