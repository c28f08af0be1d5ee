//! Reachability witnesses end to end: covering reachability builds the
//! subsumption graph, the finite-path extractor replays it over actual
//! edges, and the witness zones concretise to rational valuations.

use zonegraph::algo::covreach::{CoveringReachability, Policy};
use zonegraph::algo::path::finite_path;
use zonegraph::graph::subsumption::SubsumptionGraph;
use zonegraph::graph::EdgeKind;
use zonegraph::system::{expr, stmt, System, SystemBuilder};
use zonegraph::ts::Ts;
use zonegraph::zg::{Extrapolation, Semantics, ZoneGraph};

/// A three-stage pipeline: l0 -> l1 -> l2, each stage gated by a clock
/// lower bound with a reset in between.
fn pipeline() -> System {
    let mut b = SystemBuilder::new("pipeline");
    let p = b.add_process("p");
    let step = b.add_event("step");
    let x = b.add_clock("x");
    let goal = b.add_label("goal");
    let l0 = b.add_location(p, "l0");
    let l1 = b.add_location(p, "l1");
    let l2 = b.add_location(p, "l2");
    b.set_initial(l0);
    b.set_location_labels(l2, &[goal]);
    b.add_edge(p, l0, step, l1, expr::clock_ge(x, 2), stmt::reset_clock(x, 0));
    b.add_edge(p, l1, step, l2, expr::clock_gt(x, 3), stmt::nop());
    b.build().unwrap()
}

#[test]
fn witness_path_replays_over_actual_edges() {
    let system = pipeline();
    let mut zg =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut graph = SubsumptionGraph::for_zone_graph(&zg);
    let goal = system.label_set(&["goal"]).unwrap();

    let stats = CoveringReachability::new(Policy::Bfs).run(&mut zg, &mut graph, &goal);
    assert!(stats.reachable);

    // The target is some stored node satisfying the labels.
    let target = graph
        .nodes()
        .find(|&n| zg.satisfies(graph.state(n), &goal))
        .expect("a goal node must be stored");

    let path = finite_path(&graph, target, |g, e| g.edge_kind(e) == EdgeKind::Actual)
        .expect("goal ancestry must be intact");
    assert_eq!(path.len(), 2);
    // The path starts at an initial node and ends at the target.
    assert!(graph.flags(graph.edge_src(path[0])).initial);
    assert_eq!(graph.edge_tgt(path[1]), target);

    // The goal zone concretises to a rational valuation inside itself.
    let mut zone = graph.state(target).zone.clone();
    let factor = zone.constrain_to_single_valuation().unwrap();
    assert!(zone.is_single_valuation());
    let mut scaled_original = graph.state(target).zone.clone();
    scaled_original.scale_up(factor).unwrap();
    let x_scaled = zone[(1, 0)].value() as i64;
    assert!(scaled_original.satisfies(&[0, x_scaled]));
}

#[test]
fn unreachable_goal_yields_no_witness() {
    let mut b = SystemBuilder::new("walled");
    let p = b.add_process("p");
    let step = b.add_event("step");
    let x = b.add_clock("x");
    let goal = b.add_label("goal");
    let l0 = b.add_location(p, "l0");
    let l1 = b.add_location(p, "l1");
    b.set_initial(l0);
    b.set_location_labels(l1, &[goal]);
    b.set_invariant(l0, expr::clock_le(x, 1));
    b.add_edge(p, l0, step, l1, expr::clock_ge(x, 5), stmt::nop());
    let system = b.build().unwrap();

    let mut zg =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut graph = SubsumptionGraph::for_zone_graph(&zg);
    let goal = system.label_set(&["goal"]).unwrap();
    let stats = CoveringReachability::new(Policy::Bfs).run(&mut zg, &mut graph, &goal);
    assert!(!stats.reachable);
    assert!(graph.nodes().all(|n| !zg.satisfies(graph.state(n), &goal)));
}
