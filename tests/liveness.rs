//! Büchi emptiness end to end: the guarded self-loop scenario checked
//! with both liveness cores, and lasso extraction of the witness.

use zonegraph::algo::couvscc::{GeneralizedCouvreur, SingleCouvreur};
use zonegraph::algo::ndfs::NestedDfs;
use zonegraph::algo::path::{finite_path, LassoExtraction};
use zonegraph::graph::reachability::ReachabilityGraph;
use zonegraph::system::{expr, stmt, System, SystemBuilder};
use zonegraph::zg::{Extrapolation, Semantics, ZoneGraph};

/// One process, one clock, a single location with a guarded, resetting
/// self-loop; the location carries the `acc` label iff `labelled`.
fn self_loop_system(labelled: bool) -> System {
    let mut b = SystemBuilder::new("self-loop");
    let p = b.add_process("p");
    let tick = b.add_event("tick");
    let x = b.add_clock("x");
    let acc = b.add_label("acc");
    let l0 = b.add_location(p, "l0");
    b.set_initial(l0);
    if labelled {
        b.set_location_labels(l0, &[acc]);
    }
    b.add_edge(p, l0, tick, l0, expr::clock_le(x, 10), stmt::reset_clock(x, 0));
    b.build().unwrap()
}

#[test]
fn couvreur_reports_the_labelled_cycle() {
    let system = self_loop_system(true);
    let mut zg =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut graph = ReachabilityGraph::new();
    let labels = system.label_set(&["acc"]).unwrap();
    let stats = GeneralizedCouvreur::new().run(&mut zg, &mut graph, &labels);
    assert!(stats.cycle);
    assert!(stats.visited_states >= 1);
}

#[test]
fn couvreur_rejects_without_the_label() {
    let system = self_loop_system(false);
    let mut zg =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut graph = ReachabilityGraph::new();
    let labels = system.label_set(&["acc"]).unwrap();
    let stats = GeneralizedCouvreur::new().run(&mut zg, &mut graph, &labels);
    assert!(!stats.cycle);
}

#[test]
fn single_buchi_variant_agrees() {
    for labelled in [true, false] {
        let system = self_loop_system(labelled);
        let mut zg =
            ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
        let mut graph = ReachabilityGraph::new();
        let labels = system.label_set(&["acc"]).unwrap();
        let stats = SingleCouvreur::new().run(&mut zg, &mut graph, &labels);
        assert_eq!(stats.cycle, labelled);
    }
}

#[test]
fn ndfs_lasso_is_the_self_loop() {
    let system = self_loop_system(true);
    let mut zg =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut graph = ReachabilityGraph::new();
    let labels = system.label_set(&["acc"]).unwrap();

    let stats = NestedDfs::new().run(&mut zg, &mut graph, &labels);
    assert!(stats.cycle);

    let lasso = LassoExtraction::run(
        &graph,
        |g, n| g.flags(n).initial,
        |g, n| g.flags(n).is_final,
        |_, _| true,
    );
    assert_eq!(lasso.prefix.len(), 0);
    assert_eq!(lasso.cycle.len(), 1);
    let e = lasso.cycle[0];
    assert_eq!(graph.edge_src(e), graph.edge_tgt(e));
    // The single edge is the tick self-loop.
    let vedge = &graph.transition(e).vedge;
    assert_eq!(vedge.iter().count(), 1);
}

#[test]
fn ndfs_agrees_with_couvreur_on_a_two_state_lasso() {
    // l0 -> l1 with a loop on l1; the label sits on l1.
    let mut b = SystemBuilder::new("two-state");
    let p = b.add_process("p");
    let go = b.add_event("go");
    let spin = b.add_event("spin");
    let x = b.add_clock("x");
    let acc = b.add_label("acc");
    let l0 = b.add_location(p, "l0");
    let l1 = b.add_location(p, "l1");
    b.set_initial(l0);
    b.set_location_labels(l1, &[acc]);
    b.add_edge(p, l0, go, l1, expr::clock_ge(x, 1), stmt::nop());
    b.add_edge(p, l1, spin, l1, expr::clock_le(x, 5), stmt::reset_clock(x, 0));
    let system = b.build().unwrap();
    let labels = system.label_set(&["acc"]).unwrap();

    let mut zg1 =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut g1 = ReachabilityGraph::new();
    let ndfs_stats = NestedDfs::new().run(&mut zg1, &mut g1, &labels);

    let mut zg2 =
        ZoneGraph::new(&system, Semantics::Elapsed, Extrapolation::LuPlusLocal).unwrap();
    let mut g2 = ReachabilityGraph::new();
    let couv_stats = GeneralizedCouvreur::new().run(&mut zg2, &mut g2, &labels);

    assert!(ndfs_stats.cycle);
    assert!(couv_stats.cycle);

    let lasso = LassoExtraction::run(
        &g1,
        |g, n| g.flags(n).initial,
        |g, n| g.flags(n).is_final,
        |_, _| true,
    );
    assert!(!lasso.is_empty());
    assert!(!lasso.prefix.is_empty());
    // The prefix connects an initial node to the loop root.
    let first = g1.edge_src(lasso.prefix[0]);
    assert!(g1.flags(first).initial);
    let root = g1.edge_tgt(*lasso.prefix.last().unwrap());
    assert_eq!(g1.edge_src(lasso.cycle[0]), root);
    assert_eq!(g1.edge_tgt(*lasso.cycle.last().unwrap()), root);

    // The loop root is reachable through actual edges of the same graph.
    let path = finite_path(&g1, root, |_, _| true).unwrap();
    assert!(!path.is_empty());
    assert_eq!(g1.edge_tgt(*path.last().unwrap()), root);
}
