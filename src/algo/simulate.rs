//! Interactive simulation driver: step-by-step exploration of a
//! transition system, recording the explored subgraph as a multigraph.
//!
//! The driver works on any [`Ts`]; it applies no covering, so every step
//! appends a fresh node even when a state is revisited, which keeps the
//! recorded run shaped like the run itself.

use rand::Rng;

use crate::graph::reachability::Multigraph;
use crate::graph::NodeIndex;
use crate::ts::Ts;

/// A step-by-step driver over a transition system.
pub struct Simulator<'a, TS: Ts> {
    ts: &'a mut TS,
    graph: Multigraph<TS::State, TS::Transition>,
    current: Option<NodeIndex>,
    pending: Vec<(TS::State, TS::Transition)>,
}

impl<'a, TS: Ts> Simulator<'a, TS> {
    /// Driver over `ts`, positioned nowhere; call [`Simulator::restart`]
    /// to enter an initial state.
    pub fn new(ts: &'a mut TS) -> Simulator<'a, TS> {
        Simulator { ts, graph: Multigraph::new(), current: None, pending: Vec::new() }
    }

    /// Enter the first initial state, recording it.
    ///
    /// # Returns
    /// The current node, or `None` when the system has no initial state.
    pub fn restart(&mut self) -> Option<NodeIndex> {
        let mut triples = Vec::new();
        self.ts.initial(&mut triples);
        let (_, state, _) =
            triples.into_iter().find(|(status, _, _)| status.is_ok())?;
        let node = self.graph.add_node(state);
        self.graph.flags_mut(node).initial = true;
        self.current = Some(node);
        self.refresh_pending();
        Some(node)
    }

    /// The current node, if positioned.
    pub fn current(&self) -> Option<NodeIndex> {
        self.current
    }

    /// The states enabled from the current node, in enumeration order.
    pub fn enabled(&self) -> &[(TS::State, TS::Transition)] {
        &self.pending
    }

    /// Take the `choice`-th enabled step.
    ///
    /// # Returns
    /// The new current node, or `None` when `choice` is out of range or
    /// the driver is not positioned.
    pub fn step(&mut self, choice: usize) -> Option<NodeIndex> {
        let current = self.current?;
        if choice >= self.pending.len() {
            return None;
        }
        let (state, transition) = self.pending[choice].clone();
        let node = self.graph.add_node(state);
        self.graph.add_edge(current, node, transition);
        self.current = Some(node);
        self.refresh_pending();
        Some(node)
    }

    /// Take a uniformly random enabled step.
    pub fn step_random<R: Rng>(&mut self, rng: &mut R) -> Option<NodeIndex> {
        if self.pending.is_empty() {
            return None;
        }
        let choice = rng.gen_range(0..self.pending.len());
        self.step(choice)
    }

    /// Take up to `steps` random steps; stops early in a deadlock.
    ///
    /// # Returns
    /// The number of steps taken.
    pub fn run_random<R: Rng>(&mut self, steps: usize, rng: &mut R) -> usize {
        let mut taken = 0;
        while taken < steps && self.step_random(rng).is_some() {
            taken += 1;
        }
        taken
    }

    /// The recorded exploration graph.
    pub fn graph(&self) -> &Multigraph<TS::State, TS::Transition> {
        &self.graph
    }

    /// The state of a recorded node.
    pub fn state(&self, n: NodeIndex) -> &TS::State {
        self.graph.state(n)
    }

    fn refresh_pending(&mut self) {
        self.pending.clear();
        let Some(current) = self.current else { return };
        let mut triples = Vec::new();
        self.ts.next(self.graph.state(current), &mut triples);
        self.pending.extend(
            triples
                .into_iter()
                .filter(|(status, _, _)| status.is_ok())
                .map(|(_, state, transition)| (state, transition)),
        );
    }
}
