//! Exploration algorithms over a transition system and a graph: covering
//! reachability, Couvreur's SCC-based emptiness check, nested DFS,
//! witness-path extraction and an interactive simulation driver.
//!
//! Every algorithm borrows its transition system and graph, returns a
//! [`Stats`] record, and polls an optional stop flag between node
//! expansions; when the flag is observed the run returns its partial
//! statistics and the graph built so far.

pub mod couvscc;
pub mod covreach;
pub mod ndfs;
pub mod path;
pub mod simulate;

use std::time::{Duration, SystemTime};

/// Statistics of one algorithm run.
#[derive(Clone, Debug)]
pub struct Stats {
    /// Wall-clock time at the start of the run.
    pub start_time: SystemTime,
    /// Wall-clock time at the end of the run.
    pub end_time: SystemTime,
    /// Number of states popped and examined.
    pub visited_states: usize,
    /// Number of transitions examined.
    pub visited_transitions: usize,
    /// Number of nodes stored in the graph at the end of the run.
    pub stored_states: usize,
    /// Number of states discarded or evicted by covering.
    pub covered_states: usize,
    /// Whether a state satisfying the target labels was reached.
    pub reachable: bool,
    /// Whether an accepting cycle was found.
    pub cycle: bool,
}

impl Stats {
    pub(crate) fn begin() -> Stats {
        let now = SystemTime::now();
        Stats {
            start_time: now,
            end_time: now,
            visited_states: 0,
            visited_transitions: 0,
            stored_states: 0,
            covered_states: 0,
            reachable: false,
            cycle: false,
        }
    }

    pub(crate) fn finish(&mut self) {
        self.end_time = SystemTime::now();
    }

    /// Duration of the run.
    pub fn running_time(&self) -> Duration {
        self.end_time.duration_since(self.start_time).unwrap_or(Duration::ZERO)
    }
}
