use core::fmt::Debug;
use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::time::Instant;

use fxhash::{FxHashMap, FxHashSet};

// A single node in the search graph
// G is global (read only) context shared by every state, M is the move that leads between states
pub trait State<G, M>: Clone + Eq + Hash {
    // Successor states in exploration order, None if this is a dead end
    fn next_states(&self, global: &G) -> Option<Vec<(M, Self)>>
    where
        Self: Sized;

    fn is_valid(&self, global: &G) -> bool;
    fn is_solved(&self, global: &G) -> bool;

    fn stringify(&self, global: &G) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    BreadthFirst,
    #[default]
    DepthFirst,
}

#[derive(Debug)]
pub struct Solver<G, S, M>
where
    S: State<G, M>,
{
    global_state: G,
    initial_state: S,
    to_check: VecDeque<S>,
    seen: FxHashSet<S>,
    parents: FxHashMap<S, (S, M)>,
    solution: Option<S>,
    search_mode: SearchMode,
    states_checked: usize,
    time_spent: f32,
}

impl<G, S, M> Solver<G, S, M>
where
    S: State<G, M>,
{
    pub fn new(global_state: G, initial_state: S) -> Solver<G, S, M> {
        let mut seen = FxHashSet::default();
        seen.insert(initial_state.clone());

        Solver {
            global_state,
            to_check: VecDeque::from([initial_state.clone()]),
            initial_state,
            seen,
            parents: FxHashMap::default(),
            solution: None,
            search_mode: SearchMode::default(),
            states_checked: 0,
            time_spent: 0 as f32,
        }
    }

    pub fn set_mode(&mut self, new_mode: SearchMode) -> &mut Self {
        self.search_mode = new_mode;
        self
    }

    // Number of states popped off the frontier and expanded
    pub fn states_checked(&self) -> usize {
        self.states_checked
    }

    // Number of distinct states discovered so far (including the initial state)
    pub fn states_seen(&self) -> usize {
        self.seen.len()
    }

    pub fn time_spent(&self) -> f32 {
        self.time_spent
    }

    pub fn get_solution(&self) -> Option<S> {
        self.solution.clone()
    }

    pub fn stringify(&self, state: &S) -> String {
        state.stringify(&self.global_state)
    }

    // Run the search to completion
    // Returns every state from the initial state to the first solved one (both inclusive),
    // or None if the reachable states ran out first
    pub fn solve(&mut self) -> Option<Vec<S>>
    where
        S: Debug,
    {
        for _ in self.by_ref() {}

        let solution = self.solution.clone()?;
        self.states(&solution)
    }

    // Follow the predecessor links from `state` back to the initial state
    // Returns the states in start to goal order, or None if `state` was never reached
    pub fn states(&self, state: &S) -> Option<Vec<S>> {
        let mut states = vec![state.clone()];
        let mut current = state;

        while *current != self.initial_state {
            let (parent, _) = self.parents.get(current)?;
            states.push(parent.clone());
            current = parent;
        }

        states.reverse();
        Some(states)
    }

    // The moves that lead from the initial state to `state`
    pub fn path(&self, state: &S) -> Option<Vec<M>>
    where
        M: Clone,
    {
        let mut path = Vec::new();
        let mut current = state;

        while *current != self.initial_state {
            let (parent, step) = self.parents.get(current)?;
            path.push(step.clone());
            current = parent;
        }

        path.reverse();
        Some(path)
    }
}

impl<G, S, M> fmt::Display for Solver<G, S, M>
where
    S: State<G, M>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Solver<{:?}, checked: {}, seen: {}, queue: {}, time: {:.3}s>",
            self.search_mode,
            self.states_checked,
            self.seen.len(),
            self.to_check.len(),
            self.time_spent,
        )
    }
}

// Each call expands a single state and returns it
// Iteration stops once a solution has been found or there is nothing left to check
impl<G, S, M> Iterator for Solver<G, S, M>
where
    S: State<G, M> + Debug,
{
    type Item = S;

    fn next(&mut self) -> Option<Self::Item> {
        if self.solution.is_some() {
            return None;
        }

        let start = Instant::now();

        let current_state = match self.search_mode {
            SearchMode::BreadthFirst => self.to_check.pop_front(),
            SearchMode::DepthFirst => self.to_check.pop_back(),
        };
        let Some(current_state) = current_state else {
            self.time_spent += start.elapsed().as_secs_f32();
            return None;
        };
        self.states_checked += 1;

        if self.states_checked % 1000 == 0 {
            tracing::debug!(
                "iter: {}, queue: {}, seen: {}, time: {}",
                self.states_checked,
                self.to_check.len(),
                self.seen.len(),
                self.time_spent
            );
        }

        // Found a solution, stop here so the path can be rebuilt
        if current_state.is_solved(&self.global_state) {
            self.solution = Some(current_state.clone());
            self.time_spent += start.elapsed().as_secs_f32();
            return Some(current_state);
        }

        // Otherwise queue up anything we haven't seen before
        // A state is only ever queued once, its parent is whichever state found it first
        if let Some(next_states) = current_state.next_states(&self.global_state) {
            for (step, next_state) in next_states {
                if self.seen.contains(&next_state) {
                    continue;
                }
                if !next_state.is_valid(&self.global_state) {
                    continue;
                }

                self.seen.insert(next_state.clone());
                self.parents
                    .insert(next_state.clone(), (current_state.clone(), step));
                self.to_check.push_back(next_state);
            }
        }

        self.time_spent += start.elapsed().as_secs_f32();
        Some(current_state)
    }
}
