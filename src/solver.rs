use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::composition::{EPSILON, almost_equals};
use crate::config::Configuration;
use crate::evaluator::{Evaluator, ScoringPolicy, WeightedScore, select_min};
use crate::model::Operation;
use crate::state::BlendState;
use crate::transition::{NodeId, TransitionTree};

/// Result of one search run.
#[derive(Clone)]
pub struct SearchOutcome {
    pub node: NodeId,
    pub operations: Vec<Operation>,
    pub state: Arc<BlendState>,
    pub distance: f64,
    /// What the configured [`Evaluator`] makes of `state`.
    pub evaluation: f64,
    pub score: f64,
    /// Nodes in the transition tree when the search stopped.
    pub explored: usize,
}

/// Result of [`Solver::descend`], which works on states directly rather
/// than on the transition tree.
#[derive(Clone)]
pub struct Descent {
    pub operations: Vec<Operation>,
    pub state: BlendState,
    pub distance: f64,
    pub evaluation: f64,
}

pub struct Solver {
    configuration: Arc<Configuration>,
    evaluator: Evaluator,
    tree: TransitionTree,
    considering: VecDeque<NodeId>,
}

impl Solver {
    pub fn new(configuration: Arc<Configuration>) -> Solver {
        let policy = WeightedScore::new(configuration.options().scoring);
        Self::with_policy(configuration, Arc::new(policy))
    }

    pub fn with_policy(configuration: Arc<Configuration>, policy: Arc<dyn ScoringPolicy>) -> Solver {
        let root = BlendState::create(Arc::clone(&configuration));
        let tree = TransitionTree::new(root, policy);
        Solver {
            considering: VecDeque::from([tree.root()]),
            evaluator: Evaluator::from_options(configuration.options()),
            configuration,
            tree,
        }
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.configuration
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn tree(&self) -> &TransitionTree {
        &self.tree
    }

    /// Follows the lowest scoring child from the root, never accepting a
    /// child the evaluator rates worse than the current node. Stops on an
    /// exact match, a dead end or after `max_search_iterations` steps.
    pub fn greedy(&mut self) -> SearchOutcome {
        let max_iterations = self.configuration.options().max_search_iterations;
        let mode = self.evaluator.mode();
        info!(event = "search_start", driver = "greedy", max_iterations, mode = ?mode);

        let mut current = self.tree.root();
        let mut current_value = self.evaluator.evaluate(self.tree.node(current).state());
        let mut best = current;
        for iteration in 0..max_iterations {
            if almost_equals(self.tree.node(current).distance(), 0.0) {
                break;
            }
            let children = self.tree.get_or_compute_transitions(current).to_vec();
            let states: Vec<Arc<BlendState>> = children
                .iter()
                .map(|&c| Arc::clone(self.tree.node(c).state()))
                .collect();
            let evaluator = &self.evaluator;
            let values = evaluator.score_all(&states, |s| evaluator.evaluate(s));
            let (candidates, candidate_values): (Vec<NodeId>, Vec<f64>) = children
                .into_iter()
                .zip(values)
                .filter(|&(_, value)| value <= current_value + EPSILON)
                .unzip();
            let scores: Vec<f64> = candidates.iter().map(|&c| self.tree.node(c).score()).collect();
            let Some(chosen) = select_min(&scores) else {
                debug!(event = "dead_end", iteration, node = current);
                break;
            };
            debug!(
                event = "step",
                iteration,
                node = candidates[chosen],
                candidates = candidates.len(),
                evaluation = candidate_values[chosen],
                score = scores[chosen],
            );
            current = candidates[chosen];
            current_value = candidate_values[chosen];
            if self.is_better(current, best) {
                best = current;
            }
        }
        self.finish("greedy", best)
    }

    /// Applies the single operation the evaluator rates best, one at a time,
    /// while it does not make the evaluation worse.
    pub fn descend(&self) -> Descent {
        let max_iterations = self.configuration.options().max_search_iterations;
        info!(event = "search_start", driver = "descend", max_iterations);

        let mut state = BlendState::clone(self.tree.node(self.tree.root()).state());
        let mut evaluation = self.evaluator.evaluate(&state);
        let mut operations = Vec::new();
        for iteration in 0..max_iterations {
            if almost_equals(state.best_distance(), 0.0) {
                break;
            }
            let Some((operation, value)) = self.evaluator.best_operation(&state) else {
                debug!(event = "dead_end", iteration);
                break;
            };
            if value > evaluation + EPSILON {
                debug!(event = "no_improvement", iteration, evaluation, best = value);
                break;
            }
            trace!(event = "step", iteration, operation = %operation, evaluation = value);
            state = state.apply(&operation);
            evaluation = value;
            operations.push(operation);
        }

        let distance = state.best_distance();
        info!(event = "search_end", driver = "descend", distance, evaluation, operations = operations.len());
        Descent {
            operations,
            state,
            distance,
            evaluation,
        }
    }

    /// Picks uniformly random children for up to `max_search_iterations`
    /// steps and reports the best node visited.
    pub fn random_walk(&mut self) -> SearchOutcome {
        let options = self.configuration.options();
        let max_iterations = options.max_search_iterations;
        let seed = options.random_seed.unwrap_or_else(rand::random);
        info!(event = "search_start", driver = "random", max_iterations, seed);

        let mut rng = StdRng::seed_from_u64(seed);
        let mut current = self.tree.root();
        let mut best = current;
        for _ in 0..max_iterations {
            let children = self.tree.get_or_compute_transitions(current);
            if children.is_empty() {
                break;
            }
            current = children[rng.random_range(0..children.len())];
            if self.is_better(current, best) {
                best = current;
            }
        }
        self.finish("random", best)
    }

    /// Breadth-first expansion of every node up to `max_depth` steps from the
    /// root, bounded by `max_nodes`. Stops early on an exact match.
    pub fn expand_full(&mut self) -> SearchOutcome {
        let options = self.configuration.options();
        let (max_depth, max_nodes) = (options.max_depth, options.max_nodes);
        info!(event = "search_start", driver = "full", max_depth, max_nodes);

        let mut best = self.tree.root();
        while let Some(node) = self.considering.pop_front() {
            if self.is_better(node, best) {
                best = node;
            }
            if almost_equals(self.tree.node(best).distance(), 0.0) {
                break;
            }
            if self.tree.node(node).depth() >= max_depth || self.tree.len() >= max_nodes {
                continue;
            }
            let children = self.tree.get_or_compute_transitions(node).to_vec();
            self.considering.extend(children);
        }
        self.considering.clear();
        self.considering.push_back(self.tree.root());
        self.finish("full", best)
    }

    /// Whether some sequence of at most `max_operations` valid operations
    /// produces a container exactly matching the target.
    pub fn is_exactly_reachable(&self, max_operations: usize) -> bool {
        let found = Arc::new(AtomicBool::new(false));
        let parallel = self.configuration.options().run_in_parallel;
        let root = self.tree.node(self.tree.root()).state();
        Self::recursive_is_reachable(root, max_operations, parallel, &found)
    }

    fn recursive_is_reachable(
        state: &BlendState,
        remaining: usize,
        parallel: bool,
        found: &Arc<AtomicBool>,
    ) -> bool {
        // If another branch already found a match, stop ASAP.
        if found.load(Ordering::Relaxed) {
            return true;
        }
        if almost_equals(state.best_distance(), 0.0) {
            found.store(true, Ordering::Relaxed);
            return true;
        }
        if remaining == 0 {
            return false;
        }
        let explore = |op: &Operation| {
            found.load(Ordering::Relaxed)
                || Self::recursive_is_reachable(&state.apply(op), remaining - 1, parallel, found)
        };
        let operations = state.valid_operations();
        if parallel {
            operations.par_iter().any(explore)
        } else {
            operations.iter().any(explore)
        }
    }

    /// Lower distance wins; equal distances fall back to score, then to the earlier node.
    fn is_better(&self, candidate: NodeId, incumbent: NodeId) -> bool {
        let (c, i) = (self.tree.node(candidate), self.tree.node(incumbent));
        if almost_equals(c.distance(), i.distance()) {
            c.score() < i.score()
        } else {
            c.distance() < i.distance()
        }
    }

    fn finish(&self, driver: &'static str, best: NodeId) -> SearchOutcome {
        let node = self.tree.node(best);
        let outcome = SearchOutcome {
            node: best,
            operations: self.tree.operation_path(best),
            state: Arc::clone(node.state()),
            distance: node.distance(),
            evaluation: self.evaluator.evaluate(node.state()),
            score: node.score(),
            explored: self.tree.len(),
        };
        info!(
            event = "search_end",
            driver,
            distance = outcome.distance,
            evaluation = outcome.evaluation,
            score = outcome.score,
            operations = outcome.operations.len(),
            explored = outcome.explored,
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::Composition;
    use crate::config::SearchOptions;
    use crate::evaluator::EvaluationMode;
    use crate::model::{Combine, Fill};

    fn solver(capacities: Vec<u32>, target: Vec<f64>, options: SearchOptions) -> Solver {
        let config = Configuration::new(capacities, Composition::new(target), options).unwrap();
        Solver::new(Arc::new(config))
    }

    #[test]
    fn greedy_blends_equal_parts() {
        let mut solver = solver(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default());
        let outcome = solver.greedy();
        assert!(almost_equals(outcome.distance, 0.0));
        assert_eq!(
            outcome.operations,
            vec![
                Operation::Fill(Fill { container: 0, liquid: 0 }),
                Operation::Fill(Fill { container: 1, liquid: 1 }),
                Operation::Combine(Combine { input_a: 0, input_b: 1, output: 2 }),
            ]
        );
    }

    #[test]
    fn greedy_takes_a_single_fill_when_it_suffices() {
        let mut solver = solver(vec![2, 2, 4], vec![1.0, 0.0], SearchOptions::default());
        let outcome = solver.greedy();
        assert!(almost_equals(outcome.distance, 0.0));
        assert_eq!(outcome.operations, vec![Operation::Fill(Fill { container: 0, liquid: 0 })]);
    }

    #[test]
    fn greedy_never_worsens_distance() {
        let options = SearchOptions::default().with_max_search_iterations(12);
        let mut solver = solver(vec![1, 1, 2, 2, 3, 4, 5], vec![0.2, 0.3, 0.5], options);
        let outcome = solver.greedy();
        let tree = solver.tree();
        let path = tree.ancestry(outcome.node);
        for pair in path.windows(2) {
            assert!(tree.node(pair[1]).distance() <= tree.node(pair[0]).distance() + EPSILON);
        }
    }

    #[test]
    fn greedy_with_lookahead_blends_equal_parts() {
        let options = SearchOptions::default().with_evaluation_mode(EvaluationMode::Lookahead);
        let mut solver = solver(vec![1, 1, 2], vec![0.5, 0.5], options);
        assert_eq!(solver.evaluator().mode(), EvaluationMode::Lookahead);
        let outcome = solver.greedy();
        assert!(almost_equals(outcome.distance, 0.0));
        assert!(almost_equals(outcome.evaluation, 0.0));
        assert_eq!(outcome.operations.len(), 3);
    }

    #[test]
    fn greedy_never_accepts_a_worse_evaluation() {
        let options = SearchOptions::default()
            .with_evaluation_mode(EvaluationMode::Lookahead)
            .with_max_search_iterations(6);
        let mut solver = solver(vec![1, 1, 2, 2, 3, 4], vec![0.2, 0.8], options);
        let outcome = solver.greedy();
        let tree = solver.tree();
        let evaluator = solver.evaluator();
        for pair in tree.ancestry(outcome.node).windows(2) {
            let before = evaluator.evaluate(tree.node(pair[0]).state());
            let after = evaluator.evaluate(tree.node(pair[1]).state());
            assert!(after <= before + EPSILON);
        }
    }

    #[test]
    fn descent_with_lookahead_pours_the_matching_pair() {
        let options = SearchOptions::default().with_evaluation_mode(EvaluationMode::Lookahead);
        let descent = solver(vec![1, 1, 2], vec![0.5, 0.5], options).descend();
        assert!(almost_equals(descent.distance, 0.0));
        assert_eq!(
            descent.operations,
            vec![
                Operation::Fill(Fill { container: 0, liquid: 0 }),
                Operation::Fill(Fill { container: 1, liquid: 1 }),
                Operation::Combine(Combine { input_a: 0, input_b: 1, output: 2 }),
            ]
        );
    }

    #[test]
    fn descent_without_lookahead_fills_up_and_stops() {
        let descent = solver(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default()).descend();
        assert!(descent.distance > 0.5);
        assert!(descent.state.check_capacities().is_ok());
        assert_eq!(descent.operations.len(), 3);
        assert!(descent.state.valid_operations().is_empty());
    }

    #[test]
    fn random_walk_is_reproducible_with_a_seed() {
        let options = SearchOptions::default()
            .with_random_seed(42)
            .with_max_search_iterations(8);
        let first = solver(vec![1, 1, 2, 3, 4], vec![0.25, 0.75], options.clone()).random_walk();
        let second = solver(vec![1, 1, 2, 3, 4], vec![0.25, 0.75], options).random_walk();
        assert_eq!(first.operations, second.operations);
        assert!(first.state.check_capacities().is_ok());
    }

    #[test]
    fn full_expansion_finds_a_one_step_blend() {
        let options = SearchOptions::default().with_max_depth(2);
        let mut solver = solver(vec![1, 3, 4], vec![0.25, 0.75], options);
        let outcome = solver.expand_full();
        assert!(almost_equals(outcome.distance, 0.0));
        assert_eq!(outcome.state.best_container(), Some(2));
    }

    #[test]
    fn full_expansion_respects_depth_bound() {
        let options = SearchOptions::default().with_max_depth(1);
        let mut solver = solver(vec![1, 2, 3, 6], vec![0.1, 0.2, 0.7], options);
        solver.expand_full();
        assert!(solver.tree().nodes().iter().all(|n| n.depth() <= 1));
    }

    #[test]
    fn exact_reachability_matches_search() {
        let solver = solver(vec![1, 1, 2], vec![0.5, 0.5], SearchOptions::default());
        assert!(!solver.is_exactly_reachable(2));
        assert!(solver.is_exactly_reachable(3));
    }

    #[test]
    fn sequential_reachability_agrees_with_parallel() {
        let options = SearchOptions::default().with_parallel(false);
        let sequential = solver(vec![1, 1, 2], vec![0.5, 0.5], options);
        assert!(!sequential.is_exactly_reachable(2));
        assert!(sequential.is_exactly_reachable(3));
    }
}
