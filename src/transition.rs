//! The transition tree explored by the search.
//!
//! A [`Step`] bundles up to two preparatory fills with at most one combine.
//! Nodes live in a flat arena addressed by [`NodeId`]; each node records its
//! parent's index, so reconstructing a path is a loop over indices rather
//! than a walk through owning pointers. Children are computed on first
//! request and kept for the lifetime of the tree.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::trace;

use crate::evaluator::ScoringPolicy;
use crate::model::{Combine, Fill, Operation};
use crate::state::BlendState;

pub type NodeId = usize;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Step {
    pub fills: Vec<Fill>,
    pub combine: Option<Combine>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid(&'static str),
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validity::Valid)
    }
}

impl Step {
    /// The empty step recorded on the root node.
    pub fn root() -> Self {
        Self {
            fills: Vec::new(),
            combine: None,
        }
    }

    pub fn fill(fill: Fill) -> Self {
        Self {
            fills: vec![fill],
            combine: None,
        }
    }

    pub fn combine(fills: Vec<Fill>, combine: Combine) -> Self {
        Self {
            fills,
            combine: Some(combine),
        }
    }

    /// Checks the step against the state it would be applied to.
    ///
    /// A step without a combine is always valid. With a combine, every fill
    /// must target one of the combine's empty inputs, at most once, and both
    /// inputs must hold liquid once the fills are done.
    pub fn validity(&self, state: &BlendState) -> Validity {
        let Some(combine) = self.combine else {
            return Validity::Valid;
        };
        if !state.configuration().is_valid_combine(&combine) {
            return Validity::Invalid("capacities do not add up");
        }
        if state.is_occupied(combine.output) {
            return Validity::Invalid("combine output is occupied");
        }
        for (i, fill) in self.fills.iter().enumerate() {
            if !combine.inputs().contains(&fill.container) {
                return Validity::Invalid("fill does not target a combine input");
            }
            if state.is_occupied(fill.container) {
                return Validity::Invalid("fill targets an occupied container");
            }
            if self.fills[..i].iter().any(|f| f.container == fill.container) {
                return Validity::Invalid("container filled twice");
            }
        }
        let ready = |c: usize| state.is_occupied(c) || self.fills.iter().any(|f| f.container == c);
        if !combine.inputs().into_iter().all(ready) {
            return Validity::Invalid("combine input is empty");
        }
        Validity::Valid
    }

    /// Fills first, then the combine.
    pub fn operations(&self) -> impl Iterator<Item = Operation> + '_ {
        self.fills
            .iter()
            .map(|&f| Operation::Fill(f))
            .chain(self.combine.map(Operation::Combine))
    }

    pub fn apply(&self, state: &BlendState) -> BlendState {
        self.operations()
            .fold(state.clone(), |current, op| current.apply(&op))
    }

    /// Every step worth considering from `state`, already filtered to valid ones.
    ///
    /// For each combine in the catalog: no fills, one fill on either input,
    /// or one fill on each input; followed by each single fill of an empty
    /// container on its own.
    pub fn candidates(state: &BlendState) -> Vec<Step> {
        let configuration = state.configuration();
        let liquids = configuration.liquids();
        let mut steps = Vec::new();
        for &combine in configuration.combines() {
            steps.push(Step::combine(Vec::new(), combine));
            for input in combine.inputs() {
                for liquid in 0..liquids {
                    steps.push(Step::combine(vec![Fill { container: input, liquid }], combine));
                }
            }
            for liquid_a in 0..liquids {
                for liquid_b in 0..liquids {
                    steps.push(Step::combine(
                        vec![
                            Fill { container: combine.input_a, liquid: liquid_a },
                            Fill { container: combine.input_b, liquid: liquid_b },
                        ],
                        combine,
                    ));
                }
            }
        }
        steps.retain(|s| s.validity(state).is_valid());
        steps.extend(state.valid_fills().map(Step::fill));
        steps
    }
}

pub struct TransitionNode {
    id: NodeId,
    parent: Option<NodeId>,
    depth: usize,
    step: Step,
    before: Option<Arc<BlendState>>,
    after: Arc<BlendState>,
    score: f64,
    children: Option<Vec<NodeId>>,
}

impl TransitionNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Number of steps from the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    /// State the step was applied to; `None` on the root.
    pub fn before(&self) -> Option<&Arc<BlendState>> {
        self.before.as_ref()
    }

    pub fn state(&self) -> &Arc<BlendState> {
        &self.after
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn distance(&self) -> f64 {
        self.after.best_distance()
    }

    pub fn is_expanded(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> Option<&[NodeId]> {
        self.children.as_deref()
    }
}

pub struct TransitionTree {
    nodes: Vec<TransitionNode>,
    policy: Arc<dyn ScoringPolicy>,
    run_in_parallel: bool,
}

impl TransitionTree {
    pub fn new(root: BlendState, policy: Arc<dyn ScoringPolicy>) -> Self {
        let run_in_parallel = root.configuration().options().run_in_parallel;
        let score = policy.score(&root);
        let node = TransitionNode {
            id: 0,
            parent: None,
            depth: 0,
            step: Step::root(),
            before: None,
            after: Arc::new(root),
            score,
            children: None,
        };
        Self {
            nodes: vec![node],
            policy,
            run_in_parallel,
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn node(&self, id: NodeId) -> &TransitionNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TransitionNode] {
        &self.nodes
    }

    /// Children of `id`, computed on the first call and reused afterwards.
    /// An empty slice marks a dead end.
    pub fn get_or_compute_transitions(&mut self, id: NodeId) -> &[NodeId] {
        if self.nodes[id].children.is_none() {
            let children = self.expand(id);
            self.nodes[id].children = Some(children);
        }
        self.nodes[id].children.as_deref().unwrap_or(&[])
    }

    fn expand(&mut self, id: NodeId) -> Vec<NodeId> {
        let before = Arc::clone(&self.nodes[id].after);
        let depth = self.nodes[id].depth + 1;
        let steps = Step::candidates(&before);
        let policy = &self.policy;
        let build = |step: Step| {
            let after = step.apply(&before);
            let score = policy.score(&after);
            (step, after, score)
        };
        let built: Vec<(Step, BlendState, f64)> = if self.run_in_parallel {
            steps.into_par_iter().map(build).collect()
        } else {
            steps.into_iter().map(build).collect()
        };

        let mut children = Vec::with_capacity(built.len());
        for (step, after, score) in built {
            let child = self.nodes.len();
            self.nodes.push(TransitionNode {
                id: child,
                parent: Some(id),
                depth,
                step,
                before: Some(Arc::clone(&before)),
                after: Arc::new(after),
                score,
                children: None,
            });
            children.push(child);
        }
        trace!(event = "node_expanded", node = id, depth, children = children.len());
        children
    }

    /// Node ids from the root down to `id`.
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::with_capacity(self.nodes[id].depth + 1);
        let mut current = Some(id);
        while let Some(node) = current {
            path.push(node);
            current = self.nodes[node].parent;
        }
        path.reverse();
        path
    }

    /// Operations leading from the root state to the state of `id`, in order.
    pub fn operation_path(&self, id: NodeId) -> Vec<Operation> {
        self.ancestry(id)
            .into_iter()
            .flat_map(|node| self.nodes[node].step.operations().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{Composition, almost_equals};
    use crate::config::{Configuration, SearchOptions};
    use crate::evaluator::WeightedScore;

    fn root(capacities: Vec<u32>, target: Vec<f64>) -> BlendState {
        let options = SearchOptions::default().with_parallel(false);
        let config = Configuration::new(capacities, Composition::new(target), options).unwrap();
        BlendState::create(Arc::new(config))
    }

    fn tree(state: BlendState) -> TransitionTree {
        TransitionTree::new(state, Arc::new(WeightedScore::default()))
    }

    const COMBINE: Combine = Combine { input_a: 0, input_b: 1, output: 2 };

    #[test]
    fn step_without_combine_is_valid() {
        let state = root(vec![1, 1, 2], vec![0.5, 0.5]);
        assert!(Step::root().validity(&state).is_valid());
        assert!(Step::fill(Fill { container: 0, liquid: 1 }).validity(&state).is_valid());
    }

    #[test]
    fn combine_needs_both_inputs_filled() {
        let state = root(vec![1, 1, 2], vec![0.5, 0.5]);
        let bare = Step::combine(Vec::new(), COMBINE);
        assert_eq!(bare.validity(&state), Validity::Invalid("combine input is empty"));
        let half = Step::combine(vec![Fill { container: 0, liquid: 0 }], COMBINE);
        assert!(!half.validity(&state).is_valid());
        let full = Step::combine(
            vec![Fill { container: 0, liquid: 0 }, Fill { container: 1, liquid: 1 }],
            COMBINE,
        );
        assert!(full.validity(&state).is_valid());
    }

    #[test]
    fn fills_must_target_combine_inputs() {
        let state = root(vec![1, 1, 2, 1], vec![0.5, 0.5]);
        let stray = Step::combine(
            vec![Fill { container: 0, liquid: 0 }, Fill { container: 3, liquid: 1 }],
            COMBINE,
        );
        assert_eq!(
            stray.validity(&state),
            Validity::Invalid("fill does not target a combine input")
        );
    }

    #[test]
    fn fill_on_occupied_input_is_invalid() {
        let state = root(vec![1, 1, 2], vec![0.5, 0.5])
            .apply(&Operation::Fill(Fill { container: 0, liquid: 0 }));
        let refill = Step::combine(
            vec![Fill { container: 0, liquid: 1 }, Fill { container: 1, liquid: 1 }],
            COMBINE,
        );
        assert!(!refill.validity(&state).is_valid());
        let one = Step::combine(vec![Fill { container: 1, liquid: 1 }], COMBINE);
        assert!(one.validity(&state).is_valid());
    }

    #[test]
    fn children_are_computed_once() {
        let mut tree = tree(root(vec![1, 1, 2], vec![0.5, 0.5]));
        let root = tree.root();
        assert!(!tree.node(root).is_expanded());
        let first = tree.get_or_compute_transitions(root).to_vec();
        let size = tree.len();
        let second = tree.get_or_compute_transitions(root).to_vec();
        assert_eq!(first, second);
        assert_eq!(tree.len(), size);
        assert!(tree.node(root).is_expanded());
        // 4 paired-fill combines plus 6 single fills
        assert_eq!(first.len(), 4 + 6);
    }

    #[test]
    fn path_lists_fills_before_their_combine() {
        let mut tree = tree(root(vec![1, 1, 2], vec![0.5, 0.5]));
        let children = tree.get_or_compute_transitions(tree.root()).to_vec();
        let blended = children
            .iter()
            .copied()
            .find(|&c| almost_equals(tree.node(c).distance(), 0.0))
            .unwrap();
        let path = tree.operation_path(blended);
        assert_eq!(
            path,
            vec![
                Operation::Fill(Fill { container: 0, liquid: 0 }),
                Operation::Fill(Fill { container: 1, liquid: 1 }),
                Operation::Combine(COMBINE),
            ]
        );
        assert_eq!(tree.ancestry(blended), vec![0, blended]);
        assert_eq!(tree.node(blended).state().depth(), 3);
        assert_eq!(tree.node(blended).depth(), 1);
    }

    #[test]
    fn deep_path_replays_to_the_same_state() {
        let mut tree = tree(root(vec![1, 1, 2, 2, 4], vec![0.25, 0.75]));
        let mut current = tree.root();
        for _ in 0..3 {
            let children = tree.get_or_compute_transitions(current);
            let Some(&next) = children.first() else { break };
            current = next;
        }
        let start = Arc::clone(tree.node(tree.root()).state());
        let replayed = tree
            .operation_path(current)
            .iter()
            .fold((*start).clone(), |s, op| s.apply(op));
        assert_eq!(replayed.contents(), tree.node(current).state().contents());
    }

    #[test]
    fn dead_end_has_no_children() {
        let state = root(vec![1], vec![1.0]).apply(&Operation::Fill(Fill { container: 0, liquid: 0 }));
        let mut tree = tree(state);
        assert!(tree.get_or_compute_transitions(0).is_empty());
        assert!(tree.node(0).is_expanded());
    }
}
