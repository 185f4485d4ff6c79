//! Problem configuration and search options.
//!
//! A [`Configuration`] is built once per problem from the container
//! capacities, the target composition and the [`SearchOptions`]. Everything
//! the search asks repeatedly (valid combines, splits, fills and container
//! groups) is precomputed here.
//!
//! Options can be written in TOML:
//!
//! ```
//! use blend_search::SearchOptions;
//!
//! let options = SearchOptions::from_toml_str(r#"
//!     max_containers_per_transfer = 3
//!     run_in_parallel = false
//!     transfer_model = "group"
//!
//!     [scoring]
//!     depth = 0.01
//! "#).unwrap();
//!
//! assert_eq!(options.max_containers_per_transfer, 3);
//! assert!(!options.run_in_parallel);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::composition::{Composition, almost_equals};
use crate::error::{BlendError, Result};
use crate::evaluator::EvaluationMode;
use crate::model::{Combine, Fill, Group, Split};
use crate::subset::SubsetFinder;

/// Which family of pouring operations the search may use besides fills.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferModel {
    /// Two containers into one (and the unused one into two).
    #[default]
    Pairwise,

    /// Any group of occupied containers into any group of empty ones of equal volume.
    Group,
}

/// Weights of the ranking score; see [`crate::evaluator::WeightedScore`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub distance: f64,
    pub depth: f64,
    pub liquids: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            distance: 1.0,
            depth: 1e-3,
            liquids: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SearchOptions {
    /// Upper bound on the containers on either side of a group transfer.
    pub max_containers_per_transfer: usize,

    /// Evaluate sibling candidates on the rayon pool.
    pub run_in_parallel: bool,

    /// Start with the first K containers holding the K pure liquids.
    pub prefill_liquids: bool,

    pub transfer_model: TransferModel,

    /// How the drivers judge whether a step brings the blend closer.
    pub evaluation_mode: EvaluationMode,

    /// Steps taken by the greedy and random drivers before giving up.
    pub max_search_iterations: usize,

    /// Depth bound of the full expansion driver.
    pub max_depth: usize,

    /// Node bound of the full expansion driver.
    pub max_nodes: usize,

    /// Seed for the random walk driver; entropy-seeded when absent.
    pub random_seed: Option<u64>,

    pub scoring: ScoreWeights,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_containers_per_transfer: 4,
            run_in_parallel: true,
            prefill_liquids: false,
            transfer_model: TransferModel::Pairwise,
            evaluation_mode: EvaluationMode::Containers,
            max_search_iterations: 1000,
            max_depth: 6,
            max_nodes: 200_000,
            random_seed: None,
            scoring: ScoreWeights::default(),
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let options: SearchOptions = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn with_max_containers_per_transfer(mut self, max: usize) -> Self {
        self.max_containers_per_transfer = max;
        self
    }

    pub fn with_parallel(mut self, run_in_parallel: bool) -> Self {
        self.run_in_parallel = run_in_parallel;
        self
    }

    pub fn with_prefilled_liquids(mut self, prefill: bool) -> Self {
        self.prefill_liquids = prefill;
        self
    }

    pub fn with_transfer_model(mut self, model: TransferModel) -> Self {
        self.transfer_model = model;
        self
    }

    pub fn with_evaluation_mode(mut self, mode: EvaluationMode) -> Self {
        self.evaluation_mode = mode;
        self
    }

    pub fn with_max_search_iterations(mut self, iterations: usize) -> Self {
        self.max_search_iterations = iterations;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    pub fn with_scoring(mut self, scoring: ScoreWeights) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_containers_per_transfer == 0 {
            return Err(BlendError::Config(
                "max_containers_per_transfer must be at least 1".to_string(),
            ));
        }
        let w = &self.scoring;
        if [w.distance, w.depth, w.liquids].iter().any(|x| !x.is_finite()) {
            return Err(BlendError::Config("score weights must be finite".to_string()));
        }
        Ok(())
    }
}

/// Immutable description of one blending problem.
pub struct Configuration {
    capacities: Vec<u32>,
    target: Composition,
    options: SearchOptions,
    combines: Vec<Combine>,
    splits: Vec<Split>,
    fills: Vec<Fill>,
    groups: Vec<Group>,
    subset_finder: SubsetFinder,
}

impl Configuration {
    pub fn new(capacities: Vec<u32>, target: Composition, options: SearchOptions) -> Result<Self> {
        options.validate()?;
        if target.is_empty() {
            return Err(BlendError::EmptyTarget);
        }
        if target.values().iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(BlendError::InvalidTarget(format!(
                "quantities must be finite and nonnegative, got {target}"
            )));
        }
        if almost_equals(target.sum(), 0.0) {
            return Err(BlendError::InvalidTarget(format!(
                "at least one quantity must be positive, got {target}"
            )));
        }
        if capacities.len() < target.len() {
            return Err(BlendError::TooFewContainers {
                containers: capacities.len(),
                liquids: target.len(),
            });
        }
        if let Some(container) = capacities.iter().position(|&c| c == 0) {
            return Err(BlendError::ZeroCapacity { container });
        }

        let combines = compute_combines(&capacities);
        let splits = compute_splits(&capacities);
        let fills = compute_fills(capacities.len(), target.len());
        let mut groups = Vec::new();
        compute_groups(
            &capacities,
            &Group::new(0, Vec::new()),
            options.max_containers_per_transfer,
            &mut groups,
        );

        debug!(
            event = "configuration_built",
            containers = capacities.len(),
            liquids = target.len(),
            combines = combines.len(),
            splits = splits.len(),
            fills = fills.len(),
            groups = groups.len(),
        );

        let subset_finder = SubsetFinder::new(capacities.clone());
        Ok(Self {
            capacities,
            target,
            options,
            combines,
            splits,
            fills,
            groups,
            subset_finder,
        })
    }

    pub fn capacities(&self) -> &[u32] {
        &self.capacities
    }

    pub fn capacity(&self, container: usize) -> u32 {
        self.capacities[container]
    }

    pub fn containers(&self) -> usize {
        self.capacities.len()
    }

    pub fn liquids(&self) -> usize {
        self.target.len()
    }

    /// Sum of all capacities.
    pub fn volume(&self) -> u32 {
        self.capacities.iter().sum()
    }

    pub fn target(&self) -> &Composition {
        &self.target
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    pub fn combines(&self) -> &[Combine] {
        &self.combines
    }

    pub fn splits(&self) -> &[Split] {
        &self.splits
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn subset_finder(&self) -> &SubsetFinder {
        &self.subset_finder
    }

    pub fn is_valid_combine(&self, combine: &Combine) -> bool {
        let Combine { input_a, input_b, output } = *combine;
        self.contains_all(&[input_a, input_b, output])
            && input_a != input_b
            && input_a != output
            && input_b != output
            && self.capacities[output] == self.capacities[input_a] + self.capacities[input_b]
    }

    pub fn is_valid_split(&self, split: &Split) -> bool {
        let Split { input, output_a, output_b } = *split;
        self.contains_all(&[input, output_a, output_b])
            && input != output_a
            && input != output_b
            && output_a != output_b
            && self.capacities[input] == self.capacities[output_a] + self.capacities[output_b]
    }

    /// Whether every index names a container of this problem.
    pub fn contains_all(&self, containers: &[usize]) -> bool {
        containers.iter().all(|&c| c < self.capacities.len())
    }

    /// Distance of a mix's proportions from the target's, ignoring quantity.
    pub fn target_distance(&self, mix: Option<&Composition>) -> f64 {
        self.target.distance_of_normals(mix)
    }
}

// O(n^3) over containers, run once per configuration.
fn compute_combines(capacities: &[u32]) -> Vec<Combine> {
    let n = capacities.len();
    let mut combines = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            for k in 0..n {
                if k != i && k != j && capacities[k] == capacities[i] + capacities[j] {
                    combines.push(Combine { input_a: i, input_b: j, output: k });
                }
            }
        }
    }
    combines
}

fn compute_splits(capacities: &[u32]) -> Vec<Split> {
    let n = capacities.len();
    let mut splits = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            for k in 0..n {
                if k != i && k != j && capacities[k] == capacities[i] + capacities[j] {
                    splits.push(Split { input: k, output_a: i, output_b: j });
                }
            }
        }
    }
    splits
}

fn compute_fills(containers: usize, liquids: usize) -> Vec<Fill> {
    (0..containers)
        .flat_map(|container| (0..liquids).map(move |liquid| Fill { container, liquid }))
        .collect()
}

/// Appends every ascending extension of `parent` up to `remaining` more containers.
fn compute_groups(capacities: &[u32], parent: &Group, remaining: usize, out: &mut Vec<Group>) {
    if remaining == 0 {
        return;
    }
    let start = parent.last().map_or(0, |last| last + 1);
    for i in start..capacities.len() {
        let child = parent.extended(i, capacities[i]);
        out.push(child.clone());
        compute_groups(capacities, &child, remaining - 1, out);
    }
}
