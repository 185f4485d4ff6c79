//! Scoring of states and selection among sibling candidates.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ScoreWeights, SearchOptions, TransferModel};
use crate::model::{Operation, Transfer};
use crate::state::BlendState;

/// Ranks a state for the search; lower is better.
pub trait ScoringPolicy: Send + Sync {
    fn score(&self, state: &BlendState) -> f64;
}

/// Weighted sum of the best container's distance to target, the number of
/// operations taken and the number of liquids in the best container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedScore {
    weights: ScoreWeights,
}

impl WeightedScore {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }
}

impl Default for WeightedScore {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl ScoringPolicy for WeightedScore {
    fn score(&self, state: &BlendState) -> f64 {
        let used = state.best_mix().map_or(0, |m| m.used_liquids());
        self.weights.distance * state.best_distance()
            + self.weights.depth * state.depth() as f64
            + self.weights.liquids * used as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Distance of the best occupied container.
    #[default]
    Containers,

    /// Distance of the best mix already present or reachable by one more pour.
    Lookahead,
}

pub struct Evaluator {
    mode: EvaluationMode,
    run_in_parallel: bool,
}

impl Evaluator {
    pub fn new(mode: EvaluationMode, run_in_parallel: bool) -> Self {
        Self {
            mode,
            run_in_parallel,
        }
    }

    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn from_options(options: &SearchOptions) -> Self {
        Self::new(options.evaluation_mode, options.run_in_parallel)
    }

    /// Lower is closer to the target.
    ///
    /// Lookahead never rates a state worse than its best container, so a
    /// state that already matches stays at zero whatever it can pour next.
    pub fn evaluate(&self, state: &BlendState) -> f64 {
        match self.mode {
            EvaluationMode::Containers => state.best_distance(),
            EvaluationMode::Lookahead => {
                let pours = match state.configuration().options().transfer_model {
                    TransferModel::Pairwise => state
                        .valid_combines()
                        .map(|c| {
                            let a = state.content(c.input_a);
                            let b = state.content(c.input_b);
                            match (a, b) {
                                (Some(a), Some(b)) => state.target_distance(&(a + b)),
                                _ => f64::MAX,
                            }
                        })
                        .fold(f64::MAX, f64::min),
                    TransferModel::Group => state
                        .valid_transfers()
                        .iter()
                        .map(|t| state.target_distance(&state.mix_of(&t.inputs)))
                        .fold(f64::MAX, f64::min),
                };
                pours.min(state.best_distance())
            }
        }
    }

    pub fn evaluate_operation(&self, state: &BlendState, operation: &Operation) -> f64 {
        self.evaluate(&state.apply(operation))
    }

    /// Scores every candidate, in parallel when enabled; output order matches input order.
    pub fn score_all<T, F>(&self, candidates: &[T], score: F) -> Vec<f64>
    where
        T: Sync,
        F: Fn(&T) -> f64 + Sync + Send,
    {
        if self.run_in_parallel {
            candidates.par_iter().map(&score).collect()
        } else {
            candidates.iter().map(&score).collect()
        }
    }

    /// The valid group transfer whose result evaluates best.
    pub fn best_transfer(&self, state: &BlendState) -> Option<(Transfer, f64)> {
        let transfers = state.valid_transfers();
        let scores = self.score_all(transfers, |t| {
            self.evaluate_operation(state, &Operation::MultiTransfer(t.clone()))
        });
        select_min(&scores).map(|i| (transfers[i].clone(), scores[i]))
    }

    /// The valid operation whose result evaluates best.
    pub fn best_operation(&self, state: &BlendState) -> Option<(Operation, f64)> {
        let operations = state.valid_operations();
        let scores = self.score_all(&operations, |op| self.evaluate_operation(state, op));
        select_min(&scores).map(|i| (operations[i].clone(), scores[i]))
    }
}

/// Index of the smallest score. Ties go to the earliest index and NaN never wins,
/// so the choice does not depend on evaluation order.
pub fn select_min(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some(b) if scores[b] <= score => {}
            _ => best = Some(i),
        }
    }
    best
}
