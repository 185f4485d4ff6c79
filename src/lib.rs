//! Search for a sequence of fills and pours over fixed-capacity containers
//! that produces a blend of liquids as close as possible to a target
//! proportion.
//!
//! ```
//! use std::sync::Arc;
//! use blend_search::{Composition, Configuration, SearchOptions, Solver};
//!
//! let target = Composition::new(vec![0.5, 0.5]);
//! let config = Configuration::new(vec![1, 1, 2], target, SearchOptions::default()).unwrap();
//! let outcome = Solver::new(Arc::new(config)).greedy();
//! assert_eq!(outcome.operations.len(), 3);
//! ```

pub mod composition;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod solver;
pub mod state;
pub mod subset;
pub mod transition;

pub use composition::{Composition, EPSILON, almost_equals};
pub use config::{Configuration, ScoreWeights, SearchOptions, TransferModel};
pub use error::{BlendError, Result};
pub use evaluator::{EvaluationMode, Evaluator, ScoringPolicy, WeightedScore};
pub use model::{Combine, Fill, Group, Operation, Split, Transfer};
pub use solver::{Descent, SearchOutcome, Solver};
pub use state::BlendState;
pub use subset::SubsetFinder;
pub use transition::{NodeId, Step, TransitionNode, TransitionTree, Validity};
