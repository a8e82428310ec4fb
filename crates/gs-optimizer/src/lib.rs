//! # gs-optimizer
//!
//! Exhaustive cross-validated hyperparameter search for GridSweep.
//!
//! Provides parameter grid expansion (including nested option bundles),
//! cross-validation splitters, scheduling of one trial per (combination,
//! split) pair on a pluggable executor, and aggregation of the raw trial
//! outcomes into per-measure statistics, rankings and best-combination
//! selection.

mod aggregate;
mod cv;
mod executor;
mod grid;
mod scheduler;
mod search;
mod trial;

pub use aggregate::{
    mean_test_key, rank, rank_test_key, split_test_key, std_test_key, Column, CvResults,
    MeasureSummary, ResultAggregator, ResultsMatrix, Summary, TimingSummary, MEAN_FIT_TIME,
    MEAN_TEST_TIME, PARAMS, STD_FIT_TIME, STD_TEST_TIME,
};
pub use cv::{CrossValidator, Cv, Fold, KFold, PredefinedFolds, Splittable, DEFAULT_FOLDS};
pub use executor::{
    resolve_n_jobs, Executor, PreDispatch, RayonExecutor, SequentialExecutor, TrialExecutor,
};
pub use grid::{GridExpander, NestedKeys};
pub use scheduler::{TrialRun, TrialScheduler};
pub use search::{GridSearchConfig, GridSearchCv};
pub use trial::{AlgorithmFactory, TimedScorer, TrialKey, TrialOutcome, TrialScorer};
