//! Trial collaborators: algorithm construction, single-trial scoring and the
//! outcome each trial reports.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use gs_types::{GsResult, Measure, ParamCombination};

/// Position of a trial in the (combination, split) grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrialKey {
    pub combination: usize,
    pub split: usize,
}

impl TrialKey {
    pub fn new(combination: usize, split: usize) -> Self {
        Self { combination, split }
    }

    /// Row-major position with combinations as the outer dimension.
    pub fn flat_index(&self, n_splits: usize) -> usize {
        self.combination * n_splits + self.split
    }
}

/// Result of scoring one combination on one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcome {
    pub scores: HashMap<Measure, f64>,
    /// Seconds spent fitting on the trainset.
    pub fit_time: f64,
    /// Seconds spent scoring on the testset.
    pub test_time: f64,
}

impl TrialOutcome {
    pub fn new(scores: HashMap<Measure, f64>, fit_time: f64, test_time: f64) -> Self {
        Self {
            scores,
            fit_time,
            test_time,
        }
    }

    pub fn score(&self, measure: Measure) -> Option<f64> {
        self.scores.get(&measure).copied()
    }
}

/// Builds a fresh, unfitted algorithm instance from a parameter combination.
pub trait AlgorithmFactory: Send + Sync {
    type Algorithm: Send;

    fn build(&self, params: &ParamCombination) -> GsResult<Self::Algorithm>;
}

impl<F, A> AlgorithmFactory for F
where
    F: Fn(&ParamCombination) -> GsResult<A> + Send + Sync,
    A: Send,
{
    type Algorithm = A;

    fn build(&self, params: &ParamCombination) -> GsResult<A> {
        self(params)
    }
}

/// Fits one algorithm instance on a trainset and scores it on a testset.
pub trait TrialScorer<A, R>: Send + Sync {
    fn score(
        &self,
        algorithm: A,
        trainset: &[R],
        testset: &[R],
        measures: &[Measure],
    ) -> GsResult<TrialOutcome>;
}

impl<F, A, R> TrialScorer<A, R> for F
where
    F: Fn(A, &[R], &[R], &[Measure]) -> GsResult<TrialOutcome> + Send + Sync,
{
    fn score(
        &self,
        algorithm: A,
        trainset: &[R],
        testset: &[R],
        measures: &[Measure],
    ) -> GsResult<TrialOutcome> {
        self(algorithm, trainset, testset, measures)
    }
}

/// A scorer assembled from a fit step and an evaluation step, timing each.
#[derive(Debug, Clone)]
pub struct TimedScorer<Fit, Eval> {
    fit: Fit,
    evaluate: Eval,
}

impl<Fit, Eval> TimedScorer<Fit, Eval> {
    pub fn new(fit: Fit, evaluate: Eval) -> Self {
        Self { fit, evaluate }
    }
}

impl<A, R, Fit, Eval> TrialScorer<A, R> for TimedScorer<Fit, Eval>
where
    Fit: Fn(&mut A, &[R]) -> GsResult<()> + Send + Sync,
    Eval: Fn(&A, &[R], &[Measure]) -> GsResult<HashMap<Measure, f64>> + Send + Sync,
{
    fn score(
        &self,
        mut algorithm: A,
        trainset: &[R],
        testset: &[R],
        measures: &[Measure],
    ) -> GsResult<TrialOutcome> {
        let started = Instant::now();
        (self.fit)(&mut algorithm, trainset)?;
        let fit_time = started.elapsed().as_secs_f64();

        let started = Instant::now();
        let scores = (self.evaluate)(&algorithm, testset, measures)?;
        let test_time = started.elapsed().as_secs_f64();

        Ok(TrialOutcome::new(scores, fit_time, test_time))
    }
}
