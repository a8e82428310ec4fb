//! Grid search facade: configuration plus the `fit` entry point tying the
//! expander, scheduler and aggregator together.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::info;

use gs_types::{config_error, GsResult, Measure, ParamCombination, ParamGrid};

use crate::aggregate::{CvResults, ResultAggregator, Summary};
use crate::cv::{Cv, Splittable};
use crate::executor::{Executor, PreDispatch, TrialExecutor};
use crate::grid::{GridExpander, NestedKeys};
use crate::scheduler::TrialScheduler;
use crate::trial::{AlgorithmFactory, TrialScorer};

/// Settings for a grid search run.
///
/// The splitter instance is not part of this struct; it is supplied through
/// [`GridSearchCv::with_cv`] when a fold count is not enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSearchConfig {
    /// Accuracy measure names, matched case-insensitively.
    pub measures: Vec<String>,

    /// Fold count for the default k-fold splitter. `None` means 5.
    pub cv_folds: Option<usize>,

    /// Seed for the default splitter's shuffle.
    pub random_state: Option<u64>,

    /// Worker count: `1` sequential, `-1` all CPUs, `-2` all but one, ...
    pub n_jobs: i32,

    pub pre_dispatch: PreDispatch,

    /// Report per-trial progress at `info`.
    pub verbose: bool,

    /// Parameters whose grid value is a bundle of sub-option candidates.
    pub nested_keys: NestedKeys,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            measures: Measure::defaults()
                .into_iter()
                .map(|m| m.name().to_string())
                .collect(),
            cv_folds: None,
            random_state: None,
            n_jobs: -1,
            pre_dispatch: PreDispatch::default(),
            verbose: false,
            nested_keys: NestedKeys::default(),
        }
    }
}

impl GridSearchConfig {
    pub fn with_measures<I, S>(mut self, measures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measures = measures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cv_folds(mut self, n: usize) -> Self {
        self.cv_folds = Some(n);
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    pub fn with_n_jobs(mut self, n_jobs: i32) -> Self {
        self.n_jobs = n_jobs;
        self
    }

    pub fn with_pre_dispatch(mut self, pre_dispatch: PreDispatch) -> Self {
        self.pre_dispatch = pre_dispatch;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_nested_keys(mut self, nested_keys: NestedKeys) -> Self {
        self.nested_keys = nested_keys;
        self
    }
}

/// Exhaustive cross-validated search over a parameter grid.
///
/// The grid is expanded and the measures validated at construction. Every
/// successful [`fit`](Self::fit) replaces the stored [`Summary`]; a failed
/// one leaves the previous summary untouched.
pub struct GridSearchCv<F: AlgorithmFactory, S, D: Splittable> {
    factory: F,
    scorer: S,
    config: GridSearchConfig,
    measures: Vec<Measure>,
    cv: Cv<D>,
    param_combinations: Vec<ParamCombination>,
    summary: Option<Summary<F::Algorithm>>,
}

impl<F, S, D> GridSearchCv<F, S, D>
where
    F: AlgorithmFactory,
    D: Splittable,
    S: TrialScorer<F::Algorithm, D::Record>,
{
    pub fn new(factory: F, scorer: S, grid: &ParamGrid, config: GridSearchConfig) -> GsResult<Self> {
        let measures = Measure::parse_list(&config.measures)?;
        let param_combinations = GridExpander::new(config.nested_keys.clone()).expand(grid)?;
        info!(
            "Grid search over {} combinations, measures {:?}",
            param_combinations.len(),
            measures
        );

        Ok(Self {
            factory,
            scorer,
            cv: Cv::Folds(config.cv_folds),
            config,
            measures,
            param_combinations,
            summary: None,
        })
    }

    /// Override the cross-validation derived from `cv_folds`.
    pub fn with_cv(mut self, cv: Cv<D>) -> Self {
        self.cv = cv;
        self
    }

    /// Evaluate every combination on every split, using the executor
    /// described by `n_jobs` and `pre_dispatch`.
    pub fn fit(&mut self, data: &D) -> GsResult<&Summary<F::Algorithm>> {
        let executor = Executor::from_config(self.config.n_jobs, self.config.pre_dispatch)?;
        self.fit_with_executor(data, &executor)
    }

    pub fn fit_with_executor<E: TrialExecutor>(
        &mut self,
        data: &D,
        executor: &E,
    ) -> GsResult<&Summary<F::Algorithm>> {
        if self.param_combinations.is_empty() {
            return Err(config_error!("the parameter grid expands to no combinations"));
        }
        let splitter = self.cv.resolve(self.config.random_state)?;
        let started = Instant::now();

        let run = TrialScheduler::new(&self.factory, &self.scorer, executor, &self.measures)
            .with_verbose(self.config.verbose)
            .run(&self.param_combinations, data, splitter.as_ref())?;
        let summary =
            ResultAggregator::aggregate(run, &self.param_combinations, &self.measures, &self.factory)?;

        info!(
            "Grid search finished: {} combinations x {} splits in {:.2}s",
            summary.n_combinations(),
            summary.n_splits(),
            started.elapsed().as_secs_f64()
        );
        Ok(self.summary.insert(summary))
    }
}

impl<F, S, D> GridSearchCv<F, S, D>
where
    F: AlgorithmFactory,
    D: Splittable,
{
    pub fn config(&self) -> &GridSearchConfig {
        &self.config
    }

    pub fn measures(&self) -> &[Measure] {
        &self.measures
    }

    pub fn cv(&self) -> &Cv<D> {
        &self.cv
    }

    pub fn param_combinations(&self) -> &[ParamCombination] {
        &self.param_combinations
    }

    /// Result of the last successful fit.
    pub fn summary(&self) -> Option<&Summary<F::Algorithm>> {
        self.summary.as_ref()
    }

    pub fn best_index(&self, measure: Measure) -> Option<usize> {
        self.summary.as_ref()?.best_index(measure)
    }

    pub fn best_score(&self, measure: Measure) -> Option<f64> {
        self.summary.as_ref()?.best_score(measure)
    }

    pub fn best_params(&self, measure: Measure) -> Option<&ParamCombination> {
        self.summary.as_ref()?.best_params(measure)
    }

    pub fn best_estimator(&self, measure: Measure) -> Option<&F::Algorithm> {
        self.summary.as_ref()?.best_estimator(measure)
    }

    pub fn cv_results(&self) -> Option<&CvResults> {
        self.summary.as_ref().map(Summary::cv_results)
    }
}
