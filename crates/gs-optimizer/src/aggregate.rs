//! Aggregation of raw trial outcomes into per-measure statistics, rankings,
//! best-combination selection and the flat `cv_results` table.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use gs_types::{
    ascending_nan_last, config_error, inconsistent_error, GsResult, Measure,
    ParamCombination,
};

use crate::scheduler::TrialRun;
use crate::trial::{AlgorithmFactory, TrialOutcome};

/// Row-major (combination, split) matrix of per-trial values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsMatrix {
    n_rows: usize,
    n_cols: usize,
    values: Vec<f64>,
}

impl ResultsMatrix {
    /// Reshape a flat combination-major list. The length must match exactly.
    pub fn from_flat(values: Vec<f64>, n_rows: usize, n_cols: usize) -> GsResult<Self> {
        if n_cols == 0 {
            return Err(inconsistent_error!("cannot reshape results over zero splits"));
        }
        if values.len() != n_rows * n_cols {
            return Err(inconsistent_error!(
                "cannot reshape {} results into ({}, {})",
                values.len(),
                n_rows,
                n_cols
            ));
        }
        Ok(Self {
            n_rows,
            n_cols,
            values,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.n_rows || col >= self.n_cols {
            return None;
        }
        Some(self.values[row * self.n_cols + col])
    }

    pub fn row(&self, row: usize) -> Option<&[f64]> {
        if row >= self.n_rows {
            return None;
        }
        let start = row * self.n_cols;
        Some(&self.values[start..start + self.n_cols])
    }

    pub fn column(&self, col: usize) -> Option<Vec<f64>> {
        if col >= self.n_cols {
            return None;
        }
        Some(
            self.values
                .iter()
                .skip(col)
                .step_by(self.n_cols)
                .copied()
                .collect(),
        )
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.values.chunks(self.n_cols)
    }

    /// Mean across splits for every combination.
    pub fn row_means(&self) -> Vec<f64> {
        self.rows().map(mean).collect()
    }

    /// Population standard deviation across splits for every combination.
    pub fn row_stds(&self) -> Vec<f64> {
        self.rows().map(std_dev).collect()
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// 1-based ranks by ascending mean, for every measure. Equal means keep
/// ascending index order; NaN ranks last.
pub fn rank(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| ascending_nan_last(&values[a], &values[b]));

    let mut ranks = vec![0; values.len()];
    for (position, &index) in order.iter().enumerate() {
        ranks[index] = position + 1;
    }
    ranks
}

/// Statistics for one accuracy measure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureSummary {
    pub measure: Measure,
    pub scores: ResultsMatrix,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub rank: Vec<usize>,
    pub best_index: usize,
    pub best_score: f64,
}

/// Fit or test timing statistics, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSummary {
    pub times: ResultsMatrix,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl TimingSummary {
    fn from_matrix(times: ResultsMatrix) -> Self {
        let mean = times.row_means();
        let std = times.row_stds();
        Self { times, mean, std }
    }
}

/// One column of the results table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Column {
    Values(Vec<f64>),
    Ranks(Vec<usize>),
    Params(Vec<ParamCombination>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Self::Values(v) => v.len(),
            Self::Ranks(v) => v.len(),
            Self::Params(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, row: usize) -> Option<Value> {
        match self {
            Self::Values(v) => v.get(row).map(|&x| Value::from(x)),
            Self::Ranks(v) => v.get(row).map(|&r| Value::from(r)),
            Self::Params(v) => v.get(row).map(ParamCombination::to_json),
        }
    }
}

pub fn split_test_key(split: usize, measure: Measure) -> String {
    format!("split{split}_test_{measure}")
}

pub fn mean_test_key(measure: Measure) -> String {
    format!("mean_test_{measure}")
}

pub fn std_test_key(measure: Measure) -> String {
    format!("std_test_{measure}")
}

pub fn rank_test_key(measure: Measure) -> String {
    format!("rank_test_{measure}")
}

pub const MEAN_FIT_TIME: &str = "mean_fit_time";
pub const STD_FIT_TIME: &str = "std_fit_time";
pub const MEAN_TEST_TIME: &str = "mean_test_time";
pub const STD_TEST_TIME: &str = "std_test_time";
pub const PARAMS: &str = "params";

/// The flat results table: named columns of equal length, one row per
/// parameter combination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CvResults {
    columns: Vec<(String, Column)>,
}

impl CvResults {
    fn push(&mut self, name: String, column: Column) {
        self.columns.push((name, column));
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|(k, _)| k == name).map(|(_, c)| c)
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        match self.get(name)? {
            Column::Values(v) => Some(v),
            _ => None,
        }
    }

    pub fn ranks(&self, name: &str) -> Option<&[usize]> {
        match self.get(name)? {
            Column::Ranks(v) => Some(v),
            _ => None,
        }
    }

    pub fn params(&self) -> &[ParamCombination] {
        match self.get(PARAMS) {
            Some(Column::Params(v)) => v,
            _ => &[],
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(k, _)| k.as_str())
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    /// One combination's row, keyed by column name in column order.
    pub fn row(&self, index: usize) -> Option<Map<String, Value>> {
        if index >= self.n_rows() {
            return None;
        }
        let mut record = Map::new();
        for (name, column) in &self.columns {
            record.insert(name.clone(), column.cell(index)?);
        }
        Some(record)
    }

    /// Every row as a JSON record, ready for tabular inspection.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        (0..self.n_rows()).filter_map(|i| self.row(i)).collect()
    }

    /// Column-oriented JSON object.
    pub fn to_json(&self) -> GsResult<Value> {
        let mut object = Map::new();
        for (name, column) in &self.columns {
            object.insert(name.clone(), serde_json::to_value(column)?);
        }
        Ok(Value::Object(object))
    }
}

/// Everything computed by one search run.
#[derive(Debug, Clone)]
pub struct Summary<A> {
    param_combinations: Vec<ParamCombination>,
    n_splits: usize,
    measures: Vec<MeasureSummary>,
    fit_time: TimingSummary,
    test_time: TimingSummary,
    best_estimator: HashMap<Measure, A>,
    cv_results: CvResults,
}

impl<A> Summary<A> {
    pub fn param_combinations(&self) -> &[ParamCombination] {
        &self.param_combinations
    }

    pub fn n_combinations(&self) -> usize {
        self.param_combinations.len()
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Per-measure summaries, in request order.
    pub fn measures(&self) -> &[MeasureSummary] {
        &self.measures
    }

    pub fn measure(&self, measure: Measure) -> Option<&MeasureSummary> {
        self.measures.iter().find(|s| s.measure == measure)
    }

    pub fn best_index(&self, measure: Measure) -> Option<usize> {
        self.measure(measure).map(|s| s.best_index)
    }

    pub fn best_score(&self, measure: Measure) -> Option<f64> {
        self.measure(measure).map(|s| s.best_score)
    }

    pub fn best_params(&self, measure: Measure) -> Option<&ParamCombination> {
        self.param_combinations.get(self.best_index(measure)?)
    }

    pub fn best_estimator(&self, measure: Measure) -> Option<&A> {
        self.best_estimator.get(&measure)
    }

    pub fn fit_time(&self) -> &TimingSummary {
        &self.fit_time
    }

    pub fn test_time(&self) -> &TimingSummary {
        &self.test_time
    }

    pub fn cv_results(&self) -> &CvResults {
        &self.cv_results
    }
}

/// Stateless reducer from a [`TrialRun`] to a [`Summary`].
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn aggregate<F: AlgorithmFactory>(
        run: TrialRun,
        combinations: &[ParamCombination],
        measures: &[Measure],
        factory: &F,
    ) -> GsResult<Summary<F::Algorithm>> {
        let n_combinations = combinations.len();
        let n_splits = run.n_splits;
        if n_combinations == 0 {
            return Err(config_error!(
                "no parameter combinations to select a best estimator from"
            ));
        }
        if run.n_combinations != n_combinations {
            return Err(inconsistent_error!(
                "run covers {} combinations but {} were given",
                run.n_combinations,
                n_combinations
            ));
        }
        if run.outcomes.len() != n_combinations * n_splits {
            return Err(inconsistent_error!(
                "expected {} x {} = {} trial results, got {}",
                n_combinations,
                n_splits,
                n_combinations * n_splits,
                run.outcomes.len()
            ));
        }

        let mut summaries = Vec::with_capacity(measures.len());
        for &measure in measures {
            let flat = run
                .outcomes
                .iter()
                .enumerate()
                .map(|(i, outcome)| {
                    outcome.score(measure).ok_or_else(|| {
                        inconsistent_error!(
                            "trial (combination {}, split {}) did not report measure {}",
                            i / n_splits.max(1),
                            i % n_splits.max(1),
                            measure
                        )
                    })
                })
                .collect::<GsResult<Vec<f64>>>()?;
            summaries.push(summarize_measure(
                measure,
                ResultsMatrix::from_flat(flat, n_combinations, n_splits)?,
            )?);
        }

        let fit_time = timing(&run.outcomes, |o| o.fit_time, n_combinations, n_splits)?;
        let test_time = timing(&run.outcomes, |o| o.test_time, n_combinations, n_splits)?;

        let mut best_estimator = HashMap::with_capacity(summaries.len());
        for summary in &summaries {
            let params = &combinations[summary.best_index];
            info!(
                "Best {} = {:.6} at combination {}: {}",
                summary.measure, summary.best_score, summary.best_index, params
            );
            best_estimator.insert(summary.measure, factory.build(params)?);
        }

        let cv_results = build_table(&summaries, &fit_time, &test_time, combinations, n_splits);

        Ok(Summary {
            param_combinations: combinations.to_vec(),
            n_splits,
            measures: summaries,
            fit_time,
            test_time,
            best_estimator,
            cv_results,
        })
    }
}

fn summarize_measure(measure: Measure, scores: ResultsMatrix) -> GsResult<MeasureSummary> {
    let direction = measure.direction();
    let mean = scores.row_means();
    let std = scores.row_stds();
    let rank = rank(&mean);
    let best_index = direction
        .best_index(&mean)
        .ok_or_else(|| config_error!("no mean scores for measure {measure}"))?;
    let best_score = mean[best_index];
    debug!(
        "Measure {} ({:?}): best index {} with mean {}",
        measure, direction, best_index, best_score
    );

    Ok(MeasureSummary {
        measure,
        scores,
        mean,
        std,
        rank,
        best_index,
        best_score,
    })
}

fn timing(
    outcomes: &[TrialOutcome],
    field: impl Fn(&TrialOutcome) -> f64,
    n_combinations: usize,
    n_splits: usize,
) -> GsResult<TimingSummary> {
    let flat = outcomes.iter().map(field).collect();
    Ok(TimingSummary::from_matrix(ResultsMatrix::from_flat(
        flat,
        n_combinations,
        n_splits,
    )?))
}

fn build_table(
    summaries: &[MeasureSummary],
    fit_time: &TimingSummary,
    test_time: &TimingSummary,
    combinations: &[ParamCombination],
    n_splits: usize,
) -> CvResults {
    let mut table = CvResults::default();
    for summary in summaries {
        for split in 0..n_splits {
            if let Some(values) = summary.scores.column(split) {
                table.push(split_test_key(split, summary.measure), Column::Values(values));
            }
        }
        table.push(mean_test_key(summary.measure), Column::Values(summary.mean.clone()));
        table.push(std_test_key(summary.measure), Column::Values(summary.std.clone()));
        table.push(rank_test_key(summary.measure), Column::Ranks(summary.rank.clone()));
    }
    table.push(MEAN_FIT_TIME.to_string(), Column::Values(fit_time.mean.clone()));
    table.push(STD_FIT_TIME.to_string(), Column::Values(fit_time.std.clone()));
    table.push(MEAN_TEST_TIME.to_string(), Column::Values(test_time.mean.clone()));
    table.push(STD_TEST_TIME.to_string(), Column::Values(test_time.std.clone()));
    table.push(PARAMS.to_string(), Column::Params(combinations.to_vec()));
    table
}
