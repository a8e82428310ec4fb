//! Dispatch of one scoring trial per (combination, split) pair.

use tracing::{debug, error, info};

use gs_types::{config_error, inconsistent_error, GsResult, Measure, ParamCombination};

use crate::cv::{CrossValidator, Splittable};
use crate::executor::TrialExecutor;
use crate::trial::{AlgorithmFactory, TrialKey, TrialOutcome, TrialScorer};

/// Raw output of a scheduled run: `n_combinations * n_splits` outcomes in
/// combination-major, split-minor order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialRun {
    pub n_combinations: usize,
    pub n_splits: usize,
    pub outcomes: Vec<TrialOutcome>,
}

impl TrialRun {
    pub fn outcome(&self, key: TrialKey) -> Option<&TrialOutcome> {
        if key.split >= self.n_splits {
            return None;
        }
        self.outcomes.get(key.flat_index(self.n_splits))
    }
}

/// Runs every (combination, split) trial through an executor.
pub struct TrialScheduler<'a, F, S, E> {
    factory: &'a F,
    scorer: &'a S,
    executor: &'a E,
    measures: &'a [Measure],
    verbose: bool,
}

impl<'a, F, S, E> TrialScheduler<'a, F, S, E>
where
    F: AlgorithmFactory,
    E: TrialExecutor,
{
    pub fn new(factory: &'a F, scorer: &'a S, executor: &'a E, measures: &'a [Measure]) -> Self {
        Self {
            factory,
            scorer,
            executor,
            measures,
            verbose: false,
        }
    }

    /// Report each finished trial at `info` rather than `debug`.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Split `data` once, then score every combination on every split.
    ///
    /// Any trial failure aborts the run with the trial's coordinates.
    pub fn run<D>(
        &self,
        combinations: &[ParamCombination],
        data: &D,
        cv: &dyn CrossValidator<D>,
    ) -> GsResult<TrialRun>
    where
        D: Splittable,
        S: TrialScorer<F::Algorithm, D::Record>,
    {
        let folds = cv.split(data)?;
        let n_splits = cv.n_folds();
        if n_splits == 0 {
            return Err(config_error!("splitter '{}' produced no folds", cv.name()));
        }
        if folds.len() != n_splits {
            return Err(inconsistent_error!(
                "splitter '{}' reports {} folds but produced {}",
                cv.name(),
                n_splits,
                folds.len()
            ));
        }

        let total = combinations.len() * n_splits;
        info!(
            "Scheduling {} trials ({} combinations x {} splits) on {} workers via {}",
            total,
            combinations.len(),
            n_splits,
            self.executor.workers(),
            self.executor.name()
        );

        let factory = self.factory;
        let scorer = self.scorer;
        let measures = self.measures;
        let verbose = self.verbose;

        // Combinations outer, splits inner: the aggregator reshapes by position.
        let mut tasks = Vec::with_capacity(total);
        for (i, params) in combinations.iter().enumerate() {
            for (j, fold) in folds.iter().enumerate() {
                let key = TrialKey::new(i, j);
                tasks.push(move || -> GsResult<TrialOutcome> {
                    debug!("Starting trial {:?} with params {}", key, params);
                    let outcome = factory
                        .build(params)
                        .and_then(|algorithm| {
                            scorer.score(algorithm, &fold.trainset, &fold.testset, measures)
                        })
                        .map_err(|e| {
                            error!("Trial {:?} failed: {}", key, e);
                            e.in_trial(key.combination, key.split)
                        })?;

                    if let Some(missing) = measures.iter().find(|m| outcome.score(**m).is_none()) {
                        let err = inconsistent_error!("scorer did not report measure {missing}");
                        error!("Trial {:?} failed: {}", key, err);
                        return Err(err.in_trial(key.combination, key.split));
                    }

                    if verbose {
                        info!(
                            "Trial {}/{} done: fit {:.3}s, test {:.3}s",
                            key.flat_index(n_splits) + 1,
                            total,
                            outcome.fit_time,
                            outcome.test_time
                        );
                    } else {
                        debug!(
                            "Trial {:?} done: fit {:.3}s, test {:.3}s",
                            key, outcome.fit_time, outcome.test_time
                        );
                    }
                    Ok(outcome)
                });
            }
        }

        let outcomes = self.executor.execute(tasks)?;
        if outcomes.len() != total {
            return Err(inconsistent_error!(
                "executor returned {} outcomes for {} trials",
                outcomes.len(),
                total
            ));
        }

        Ok(TrialRun {
            n_combinations: combinations.len(),
            n_splits,
            outcomes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::{Fold, KFold, PredefinedFolds};
    use crate::executor::{RayonExecutor, SequentialExecutor};
    use gs_types::{GsError, GsResult};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Runs tasks back to front, then restores submission order.
    struct ReverseExecutor {
        order: Mutex<Vec<usize>>,
    }

    impl TrialExecutor for ReverseExecutor {
        fn execute<T, F>(&self, tasks: Vec<F>) -> GsResult<Vec<T>>
        where
            T: Send,
            F: FnOnce() -> GsResult<T> + Send,
        {
            let n = tasks.len();
            let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
            for (i, task) in tasks.into_iter().enumerate().rev() {
                self.order.lock().push(i);
                slots[i] = Some(task()?);
            }
            Ok(slots.into_iter().flatten().collect())
        }

        fn workers(&self) -> usize {
            1
        }

        fn name(&self) -> &str {
            "reverse"
        }
    }

    #[derive(Debug)]
    struct Constant {
        level: f64,
    }

    fn factory(params: &ParamCombination) -> GsResult<Constant> {
        let level = params
            .get_f64("level")
            .ok_or_else(|| GsError::Algorithm("missing level".into()))?;
        Ok(Constant { level })
    }

    /// Score = level + first test record / 4, so splits score differently.
    fn scorer(
        algo: Constant,
        _trainset: &[u32],
        testset: &[u32],
        measures: &[Measure],
    ) -> GsResult<TrialOutcome> {
        if algo.level < 0.0 {
            return Err(GsError::Algorithm("negative level".into()));
        }
        let value = algo.level + f64::from(testset[0]) * 0.25;
        let scores = measures.iter().map(|&m| (m, value)).collect();
        Ok(TrialOutcome::new(scores, 0.01, 0.002))
    }

    fn combos(levels: &[f64]) -> Vec<ParamCombination> {
        levels
            .iter()
            .map(|&l| ParamCombination::new().with("level", l))
            .collect()
    }

    fn three_folds() -> (Vec<u32>, KFold) {
        ((0..6).collect(), KFold::new(3).with_shuffle(false))
    }

    #[test]
    fn outcomes_are_combination_major() {
        let (data, cv) = three_folds();
        let measures = [Measure::Rmse];
        let combinations = combos(&[1.0, 2.0]);

        let run = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&combinations, &data, &cv)
            .unwrap();

        assert_eq!(run.n_combinations, 2);
        assert_eq!(run.n_splits, 3);
        let rmse: Vec<f64> = run.outcomes.iter().map(|o| o.score(Measure::Rmse).unwrap()).collect();
        assert_eq!(rmse, vec![1.0, 1.5, 2.0, 2.0, 2.5, 3.0]);
        assert_eq!(run.outcome(TrialKey::new(1, 2)).unwrap().score(Measure::Rmse), Some(3.0));
        assert!(run.outcome(TrialKey::new(0, 3)).is_none());
    }

    #[test]
    fn execution_order_does_not_change_result_order() {
        let (data, cv) = three_folds();
        let measures = [Measure::Rmse, Measure::Mae];
        let combinations = combos(&[0.5, 1.5, 2.5]);

        let sequential = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&combinations, &data, &cv)
            .unwrap();

        let reverse = ReverseExecutor {
            order: Mutex::new(Vec::new()),
        };
        let reversed = TrialScheduler::new(&factory, &scorer, &reverse, &measures)
            .run(&combinations, &data, &cv)
            .unwrap();
        assert_eq!(reverse.order.lock().first(), Some(&8));

        let pool = RayonExecutor::new(4);
        let parallel = TrialScheduler::new(&factory, &scorer, &pool, &measures)
            .with_verbose(true)
            .run(&combinations, &data, &cv)
            .unwrap();

        assert_eq!(sequential, reversed);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn trial_failure_carries_coordinates() {
        let (data, cv) = three_folds();
        let measures = [Measure::Rmse];
        let combinations = combos(&[1.0, -1.0]);

        let err = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&combinations, &data, &cv)
            .unwrap_err();
        assert_eq!(err.trial_coordinates(), Some((1, 0)));

        let missing_param = vec![ParamCombination::new()];
        let err = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&missing_param, &data, &cv)
            .unwrap_err();
        assert_eq!(err.trial_coordinates(), Some((0, 0)));
    }

    #[test]
    fn missing_measure_is_inconsistent() {
        let (data, cv) = three_folds();
        let partial = |_: Constant, _: &[u32], _: &[u32], _: &[Measure]| -> GsResult<TrialOutcome> {
            let mut scores = HashMap::new();
            scores.insert(Measure::Rmse, 1.0);
            Ok(TrialOutcome::new(scores, 0.0, 0.0))
        };
        let measures = [Measure::Rmse, Measure::Fcp];
        let err = TrialScheduler::new(&factory, &partial, &SequentialExecutor, &measures)
            .run(&combos(&[1.0]), &data, &cv)
            .unwrap_err();
        assert_eq!(err.trial_coordinates(), Some((0, 0)));
        match err {
            GsError::Trial { source, .. } => {
                assert!(matches!(*source, GsError::Inconsistent(ref m) if m.contains("fcp")));
            }
            other => panic!("Expected Trial error, got {other:?}"),
        }
    }

    #[test]
    fn splitter_fold_count_mismatch_is_inconsistent() {
        struct Lying;

        impl CrossValidator<Vec<u32>> for Lying {
            fn split(&self, data: &Vec<u32>) -> GsResult<Vec<Fold<u32>>> {
                PredefinedFolds::new(vec![vec![0], vec![1]]).split(data)
            }

            fn n_folds(&self) -> usize {
                3
            }

            fn name(&self) -> &str {
                "lying"
            }
        }

        let data: Vec<u32> = (0..4).collect();
        let measures = [Measure::Rmse];
        let err = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&combos(&[1.0]), &data, &Lying)
            .unwrap_err();
        assert!(matches!(err, GsError::Inconsistent(_)));

        let err = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&combos(&[1.0]), &data, &PredefinedFolds::new(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, GsError::Config(_)));
    }

    #[test]
    fn no_combinations_schedules_nothing() {
        let (data, cv) = three_folds();
        let measures = [Measure::Rmse];
        let run = TrialScheduler::new(&factory, &scorer, &SequentialExecutor, &measures)
            .run(&[], &data, &cv)
            .unwrap();
        assert!(run.outcomes.is_empty());
        assert_eq!(run.n_splits, 3);
    }
}
