//! Cross-validation collaborators: the splitter contract, the default k-fold
//! splitter and resolution of a CV configuration into a concrete splitter.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;

use gs_types::{config_error, GsResult};

/// Fold count used when no CV configuration is given.
pub const DEFAULT_FOLDS: usize = 5;

/// A dataset that can be partitioned record by record.
pub trait Splittable: Sync {
    type Record: Clone + Send + Sync;

    fn records(&self) -> &[Self::Record];
}

impl<T: Clone + Send + Sync> Splittable for Vec<T> {
    type Record = T;

    fn records(&self) -> &[T] {
        self
    }
}

/// One train/test partition of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold<R> {
    pub trainset: Vec<R>,
    pub testset: Vec<R>,
}

/// Produces the ordered train/test splits for a dataset.
pub trait CrossValidator<D: Splittable>: Send + Sync {
    /// Ordered splits of `data`. Must return exactly [`n_folds`] folds.
    ///
    /// [`n_folds`]: CrossValidator::n_folds
    fn split(&self, data: &D) -> GsResult<Vec<Fold<D::Record>>>;

    fn n_folds(&self) -> usize;

    /// Human-readable splitter name.
    fn name(&self) -> &str;
}

/// K-fold cross-validation.
///
/// Records are optionally shuffled, then cut into `n_splits` contiguous
/// folds; the first `len % n_splits` folds hold one extra record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KFold {
    n_splits: usize,
    shuffle: bool,
    random_state: Option<u64>,
}

impl KFold {
    /// A shuffling k-fold splitter.
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: true,
            random_state: None,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Seed the shuffle so the splits are reproducible.
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn indices(&self, n_records: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n_records).collect();
        if self.shuffle {
            let mut rng = match self.random_state {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            indices.shuffle(&mut rng);
        }
        indices
    }
}

impl<D: Splittable> CrossValidator<D> for KFold {
    fn split(&self, data: &D) -> GsResult<Vec<Fold<D::Record>>> {
        let records = data.records();
        if self.n_splits < 2 || self.n_splits > records.len() {
            return Err(config_error!(
                "incorrect value for n_splits={}: must be >= 2 and <= the number of records ({})",
                self.n_splits,
                records.len()
            ));
        }

        let indices = self.indices(records.len());
        let fold_size = records.len() / self.n_splits;
        let remainder = records.len() % self.n_splits;

        let mut folds = Vec::with_capacity(self.n_splits);
        let mut stop = 0;
        for fold in 0..self.n_splits {
            let start = stop;
            stop += fold_size + usize::from(fold < remainder);

            let trainset = indices[..start]
                .iter()
                .chain(&indices[stop..])
                .map(|&i| records[i].clone())
                .collect();
            let testset = indices[start..stop].iter().map(|&i| records[i].clone()).collect();
            folds.push(Fold { trainset, testset });
        }
        Ok(folds)
    }

    fn n_folds(&self) -> usize {
        self.n_splits
    }

    fn name(&self) -> &str {
        "kfold"
    }
}

/// Splits defined up front by the record indices of each test fold; the
/// trainset of a fold is every other record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredefinedFolds {
    test_indices: Vec<Vec<usize>>,
}

impl PredefinedFolds {
    pub fn new(test_indices: Vec<Vec<usize>>) -> Self {
        Self { test_indices }
    }
}

impl<D: Splittable> CrossValidator<D> for PredefinedFolds {
    fn split(&self, data: &D) -> GsResult<Vec<Fold<D::Record>>> {
        let records = data.records();
        let mut folds = Vec::with_capacity(self.test_indices.len());
        for (fold, test) in self.test_indices.iter().enumerate() {
            if let Some(&bad) = test.iter().find(|&&i| i >= records.len()) {
                return Err(config_error!(
                    "fold {fold} references record {bad} but the dataset has {} records",
                    records.len()
                ));
            }
            let mut in_test = vec![false; records.len()];
            for &i in test {
                in_test[i] = true;
            }
            let trainset = records
                .iter()
                .zip(&in_test)
                .filter(|(_, held_out)| !**held_out)
                .map(|(r, _)| r.clone())
                .collect();
            let testset = test.iter().map(|&i| records[i].clone()).collect();
            folds.push(Fold { trainset, testset });
        }
        Ok(folds)
    }

    fn n_folds(&self) -> usize {
        self.test_indices.len()
    }

    fn name(&self) -> &str {
        "predefined"
    }
}

/// How a search is cross-validated: a fold count for the default k-fold
/// splitter, or an existing splitter instance used as-is.
pub enum Cv<D: Splittable> {
    /// K-fold with the given fold count; `None` means [`DEFAULT_FOLDS`].
    Folds(Option<usize>),
    Splitter(Arc<dyn CrossValidator<D>>),
}

impl<D: Splittable> Cv<D> {
    pub fn folds(n_splits: usize) -> Self {
        Self::Folds(Some(n_splits))
    }

    pub fn splitter(splitter: impl CrossValidator<D> + 'static) -> Self {
        Self::Splitter(Arc::new(splitter))
    }

    /// Resolve to a concrete splitter. `random_state` seeds the shuffle of
    /// the default k-fold splitter and is ignored for explicit splitters.
    pub fn resolve(&self, random_state: Option<u64>) -> GsResult<Arc<dyn CrossValidator<D>>> {
        match self {
            Self::Folds(n_splits) => {
                let n_splits = n_splits.unwrap_or(DEFAULT_FOLDS);
                if n_splits < 2 {
                    return Err(config_error!("cv must use at least 2 folds, got {n_splits}"));
                }
                let mut kfold = KFold::new(n_splits);
                if let Some(seed) = random_state {
                    kfold = kfold.with_random_state(seed);
                }
                Ok(Arc::new(kfold))
            }
            Self::Splitter(splitter) => Ok(Arc::clone(splitter)),
        }
    }
}

impl<D: Splittable> Default for Cv<D> {
    fn default() -> Self {
        Self::Folds(None)
    }
}

impl<D: Splittable> From<usize> for Cv<D> {
    fn from(n_splits: usize) -> Self {
        Self::folds(n_splits)
    }
}

impl<D: Splittable> Clone for Cv<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Folds(n) => Self::Folds(*n),
            Self::Splitter(s) => Self::Splitter(Arc::clone(s)),
        }
    }
}

impl<D: Splittable> fmt::Debug for Cv<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Folds(n) => f.debug_tuple("Folds").field(n).finish(),
            Self::Splitter(s) => f.debug_tuple("Splitter").field(&s.name()).finish(),
        }
    }
}
