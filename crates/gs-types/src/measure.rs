//! Accuracy measures and the direction in which each one improves.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::{GsError, GsResult};

/// Whether a lower or a higher mean score is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// Index of the best value in `values`. The first occurrence wins on ties
    /// and NaN never displaces a comparable value.
    pub fn best_index(self, values: &[f64]) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &v) in values.iter().enumerate() {
            let better = match best {
                None => true,
                Some((_, current)) if current.is_nan() => !v.is_nan(),
                Some((_, current)) => match self {
                    ObjectiveDirection::Minimize => v < current,
                    ObjectiveDirection::Maximize => v > current,
                },
            };
            if better {
                best = Some((i, v));
            }
        }
        best.map(|(i, _)| i)
    }
}

/// A named accuracy measure reported by a scorer.
///
/// The set is closed: every measure carries a fixed [`ObjectiveDirection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Measure {
    /// Root mean squared error.
    Rmse,
    /// Mean squared error.
    Mse,
    /// Mean absolute error.
    Mae,
    /// Fraction of concordant pairs.
    Fcp,
}

impl Measure {
    pub const ALL: [Measure; 4] = [Measure::Rmse, Measure::Mse, Measure::Mae, Measure::Fcp];

    pub fn name(self) -> &'static str {
        match self {
            Measure::Rmse => "rmse",
            Measure::Mse => "mse",
            Measure::Mae => "mae",
            Measure::Fcp => "fcp",
        }
    }

    pub fn direction(self) -> ObjectiveDirection {
        match self {
            Measure::Rmse | Measure::Mse | Measure::Mae => ObjectiveDirection::Minimize,
            Measure::Fcp => ObjectiveDirection::Maximize,
        }
    }

    /// Parse a list of measure names, case-insensitively, dropping repeats.
    pub fn parse_list<I, S>(names: I) -> GsResult<Vec<Measure>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut measures = Vec::new();
        for name in names {
            let measure: Measure = name.as_ref().parse()?;
            if !measures.contains(&measure) {
                measures.push(measure);
            }
        }
        if measures.is_empty() {
            return Err(GsError::Config("at least one measure is required".into()));
        }
        Ok(measures)
    }

    /// The default measures: RMSE and MAE.
    pub fn defaults() -> Vec<Measure> {
        vec![Measure::Rmse, Measure::Mae]
    }
}

impl FromStr for Measure {
    type Err = GsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Measure::ALL
            .into_iter()
            .find(|m| m.name() == lowered)
            .ok_or_else(|| {
                GsError::Config(format!(
                    "unknown measure '{s}': no known better direction (expected one of rmse, mse, mae, fcp)"
                ))
            })
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Total order used for ranking: NaN sorts after every number.
pub fn ascending_nan_last(a: &f64, b: &f64) -> Ordering {
    a.partial_cmp(b)
        .unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_directions() {
        assert_eq!(Measure::Rmse.direction(), ObjectiveDirection::Minimize);
        assert_eq!(Measure::Mse.direction(), ObjectiveDirection::Minimize);
        assert_eq!(Measure::Mae.direction(), ObjectiveDirection::Minimize);
        assert_eq!(Measure::Fcp.direction(), ObjectiveDirection::Maximize);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("RMSE".parse::<Measure>().unwrap(), Measure::Rmse);
        assert_eq!(" Fcp ".parse::<Measure>().unwrap(), Measure::Fcp);
    }

    #[test]
    fn test_unknown_measure_is_config_error() {
        let err = "auc".parse::<Measure>().unwrap_err();
        assert!(matches!(err, GsError::Config(_)));
        assert!(err.to_string().contains("auc"));
    }

    #[test]
    fn test_parse_list_dedups_in_order() {
        let measures = Measure::parse_list(["mae", "RMSE", "mae"]).unwrap();
        assert_eq!(measures, vec![Measure::Mae, Measure::Rmse]);

        assert!(Measure::parse_list(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_best_index_minimize_first_on_ties() {
        let values = [0.9, 0.7, 0.7, 1.2];
        assert_eq!(ObjectiveDirection::Minimize.best_index(&values), Some(1));
        assert_eq!(ObjectiveDirection::Maximize.best_index(&values), Some(3));
        assert_eq!(ObjectiveDirection::Minimize.best_index(&[]), None);
    }

    #[test]
    fn test_best_index_skips_nan() {
        let values = [f64::NAN, 0.4, 0.2];
        assert_eq!(ObjectiveDirection::Minimize.best_index(&values), Some(2));
        assert_eq!(ObjectiveDirection::Maximize.best_index(&values), Some(1));
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Measure::Fcp).unwrap();
        assert_eq!(json, "\"fcp\"");
        let back: Measure = serde_json::from_str("\"rmse\"").unwrap();
        assert_eq!(back, Measure::Rmse);
    }

    #[test]
    fn test_ascending_nan_last() {
        let mut values = vec![2.0, f64::NAN, 1.0];
        values.sort_by(ascending_nan_last);
        assert_eq!(values[0], 1.0);
        assert_eq!(values[1], 2.0);
        assert!(values[2].is_nan());
    }
}
