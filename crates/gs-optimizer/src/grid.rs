//! Parameter grid expansion into the ordered list of combinations.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gs_types::{
    GridError, GridValue, GsResult, OptionMap, ParamCombination, ParamGrid, ParamValue,
};

/// Names of parameters whose grid value is a mapping of sub-option
/// candidate lists rather than a flat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NestedKeys(Vec<String>);

impl NestedKeys {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !keys.contains(&name) {
                keys.push(name);
            }
        }
        Self(keys)
    }

    /// No nested-option parameters at all.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|k| k == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for NestedKeys {
    /// Similarity and baseline option bundles.
    fn default() -> Self {
        Self::new(["sim_options", "bsl_options"])
    }
}

/// Expands a [`ParamGrid`] into concrete [`ParamCombination`]s.
///
/// Combination order follows grid key order with the last key varying
/// fastest. That order is the combination index space used by the scheduler
/// and the aggregator.
#[derive(Debug, Clone, Default)]
pub struct GridExpander {
    nested: NestedKeys,
}

impl GridExpander {
    pub fn new(nested: NestedKeys) -> Self {
        Self { nested }
    }

    pub fn nested_keys(&self) -> &NestedKeys {
        &self.nested
    }

    /// Number of combinations the grid expands to, without materialising them.
    pub fn grid_size(&self, grid: &ParamGrid) -> GsResult<usize> {
        self.validate(grid)?;
        let mut total: usize = 1;
        for (_, value) in grid.entries() {
            let dim = value.cardinality().ok_or(GridError::Overflow)?;
            total = total.checked_mul(dim).ok_or(GridError::Overflow)?;
        }
        Ok(total)
    }

    /// Expand the grid. The caller's grid is left untouched.
    pub fn expand(&self, grid: &ParamGrid) -> GsResult<Vec<ParamCombination>> {
        self.validate(grid)?;
        // Overflow check before allocating anything.
        let size = self.grid_size(grid)?;

        let mut flat = grid.clone();
        for (key, value) in flat.entries_mut() {
            if let GridValue::Nested(options) = value {
                let bundles = expand_nested(options);
                debug!("Expanded {} into {} option bundles", key, bundles.len());
                *value = GridValue::Values(bundles.into_iter().map(ParamValue::Options).collect());
            }
        }

        // Cartesian product
        let mut result: Vec<ParamCombination> = vec![ParamCombination::new()];
        for (name, value) in flat.entries() {
            let GridValue::Values(axis) = value else {
                return Err(GridError::UnexpectedNested { key: name.clone() }.into());
            };
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for candidate in axis {
                    let mut combo = existing.clone();
                    combo.insert(name.clone(), candidate.clone());
                    next.push(combo);
                }
            }
            result = next;
        }

        debug_assert_eq!(result.len(), size);
        if result.is_empty() {
            warn!("Parameter grid expanded to zero combinations");
        }
        Ok(result)
    }

    fn validate(&self, grid: &ParamGrid) -> GsResult<()> {
        for (key, value) in grid.entries() {
            match value {
                GridValue::Values(_) if self.nested.contains(key) => {
                    return Err(GridError::ExpectedNested { key: key.clone() }.into());
                }
                GridValue::Nested(_) if !self.nested.contains(key) => {
                    return Err(GridError::UnexpectedNested { key: key.clone() }.into());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Cross-product of a nested mapping of candidate lists into concrete
/// bundles, first sub-option varying slowest.
fn expand_nested(options: &[(String, Vec<ParamValue>)]) -> Vec<OptionMap> {
    let mut bundles: Vec<OptionMap> = vec![OptionMap::new()];
    for (name, candidates) in options {
        let mut next = Vec::with_capacity(bundles.len() * candidates.len());
        for existing in &bundles {
            for candidate in candidates {
                let mut bundle = existing.clone();
                bundle.insert(name.clone(), candidate.clone());
                next.push(bundle);
            }
        }
        bundles = next;
    }
    bundles
}

#[cfg(test)]
mod tests {
    use super::*;
    use gs_types::{GsError, NestedGrid};
    use serde_json::json;

    #[test]
    fn flat_grid_produces_full_product() {
        let grid = ParamGrid::new()
            .add("n_factors", [50, 100, 150])
            .add("lr_all", [0.002, 0.005])
            .add("biased", [true, false]);
        let expander = GridExpander::default();

        assert_eq!(expander.grid_size(&grid).unwrap(), 12);
        let combos = expander.expand(&grid).unwrap();
        assert_eq!(combos.len(), 12);
        for combo in &combos {
            assert_eq!(combo.len(), 3);
            assert!([50, 100, 150].contains(&combo.get_i64("n_factors").unwrap()));
            assert!([0.002, 0.005].contains(&combo.get_f64("lr_all").unwrap()));
            assert!(combo.get_bool("biased").is_some());
        }
    }

    #[test]
    fn last_key_varies_fastest() {
        let grid = ParamGrid::new().add("a", [1, 2]).add("b", ["x", "y"]);
        let combos = GridExpander::default().expand(&grid).unwrap();

        let pairs: Vec<(i64, &str)> = combos
            .iter()
            .map(|c| (c.get_i64("a").unwrap(), c.get_str("b").unwrap()))
            .collect();
        assert_eq!(pairs, vec![(1, "x"), (1, "y"), (2, "x"), (2, "y")]);
    }

    #[test]
    fn nested_options_expand_before_outer_product() {
        let grid = ParamGrid::new().add("k", [10, 20]).add_nested(
            "sim_options",
            NestedGrid::new()
                .add("name", ["msd", "cosine"])
                .add("min_support", [1, 5, 10]),
        );
        let combos = GridExpander::default().expand(&grid).unwrap();
        assert_eq!(combos.len(), 2 * 6);

        // Each of the six concrete bundles shows up once per value of k.
        let first_k: Vec<&OptionMap> = combos
            .iter()
            .filter(|c| c.get_i64("k") == Some(10))
            .map(|c| c.get_options("sim_options").unwrap())
            .collect();
        assert_eq!(first_k.len(), 6);
        for (i, bundle) in first_k.iter().enumerate() {
            assert_eq!(bundle.len(), 2);
            for other in first_k.iter().skip(i + 1) {
                assert_ne!(bundle, other);
            }
        }
        assert_eq!(
            first_k[0].get("name"),
            Some(&ParamValue::from("msd")),
        );
        assert_eq!(first_k[1].get("min_support"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn empty_candidate_list_yields_no_combinations() {
        let grid = ParamGrid::new().add("k", [1, 2]).add("lr", Vec::<f64>::new());
        let expander = GridExpander::default();
        assert_eq!(expander.grid_size(&grid).unwrap(), 0);
        assert!(expander.expand(&grid).unwrap().is_empty());

        let nested = ParamGrid::new().add_nested(
            "bsl_options",
            NestedGrid::new().add("method", ["als"]).add("reg", Vec::<i64>::new()),
        );
        assert!(expander.expand(&nested).unwrap().is_empty());
    }

    #[test]
    fn empty_grid_yields_single_empty_combination() {
        let combos = GridExpander::default().expand(&ParamGrid::new()).unwrap();
        assert_eq!(combos, vec![ParamCombination::new()]);
    }

    #[test]
    fn caller_grid_is_not_mutated() {
        let grid = ParamGrid::from_json(&json!({
            "k": [1, 2],
            "sim_options": {"name": ["cosine", "pearson"]}
        }))
        .unwrap();
        let before = grid.clone();
        GridExpander::default().expand(&grid).unwrap();
        assert_eq!(grid, before);
    }

    #[test]
    fn mismatched_entry_shapes_are_rejected() {
        let flat_for_nested = ParamGrid::new().add("sim_options", ["cosine"]);
        let err = GridExpander::default().expand(&flat_for_nested).unwrap_err();
        assert!(matches!(err, GsError::Grid(GridError::ExpectedNested { .. })));

        let undeclared = ParamGrid::new().add_nested("sgd_options", NestedGrid::new().add("lr", [0.1]));
        let err = GridExpander::default().grid_size(&undeclared).unwrap_err();
        assert!(matches!(err, GsError::Grid(GridError::UnexpectedNested { .. })));

        let declared = GridExpander::new(NestedKeys::new(["sgd_options"]));
        assert_eq!(declared.expand(&undeclared).unwrap().len(), 1);
    }

    #[test]
    fn nested_keys_deduplicate() {
        let keys = NestedKeys::new(["a", "b", "a"]);
        assert_eq!(keys.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(NestedKeys::default().contains("bsl_options"));
        assert!(!NestedKeys::none().contains("sim_options"));
    }
}
