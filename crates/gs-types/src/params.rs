//! Parameter values, concrete combinations and the grid they are drawn from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{GridError, GsResult};

/// A concrete nested option bundle (e.g. one `sim_options` mapping).
pub type OptionMap = BTreeMap<String, ParamValue>;

/// A single concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Options(OptionMap),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_options(&self) -> Option<&OptionMap> {
        match self {
            Self::Options(v) => Some(v),
            _ => None,
        }
    }

    /// Convert a JSON candidate value. `key` is only used for error context.
    pub fn from_json(key: &str, value: &Value) -> Result<Self, GridError> {
        let unsupported = |message: &str| GridError::UnsupportedValue {
            key: key.to_string(),
            message: message.to_string(),
        };
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Int(i))
                } else {
                    n.as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| unsupported("number out of range"))
                }
            }
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Object(map) => {
                let mut options = OptionMap::new();
                for (name, v) in map {
                    options.insert(name.clone(), Self::from_json(key, v)?);
                }
                Ok(Self::Options(options))
            }
            Value::Null => Err(unsupported("null is not a parameter value")),
            Value::Array(_) => Err(unsupported("lists cannot be used as a single candidate")),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Options(map) => write_mapping(f, map.iter()),
        }
    }
}

fn write_mapping<'a>(
    f: &mut fmt::Formatter<'_>,
    entries: impl Iterator<Item = (&'a String, &'a ParamValue)>,
) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (name, value)) in entries.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{name}: {value}")?;
    }
    write!(f, "}}")
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<OptionMap> for ParamValue {
    fn from(v: OptionMap) -> Self {
        Self::Options(v)
    }
}

/// One concrete assignment of a value to every grid parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamCombination(BTreeMap<String, ParamValue>);

impl ParamCombination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    pub fn get_options(&self, name: &str) -> Option<&OptionMap> {
        self.get(name)?.as_options()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ParamCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_mapping(f, self.0.iter())
    }
}

impl FromIterator<(String, ParamValue)> for ParamCombination {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Candidate values for one grid parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridValue {
    /// A flat list of candidates.
    Values(Vec<ParamValue>),
    /// A nested option bundle: sub-option name to its candidate list, in
    /// declaration order.
    Nested(Vec<(String, Vec<ParamValue>)>),
}

impl GridValue {
    /// Number of concrete values this entry contributes to the cross-product.
    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Self::Values(values) => Some(values.len()),
            Self::Nested(subs) => subs
                .iter()
                .try_fold(1usize, |acc, (_, values)| acc.checked_mul(values.len())),
        }
    }
}

/// The parameter grid: an insertion-ordered mapping of parameter name to
/// candidates. Key order drives combination order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    entries: Vec<(String, GridValue)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a flat list of candidates. Re-adding a key replaces it in place.
    pub fn add<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.set(name.into(), GridValue::Values(values));
        self
    }

    /// Add a nested option bundle built with [`NestedGrid`].
    pub fn add_nested(mut self, name: impl Into<String>, nested: NestedGrid) -> Self {
        self.set(name.into(), GridValue::Nested(nested.options));
        self
    }

    pub fn set(&mut self, name: String, value: GridValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&GridValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(String, GridValue)] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [(String, GridValue)] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a grid from a JSON object such as
    /// `{"k": [1, 2], "sim_options": {"name": ["cosine", "pearson"]}}`.
    ///
    /// Arrays become flat candidate lists; objects become nested bundles whose
    /// members must themselves be arrays. Key order is preserved.
    pub fn from_json(value: &Value) -> GsResult<Self> {
        let object = value.as_object().ok_or_else(|| GridError::NotAMapping {
            found: json_kind(value).to_string(),
        })?;

        let mut grid = ParamGrid::new();
        for (key, entry) in object {
            let grid_value = match entry {
                Value::Array(items) => GridValue::Values(
                    items
                        .iter()
                        .map(|v| ParamValue::from_json(key, v))
                        .collect::<Result<_, _>>()?,
                ),
                Value::Object(subs) => {
                    let mut options = Vec::with_capacity(subs.len());
                    for (sub, candidates) in subs {
                        let items = candidates.as_array().ok_or_else(|| {
                            GridError::UnsupportedValue {
                                key: key.clone(),
                                message: format!(
                                    "sub-option '{sub}' must be a list of candidates, got {}",
                                    json_kind(candidates)
                                ),
                            }
                        })?;
                        let values = items
                            .iter()
                            .map(|v| ParamValue::from_json(key, v))
                            .collect::<Result<_, _>>()?;
                        options.push((sub.clone(), values));
                    }
                    GridValue::Nested(options)
                }
                other => {
                    return Err(GridError::UnsupportedValue {
                        key: key.clone(),
                        message: format!(
                            "expected a list of candidates or a mapping of candidate lists, got {}",
                            json_kind(other)
                        ),
                    }
                    .into())
                }
            };
            grid.set(key.clone(), grid_value);
        }
        Ok(grid)
    }
}

/// Builder for nested option bundles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedGrid {
    options: Vec<(String, Vec<ParamValue>)>,
}

impl NestedGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        let name = name.into();
        let values: Vec<ParamValue> = values.into_iter().map(Into::into).collect();
        match self.options.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = values,
            None => self.options.push((name, values)),
        }
        self
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}
