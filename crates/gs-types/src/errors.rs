use thiserror::Error;

/// Main error type for the GridSweep system
#[derive(Error, Debug)]
pub enum GsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Grid error: {0}")]
    Grid(#[from] GridError),

    #[error("Trial failed for combination {combination} on split {split}: {source}")]
    Trial {
        combination: usize,
        split: usize,
        #[source]
        source: Box<GsError>,
    },

    #[error("Inconsistent results: {0}")]
    Inconsistent(String),

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GsError {
    /// Attach the (combination, split) coordinates of the trial that raised
    /// this error.
    pub fn in_trial(self, combination: usize, split: usize) -> Self {
        GsError::Trial {
            combination,
            split,
            source: Box::new(self),
        }
    }

    /// The (combination, split) pair of a failed trial, if this is one.
    pub fn trial_coordinates(&self) -> Option<(usize, usize)> {
        match self {
            GsError::Trial {
                combination, split, ..
            } => Some((*combination, *split)),
            _ => None,
        }
    }
}

/// Parameter grid shape errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("parameter '{key}' is a nested option bundle and expects a mapping of candidate lists")]
    ExpectedNested { key: String },

    #[error("parameter '{key}' maps to sub-options but is not a declared nested option key")]
    UnexpectedNested { key: String },

    #[error("unsupported value for parameter '{key}': {message}")]
    UnsupportedValue { key: String, message: String },

    #[error("grid must be a mapping of parameter names, got {found}")]
    NotAMapping { found: String },

    #[error("number of combinations overflows")]
    Overflow,
}

/// Result type alias for GridSweep operations
pub type GsResult<T> = Result<T, GsError>;

/// Helper trait for converting string errors
pub trait IntoGsError {
    fn into_gs_error(self) -> GsError;
}

impl IntoGsError for String {
    fn into_gs_error(self) -> GsError {
        GsError::Internal(self)
    }
}

impl IntoGsError for &str {
    fn into_gs_error(self) -> GsError {
        GsError::Internal(self.to_string())
    }
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::GsError::Config(format!($($arg)*))
    };
}

/// Macro for creating result-shape inconsistency errors
#[macro_export]
macro_rules! inconsistent_error {
    ($($arg:tt)*) => {
        $crate::GsError::Inconsistent(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::GsError::Internal(format!($($arg)*))
    };
}
