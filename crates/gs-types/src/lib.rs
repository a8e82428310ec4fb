pub mod errors;
pub mod measure;
pub mod params;

pub use errors::*;
pub use measure::*;
pub use params::*;
