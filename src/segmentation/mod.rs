mod passthrough;
#[cfg(feature = "rvm")]
mod preprocess;
#[cfg(feature = "rvm")]
mod rvm;
pub mod types;

pub use passthrough::PassthroughOracle;
#[cfg(feature = "rvm")]
pub use preprocess::Preprocessor;
#[cfg(feature = "rvm")]
pub use rvm::RobustVideoMatting;
pub use types::{Mask, ModelVariant, OracleOptions, SegmentationOracle};
