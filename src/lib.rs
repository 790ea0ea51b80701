pub mod annotation;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod file;
pub mod mask;
pub mod metadata;
pub mod volume;

#[cfg(feature = "python")]
pub mod python;

#[doc(hidden)]
pub mod test_support;

#[cfg(test)]
pub(crate) mod testing;

pub use config::PipelineConfig;
pub use errors::{Classify, ErrorKind};
