//! Pipeline configuration, loadable from TOML.
//!
//! ```toml
//! [volume.window]
//! floor = -1000.0
//! ceiling = 400.0
//!
//! [mask]
//! slice_key = "z-position"
//!
//! [dataset]
//! val_fraction = 0.2
//! seed = 42
//! background_ratio = 2
//! cache = { bounded = 8 }
//! resize_to = [256, 256]
//!
//! [paths]
//! raw_dir = "data/raw"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::dataset::{CachePolicy, FilterType, DEFAULT_BACKGROUND_RATIO};
use crate::errors::{Classify, ErrorKind};
use crate::metadata::SliceKeyScheme;
use crate::volume::Window;

pub const DEFAULT_VAL_FRACTION: f64 = 0.2;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("could not read config file {}", path.display()))]
    ReadConfig {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("could not parse config file {}", path.display()))]
    ParseConfig {
        path: PathBuf,
        #[snafu(source(from(toml::de::Error, Box::new)))]
        source: Box<toml::de::Error>,
    },

    #[snafu(display("invalid config value {}: {}", name, message))]
    InvalidConfig { name: &'static str, message: String },
}

impl Classify for ConfigError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeConfig {
    pub window: Window,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnnotationConfig {
    /// Keep ROIs flagged `inclusion = FALSE` instead of dropping them.
    pub keep_exclusions: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MaskConfig {
    pub slice_key: SliceKeyScheme,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatasetConfig {
    /// Fraction of patients held out for validation.
    pub val_fraction: f64,
    pub seed: u64,
    /// Background slices drawn per tumor slice.
    pub background_ratio: usize,
    pub cache: CachePolicy,
    /// Resample samples to (rows, columns).
    pub resize_to: Option<(u32, u32)>,
    /// Filter used when resampling images. Masks always use nearest neighbour.
    pub resize_filter: FilterType,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            val_fraction: DEFAULT_VAL_FRACTION,
            seed: DEFAULT_SEED,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            cache: CachePolicy::default(),
            resize_to: None,
            resize_filter: FilterType::default(),
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.val_fraction) {
            return InvalidConfigSnafu {
                name: "dataset.val_fraction",
                message: format!("{} is outside [0, 1]", self.val_fraction),
            }
            .fail();
        }
        if let Some((rows, columns)) = self.resize_to {
            if rows == 0 || columns == 0 {
                return InvalidConfigSnafu {
                    name: "dataset.resize_to",
                    message: format!("({rows}, {columns}) has a zero dimension"),
                }
                .fail();
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// `{raw_dir}/{patient_id}/{series}/*.dcm`
    pub raw_dir: PathBuf,
    pub annotation_dir: PathBuf,
    /// `{mask_dir}/{patient_id}_mask.npy`
    pub mask_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            annotation_dir: PathBuf::from("data/annotations"),
            mask_dir: PathBuf::from("data/masks"),
        }
    }
}

/// Everything the pipeline stages need, built once and passed by reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub volume: VolumeConfig,
    pub annotation: AnnotationConfig,
    pub mask: MaskConfig,
    pub dataset: DatasetConfig,
    pub paths: PathsConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;
        let config = Self::from_toml_str(&contents).context(ParseConfigSnafu { path })?;
        config.dataset.validate()?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
