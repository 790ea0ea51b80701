use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, info, warn};

use crate::config::DatasetConfig;
use crate::dataset::{
    balance_slices, resize_image, resize_mask, DatasetError, FilterType, GeometryMismatchSnafu,
    MaskSnafu, PatientCache, ResizeSnafu, SampleOutOfRangeSnafu, SamplePolicy,
    UnknownPatientSnafu, VolumeSnafu,
};
use crate::errors::{Classify, ErrorKind};
use crate::file::{mask_path, patients_from_mask_dir, DicomFileOperations};
use crate::mask::{load_mask, load_mask_with_shape, tumor_slices, MaskError};
use crate::volume::{SeriesLayout, Volume, Window};

/// Where a cohort's inputs live: `{raw_dir}/{patient_id}/{series}/` and
/// `{mask_dir}/{patient_id}_mask.npy`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cohort {
    pub raw_dir: PathBuf,
    pub mask_dir: PathBuf,
    pub patient_ids: Vec<String>,
}

impl Cohort {
    pub fn new<P, Q>(raw_dir: P, mask_dir: Q, patient_ids: Vec<String>) -> Self
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        Self {
            raw_dir: raw_dir.as_ref().to_path_buf(),
            mask_dir: mask_dir.as_ref().to_path_buf(),
            patient_ids,
        }
    }

    /// Every patient with a mask file in `mask_dir`.
    pub fn from_mask_dir<P, Q>(raw_dir: P, mask_dir: Q) -> std::io::Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let patient_ids = patients_from_mask_dir(mask_dir.as_ref())?;
        Ok(Self::new(raw_dir, mask_dir, patient_ids))
    }

    /// The same locations restricted to `patient_ids`.
    pub fn with_patients(&self, patient_ids: Vec<String>) -> Self {
        Self {
            patient_ids,
            ..self.clone()
        }
    }
}

/// Why a patient contributes no samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoSeriesDirectory { path: PathBuf },
    MissingMask { path: PathBuf },
    GeometryMismatch { message: String },
    Unreadable { kind: ErrorKind, message: String },
}

impl SkipReason {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SkipReason::NoSeriesDirectory { .. } | SkipReason::MissingMask { .. } => {
                ErrorKind::MissingData
            }
            SkipReason::GeometryMismatch { .. } => ErrorKind::GeometryMismatch,
            SkipReason::Unreadable { kind, .. } => *kind,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoSeriesDirectory { path } => {
                write!(f, "no series directory in {}", path.display())
            }
            SkipReason::MissingMask { path } => write!(f, "no mask at {}", path.display()),
            SkipReason::GeometryMismatch { message } => write!(f, "{message}"),
            SkipReason::Unreadable { kind, message } => write!(f, "{kind}: {message}"),
        }
    }
}

impl From<MaskError> for SkipReason {
    fn from(error: MaskError) -> Self {
        match &error {
            MaskError::MissingMask { path } => SkipReason::MissingMask { path: path.clone() },
            MaskError::ShapeMismatch { .. } => SkipReason::GeometryMismatch {
                message: error.to_string(),
            },
            _ => SkipReason::Unreadable {
                kind: error.kind(),
                message: error.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPatient {
    pub patient_id: String,
    pub reason: SkipReason,
}

/// One trainable slice. Created once per index construction and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrainingSample {
    pub patient_id: String,
    pub series_dir: PathBuf,
    pub mask_path: PathBuf,
    pub slice_index: usize,
    pub policy: SamplePolicy,
}

/// A windowed image slice and its mask, each shaped (1, rows, columns).
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingPair {
    pub image: Array3<f32>,
    pub mask: Array3<f32>,
}

/// A resolved patient: its series layout (headers only) and mask location.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientEntry {
    pub patient_id: String,
    pub series_dir: PathBuf,
    pub mask_path: PathBuf,
    pub layout: SeriesLayout,
}

/// Decoded volume and mask of one patient, shared through the cache.
#[derive(Debug)]
pub struct CachedPatient {
    pub volume: Volume,
    pub mask: Array3<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub patients: usize,
    pub skipped: usize,
    pub tumor_samples: usize,
    pub background_samples: usize,
}

/// First series directory of a patient, in sorted order.
pub fn resolve_series_dir<P: AsRef<Path>>(raw_dir: P, patient_id: &str) -> Option<PathBuf> {
    let patient_dir = raw_dir.as_ref().join(patient_id);
    patient_dir.series_dirs().ok()?.into_iter().next()
}

fn resolve_patient(
    cohort: &Cohort,
    patient_id: &str,
) -> Result<(PatientEntry, Vec<usize>), SkipReason> {
    let series_dir = resolve_series_dir(&cohort.raw_dir, patient_id).ok_or_else(|| {
        SkipReason::NoSeriesDirectory {
            path: cohort.raw_dir.join(patient_id),
        }
    })?;
    let mask_path = mask_path(&cohort.mask_dir, patient_id);
    if !mask_path.is_file() {
        return Err(SkipReason::MissingMask { path: mask_path });
    }

    let layout = SeriesLayout::scan(&series_dir).map_err(|e| SkipReason::Unreadable {
        kind: e.kind(),
        message: e.to_string(),
    })?;
    let mask = load_mask_with_shape(&mask_path, layout.shape())?;
    let tumor = tumor_slices(&mask);

    Ok((
        PatientEntry {
            patient_id: patient_id.to_string(),
            series_dir,
            mask_path,
            layout,
        },
        tumor,
    ))
}

/// Balanced training samples over a cohort, materialized lazily.
///
/// Building the index reads slice headers and masks but no image pixels.
/// [`SampleIndex::get`] decodes the one slice it needs, or takes it from the
/// patient cache when the cache policy allows.
#[derive(Debug)]
pub struct SampleIndex {
    samples: Vec<TrainingSample>,
    patients: HashMap<String, PatientEntry>,
    skipped: Vec<SkippedPatient>,
    window: Window,
    resize_to: Option<(u32, u32)>,
    resize_filter: FilterType,
    cache: PatientCache<CachedPatient>,
}

impl SampleIndex {
    fn empty(config: &DatasetConfig) -> Self {
        Self {
            samples: Vec::new(),
            patients: HashMap::new(),
            skipped: Vec::new(),
            window: Window::default(),
            resize_to: config.resize_to,
            resize_filter: config.resize_filter,
            cache: PatientCache::new(config.cache),
        }
    }

    /// Resolve every patient of `cohort` in order and select its training slices.
    /// Patients that cannot be resolved are skipped and recorded, never fatal.
    ///
    /// Background draws are seeded per patient, so a patient's samples do not
    /// depend on which other patients are in the cohort.
    pub fn build(cohort: &Cohort, config: &DatasetConfig) -> Self {
        let mut index = Self::empty(config);

        for patient_id in &cohort.patient_ids {
            let (entry, tumor) = match resolve_patient(cohort, patient_id) {
                Ok(resolved) => resolved,
                Err(reason) => {
                    warn!("Skipping patient {}: {}", patient_id, reason);
                    index.skipped.push(SkippedPatient {
                        patient_id: patient_id.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let mut rng = StdRng::seed_from_u64(patient_seed(config.seed, patient_id));
            let selected =
                balance_slices(&tumor, entry.layout.len(), config.background_ratio, &mut rng);
            debug!(
                "Patient {}: {} slices, {} tumor, {} selected",
                patient_id,
                entry.layout.len(),
                tumor.len(),
                selected.len()
            );
            index
                .samples
                .extend(selected.into_iter().map(|(slice_index, policy)| TrainingSample {
                    patient_id: entry.patient_id.clone(),
                    series_dir: entry.series_dir.clone(),
                    mask_path: entry.mask_path.clone(),
                    slice_index,
                    policy,
                }));
            index.patients.insert(patient_id.clone(), entry);
        }

        let summary = index.summary();
        info!(
            "Indexed {} samples ({} tumor, {} background) from {} patients, skipped {}",
            index.len(),
            summary.tumor_samples,
            summary.background_samples,
            summary.patients,
            summary.skipped
        );
        index
    }

    /// Rebuild an index from previously selected samples, e.g. read from a manifest.
    /// Only slice headers are read.
    pub fn from_samples(
        samples: Vec<TrainingSample>,
        config: &DatasetConfig,
    ) -> Result<Self, DatasetError> {
        let mut index = Self::empty(config);
        for sample in &samples {
            if !index.patients.contains_key(&sample.patient_id) {
                let layout = SeriesLayout::scan(&sample.series_dir).context(VolumeSnafu {
                    patient_id: &sample.patient_id,
                })?;
                index.patients.insert(
                    sample.patient_id.clone(),
                    PatientEntry {
                        patient_id: sample.patient_id.clone(),
                        series_dir: sample.series_dir.clone(),
                        mask_path: sample.mask_path.clone(),
                        layout,
                    },
                );
            }
            let depth = index.patients[&sample.patient_id].layout.len();
            if sample.slice_index >= depth {
                return GeometryMismatchSnafu {
                    patient_id: &sample.patient_id,
                    index: sample.slice_index,
                    depth,
                }
                .fail();
            }
        }
        index.samples = samples;
        Ok(index)
    }

    /// Window applied to image slices. Defaults to the lung window.
    pub fn with_window(self, window: Window) -> Self {
        Self { window, ..self }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn skipped(&self) -> &[SkippedPatient] {
        &self.skipped
    }

    pub fn patient(&self, patient_id: &str) -> Option<&PatientEntry> {
        self.patients.get(patient_id)
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn cache(&self) -> &PatientCache<CachedPatient> {
        &self.cache
    }

    pub fn summary(&self) -> IndexSummary {
        let tumor_samples = self
            .samples
            .iter()
            .filter(|s| s.policy == SamplePolicy::Tumor)
            .count();
        IndexSummary {
            patients: self.patients.len(),
            skipped: self.skipped.len(),
            tumor_samples,
            background_samples: self.samples.len() - tumor_samples,
        }
    }

    fn load_patient(entry: &PatientEntry) -> Result<CachedPatient, DatasetError> {
        let volume = entry.layout.load_volume().context(VolumeSnafu {
            patient_id: &entry.patient_id,
        })?;
        let mask = load_mask_with_shape(&entry.mask_path, volume.shape()).context(MaskSnafu {
            patient_id: &entry.patient_id,
        })?;
        Ok(CachedPatient { volume, mask })
    }

    /// Calibrated slice and mask slice at `index`, from the cache or from disk.
    fn load_slice_pair(
        &self,
        entry: &PatientEntry,
        index: usize,
    ) -> Result<(Array2<i16>, Array2<u8>), DatasetError> {
        let cached = match self.cache.get(&entry.patient_id) {
            Some(cached) => Some(cached),
            None if self.cache.has_room() => Some(
                self.cache
                    .get_or_try_insert_with(&entry.patient_id, || Self::load_patient(entry))?,
            ),
            None => None,
        };
        if let Some(cached) = cached {
            let image = cached
                .volume
                .slice(index)
                .context(VolumeSnafu {
                    patient_id: &entry.patient_id,
                })?
                .to_owned();
            let mask = cached.mask.index_axis(Axis(0), index).to_owned();
            return Ok((image, mask));
        }

        let image = entry.layout.load_slice(index).context(VolumeSnafu {
            patient_id: &entry.patient_id,
        })?;
        let mask = load_mask(&entry.mask_path).context(MaskSnafu {
            patient_id: &entry.patient_id,
        })?;
        if mask.dim() != entry.layout.shape() {
            return Err(DatasetError::Mask {
                patient_id: entry.patient_id.clone(),
                source: Box::new(MaskError::ShapeMismatch {
                    path: entry.mask_path.clone(),
                    expected: entry.layout.shape(),
                    found: mask.dim(),
                }),
            });
        }
        Ok((image, mask.index_axis_move(Axis(0), index)))
    }

    /// Materialize sample `index` as a windowed `(1, rows, columns)` image and mask.
    pub fn get(&self, index: usize) -> Result<TrainingPair, DatasetError> {
        let sample = self.samples.get(index).context(SampleOutOfRangeSnafu {
            index,
            len: self.samples.len(),
        })?;
        let entry = self
            .patients
            .get(&sample.patient_id)
            .context(UnknownPatientSnafu {
                patient_id: &sample.patient_id,
            })?;
        let z = sample.slice_index;
        let (hu, mask) = self.load_slice_pair(entry, z)?;
        let image = self.window.apply(&hu);

        let (image, mask) = match self.resize_to {
            Some(target) => {
                let resize_error = || ResizeSnafu {
                    patient_id: &sample.patient_id,
                    index: z,
                };
                let image = resize_image(image.view(), target, self.resize_filter)
                    .with_context(resize_error)?;
                let mask = resize_mask(mask.view(), target).with_context(resize_error)?;
                (image, mask)
            }
            None => (image, mask),
        };

        Ok(TrainingPair {
            image: image.insert_axis(Axis(0)),
            mask: mask.mapv(f32::from).insert_axis(Axis(0)),
        })
    }
}

/// Mix `seed` with a stable FNV-1a hash of `patient_id`.
fn patient_seed(seed: u64, patient_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = patient_id
        .bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME));
    seed ^ hash
}
