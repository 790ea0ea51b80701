//! Persisted sample indices, so an index can be rebuilt without reading masks.
//! The file extension selects the format: `.csv` or `.parquet`.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use snafu::{OptionExt, ResultExt};

use crate::dataset::{
    ArrowSnafu, CsvSnafu, DatasetError, InvalidManifestSnafu, ManifestIoSnafu, ParquetSnafu,
    SamplePolicy, TrainingSample,
};

const BATCH_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Csv,
    Parquet,
}

impl ManifestFormat {
    pub fn from_extension(path: &Path) -> Result<Self, DatasetError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("csv") => Ok(ManifestFormat::Csv),
            Some("parquet") => Ok(ManifestFormat::Parquet),
            _ => Err(DatasetError::UnsupportedManifestFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

fn schema() -> Schema {
    Schema::new(vec![
        Field::new("patient_id", DataType::Utf8, false),
        Field::new("series_dir", DataType::Utf8, false),
        Field::new("mask_path", DataType::Utf8, false),
        Field::new("slice_index", DataType::UInt64, false),
        Field::new("policy", DataType::Utf8, false),
    ])
}

fn write_manifest_csv(samples: &[TrainingSample], dest: &Path) -> Result<(), DatasetError> {
    let mut writer = csv::Writer::from_path(dest).context(CsvSnafu { path: dest })?;
    for sample in samples {
        writer.serialize(sample).context(CsvSnafu { path: dest })?;
    }
    writer.flush().context(ManifestIoSnafu { path: dest })?;
    Ok(())
}

fn write_manifest_parquet(samples: &[TrainingSample], dest: &Path) -> Result<(), DatasetError> {
    let patient_ids = StringArray::from(
        samples
            .iter()
            .map(|s| s.patient_id.as_str())
            .collect::<Vec<_>>(),
    );
    let series_dirs = StringArray::from(
        samples
            .iter()
            .map(|s| s.series_dir.display().to_string())
            .collect::<Vec<_>>(),
    );
    let mask_paths = StringArray::from(
        samples
            .iter()
            .map(|s| s.mask_path.display().to_string())
            .collect::<Vec<_>>(),
    );
    let slice_indices = UInt64Array::from(
        samples
            .iter()
            .map(|s| s.slice_index as u64)
            .collect::<Vec<_>>(),
    );
    let policies = StringArray::from(
        samples
            .iter()
            .map(|s| s.policy.to_string())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        Arc::new(schema()),
        vec![
            Arc::new(patient_ids),
            Arc::new(series_dirs),
            Arc::new(mask_paths),
            Arc::new(slice_indices),
            Arc::new(policies),
        ],
    )
    .context(ArrowSnafu)?;

    let file = File::create(dest).context(ManifestIoSnafu { path: dest })?;
    let props = WriterProperties::builder().build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).context(ParquetSnafu)?;
    writer.write(&batch).context(ParquetSnafu)?;
    writer.close().context(ParquetSnafu)?;
    Ok(())
}

/// Write `samples` to `dest`, in the format named by its extension.
pub fn write_manifest<P: AsRef<Path>>(
    samples: &[TrainingSample],
    dest: P,
) -> Result<(), DatasetError> {
    let dest = dest.as_ref();
    match ManifestFormat::from_extension(dest)? {
        ManifestFormat::Csv => write_manifest_csv(samples, dest),
        ManifestFormat::Parquet => write_manifest_parquet(samples, dest),
    }
}

fn read_manifest_csv(path: &Path) -> Result<Vec<TrainingSample>, DatasetError> {
    let mut reader = csv::Reader::from_path(path).context(CsvSnafu { path })?;
    reader
        .deserialize()
        .map(|record| record.context(CsvSnafu { path }))
        .collect()
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
    path: &Path,
) -> Result<&'a StringArray, DatasetError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .context(InvalidManifestSnafu {
            path,
            message: format!("missing text column {name}"),
        })
}

fn read_manifest_parquet(path: &Path) -> Result<Vec<TrainingSample>, DatasetError> {
    let file = File::open(path).context(ManifestIoSnafu { path })?;
    let reader = ParquetRecordBatchReader::try_new(file, BATCH_SIZE).context(ParquetSnafu)?;
    let mut samples = Vec::new();

    for result in reader {
        let batch = result.context(ArrowSnafu)?;
        let patient_ids = string_column(&batch, "patient_id", path)?;
        let series_dirs = string_column(&batch, "series_dir", path)?;
        let mask_paths = string_column(&batch, "mask_path", path)?;
        let policies = string_column(&batch, "policy", path)?;
        let slice_indices = batch
            .column_by_name("slice_index")
            .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
            .context(InvalidManifestSnafu {
                path,
                message: "missing integer column slice_index",
            })?;

        for i in 0..batch.num_rows() {
            let policy = policies
                .value(i)
                .parse::<SamplePolicy>()
                .map_err(|message| DatasetError::InvalidManifest {
                    path: path.to_path_buf(),
                    message,
                })?;
            samples.push(TrainingSample {
                patient_id: patient_ids.value(i).to_string(),
                series_dir: PathBuf::from(series_dirs.value(i)),
                mask_path: PathBuf::from(mask_paths.value(i)),
                slice_index: slice_indices.value(i) as usize,
                policy,
            });
        }
    }
    Ok(samples)
}

/// Read samples written by [`write_manifest`].
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingSample>, DatasetError> {
    let path = path.as_ref();
    let format = ManifestFormat::from_extension(path)?;
    if !path.is_file() {
        return Err(DatasetError::MissingData {
            path: path.to_path_buf(),
        });
    }
    match format {
        ManifestFormat::Csv => read_manifest_csv(path),
        ManifestFormat::Parquet => read_manifest_parquet(path),
    }
}
