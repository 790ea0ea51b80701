//! Normalized annotation JSON.
//!
//! Two slice shapes are accepted: with `sop_uid` (written by this crate) and
//! z-only. Both end up in the same [`Annotation`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;

use crate::annotation::{
    Annotation, AnnotationError, ContourSlice, DropCounts, JsonSnafu, Nodule, ParsedAnnotation,
    Point, ReadFileSnafu, WriteFileSnafu,
};

/// One slice entry. `sop_uid` is absent in z-only files.
#[derive(Debug, Deserialize)]
struct JsonSlice {
    #[serde(default)]
    sop_uid: Option<String>,
    z_position: f64,
    contour: Vec<Point>,
}

impl From<JsonSlice> for ContourSlice {
    fn from(slice: JsonSlice) -> Self {
        ContourSlice {
            sop_uid: slice.sop_uid,
            z_position: slice.z_position,
            contour: slice.contour,
        }
    }
}

/// Decode one slice entry on its own so a bad entry only drops itself.
fn decode_slice(nodule_id: &str, entry: serde_json::Value) -> Option<ContourSlice> {
    match serde_json::from_value::<JsonSlice>(entry) {
        Ok(slice) => Some(slice.into()),
        Err(error) => {
            debug!("Dropping slice of {}: {}", nodule_id, error);
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonNodule {
    nodule_id: String,
    radiologist_id: String,
    slices: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JsonAnnotation {
    patient_id: String,
    series_instance_uid: String,
    #[serde(default)]
    nodules: Vec<JsonNodule>,
}

impl JsonAnnotation {
    fn normalize(self) -> ParsedAnnotation {
        let mut dropped = DropCounts::default();
        let mut nodules = Vec::with_capacity(self.nodules.len());
        for nodule in self.nodules {
            let total = nodule.slices.len();
            let nodule_id = nodule.nodule_id;
            let slices: Vec<ContourSlice> = nodule
                .slices
                .into_iter()
                .filter_map(|entry| decode_slice(&nodule_id, entry))
                .filter(ContourSlice::is_valid)
                .collect();
            dropped.invalid_contours += total - slices.len();
            if slices.is_empty() {
                debug!("Dropping {}: no valid contours", nodule_id);
                dropped.empty_nodules += 1;
                continue;
            }
            nodules.push(Nodule {
                nodule_id,
                radiologist_id: nodule.radiologist_id,
                slices,
            });
        }
        ParsedAnnotation {
            annotation: Annotation {
                patient_id: self.patient_id,
                series_instance_uid: self.series_instance_uid,
                nodules,
            },
            dropped,
        }
    }
}

pub fn parse_annotation_json_str(
    json: &str,
    origin: &str,
) -> Result<ParsedAnnotation, AnnotationError> {
    let raw: JsonAnnotation = serde_json::from_str(json).context(JsonSnafu { origin })?;
    Ok(raw.normalize())
}

pub fn read_annotation_json<P: AsRef<Path>>(path: P) -> Result<ParsedAnnotation, AnnotationError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_annotation_json_str(&json, &path.display().to_string())
}

pub fn annotation_json_path<P: AsRef<Path>>(output_dir: P, patient_id: &str) -> PathBuf {
    output_dir.as_ref().join(format!("{patient_id}.json"))
}

/// Write `annotation` as `{output_dir}/{patient_id}.json`, creating the directory if needed.
pub fn write_annotation_json<P: AsRef<Path>>(
    annotation: &Annotation,
    output_dir: P,
) -> Result<PathBuf, AnnotationError> {
    let output_dir = output_dir.as_ref();
    std::fs::create_dir_all(output_dir).context(WriteFileSnafu { path: output_dir })?;
    let path = annotation_json_path(output_dir, &annotation.patient_id);
    let json = serde_json::to_string_pretty(annotation).context(JsonSnafu {
        origin: path.display().to_string(),
    })?;
    std::fs::write(&path, json).context(WriteFileSnafu { path: &path })?;
    Ok(path)
}
