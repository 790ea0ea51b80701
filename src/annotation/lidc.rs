//! Reader for LIDC-IDRI radiologist annotation XML.
//!
//! Elements are matched by local name, so documents with or without the
//! `http://www.nih.gov` default namespace are read the same way.

use std::path::Path;

use roxmltree::{Document, Node};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::annotation::{
    Annotation, AnnotationError, ContourSlice, DropCounts, MalformedAnnotationSnafu, Nodule,
    ParseXmlSnafu, ParsedAnnotation, Point, ReadFileSnafu, MIN_CONTOUR_POINTS,
};
use crate::config::AnnotationConfig;

/// Prefix of patient identifiers in the LIDC-IDRI collection.
pub const LIDC_PATIENT_PREFIX: &str = "LIDC-IDRI-";

/// Patient identifier for an annotation file. The archive names files by case
/// number, so `001.xml` belongs to `LIDC-IDRI-0001`. Other stems are used as is.
pub fn patient_id_from_path<P: AsRef<Path>>(path: P) -> Option<String> {
    let stem = path.as_ref().file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    if stem.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(case) = stem.parse::<u32>() {
            return Some(format!("{LIDC_PATIENT_PREFIX}{case:04}"));
        }
    }
    Some(stem.to_string())
}

fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|c| is_element(c, name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|c| c.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoiDrop {
    Exclusion,
    Invalid(&'static str),
}

fn parse_edge(edge: Node) -> Option<Point> {
    let x = child_text(edge, "xCoord")?.parse::<i32>().ok()?;
    let y = child_text(edge, "yCoord")?.parse::<i32>().ok()?;
    Some(Point(x, y))
}

fn parse_roi(roi: Node, keep_exclusions: bool) -> Result<ContourSlice, RoiDrop> {
    let excluded = child_text(roi, "inclusion")
        .map(|v| v.eq_ignore_ascii_case("false"))
        .unwrap_or(false);
    if excluded && !keep_exclusions {
        return Err(RoiDrop::Exclusion);
    }

    let edges: Vec<Node> = roi.children().filter(|c| is_element(c, "edgeMap")).collect();
    if edges.len() < MIN_CONTOUR_POINTS {
        return Err(RoiDrop::Invalid("fewer than three edge points"));
    }
    let sop_uid = child_text(roi, "imageSOP_UID").ok_or(RoiDrop::Invalid("no imageSOP_UID"))?;
    let z_position = child_text(roi, "imageZposition")
        .and_then(|z| z.parse::<f64>().ok())
        .filter(|z| z.is_finite())
        .ok_or(RoiDrop::Invalid("no usable imageZposition"))?;
    let contour = edges
        .into_iter()
        .map(parse_edge)
        .collect::<Option<Vec<_>>>()
        .ok_or(RoiDrop::Invalid("non-integer edge coordinate"))?;

    Ok(ContourSlice {
        sop_uid: Some(sop_uid.to_string()),
        z_position,
        contour,
    })
}

/// Parse an LIDC XML document held in memory. `origin` names the document in errors.
pub fn parse_lidc_str(
    xml: &str,
    patient_id: &str,
    origin: &str,
    config: &AnnotationConfig,
) -> Result<ParsedAnnotation, AnnotationError> {
    let document = Document::parse(xml).context(ParseXmlSnafu { origin })?;
    let root = document.root_element();

    let series_instance_uid = root
        .descendants()
        .find(|n| is_element(n, "SeriesInstanceUid"))
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .context(MalformedAnnotationSnafu {
            origin,
            message: "no SeriesInstanceUid",
        })?;

    let sessions: Vec<Node> = root
        .descendants()
        .filter(|n| is_element(n, "readingSession"))
        .collect();
    if sessions.is_empty() {
        debug!("No reading sessions in {}", origin);
    }

    let mut dropped = DropCounts::default();
    let mut nodules = Vec::new();
    for (r, session) in sessions.iter().enumerate() {
        let radiologist_id = format!("R{}", r + 1);
        let session_nodules = session
            .descendants()
            .filter(|n| is_element(n, "unblindedReadNodule"));

        // Numbering counts dropped nodules so ids stay stable across filters
        for (n, nodule) in session_nodules.enumerate() {
            let nodule_id = format!("{radiologist_id}_Nodule_{}", n + 1);
            let mut slices = Vec::new();
            for roi in nodule.children().filter(|c| is_element(c, "roi")) {
                match parse_roi(roi, config.keep_exclusions) {
                    Ok(slice) => slices.push(slice),
                    Err(RoiDrop::Exclusion) => dropped.exclusions += 1,
                    Err(RoiDrop::Invalid(reason)) => {
                        debug!("Dropping ROI of {} in {}: {}", nodule_id, origin, reason);
                        dropped.invalid_contours += 1;
                    }
                }
            }
            if slices.is_empty() {
                debug!("Dropping {} in {}: no valid contours", nodule_id, origin);
                dropped.empty_nodules += 1;
                continue;
            }
            nodules.push(Nodule {
                nodule_id,
                radiologist_id: radiologist_id.clone(),
                slices,
            });
        }
    }

    Ok(ParsedAnnotation {
        annotation: Annotation {
            patient_id: patient_id.to_string(),
            series_instance_uid: series_instance_uid.to_string(),
            nodules,
        },
        dropped,
    })
}

/// Parse an LIDC XML file, taking the patient id from its file name.
pub fn parse_lidc_xml<P: AsRef<Path>>(
    path: P,
    config: &AnnotationConfig,
) -> Result<ParsedAnnotation, AnnotationError> {
    let path = path.as_ref();
    let patient_id = patient_id_from_path(path).context(MalformedAnnotationSnafu {
        origin: path.display().to_string(),
        message: "cannot derive a patient id from the file name",
    })?;
    parse_lidc_xml_as(path, &patient_id, config)
}

/// Parse an LIDC XML file for an explicitly named patient.
pub fn parse_lidc_xml_as<P: AsRef<Path>>(
    path: P,
    patient_id: &str,
    config: &AnnotationConfig,
) -> Result<ParsedAnnotation, AnnotationError> {
    let path = path.as_ref();
    let xml = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_lidc_str(&xml, patient_id, &path.display().to_string(), config)
}
