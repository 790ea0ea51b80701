//! Radiologist annotations: parsing LIDC XML and normalized JSON into one
//! reader-agnostic structure.

use std::path::{Path, PathBuf};

use snafu::Snafu;

use crate::config::AnnotationConfig;
use crate::errors::{Classify, ErrorKind};
use crate::file::AnnotationFileOperations;

pub mod json;
pub mod lidc;
pub mod model;

pub use json::*;
pub use lidc::*;
pub use model::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AnnotationError {
    #[snafu(display("could not read annotation file {}", path.display()))]
    ReadFile {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("could not write annotation file {}", path.display()))]
    WriteFile {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("invalid XML in {}: {}", origin, source))]
    ParseXml {
        origin: String,
        #[snafu(source(from(roxmltree::Error, Box::new)))]
        source: Box<roxmltree::Error>,
    },

    #[snafu(display("malformed annotation {}: {}", origin, message))]
    MalformedAnnotation { origin: String, message: String },

    #[snafu(display("invalid annotation JSON in {}: {}", origin, source))]
    Json {
        origin: String,
        #[snafu(source(from(serde_json::Error, Box::new)))]
        source: Box<serde_json::Error>,
    },

    #[snafu(display("unsupported annotation format: {}", path.display()))]
    UnsupportedFormat { path: PathBuf },
}

impl Classify for AnnotationError {
    fn kind(&self) -> ErrorKind {
        match self {
            AnnotationError::ReadFile { .. } | AnnotationError::WriteFile { .. } => ErrorKind::Io,
            AnnotationError::ParseXml { .. }
            | AnnotationError::MalformedAnnotation { .. }
            | AnnotationError::Json { .. }
            | AnnotationError::UnsupportedFormat { .. } => ErrorKind::MalformedAnnotation,
        }
    }
}

/// Known on-disk annotation shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationFormat {
    LidcXml,
    NormalizedJson,
}

impl AnnotationFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "xml" => Some(AnnotationFormat::LidcXml),
            "json" => Some(AnnotationFormat::NormalizedJson),
            _ => None,
        }
    }
}

/// Read an annotation file of any known format.
pub fn read_annotation<P: AsRef<Path>>(
    path: P,
    config: &AnnotationConfig,
) -> Result<ParsedAnnotation, AnnotationError> {
    let path = path.as_ref();
    match AnnotationFormat::from_path(path) {
        Some(AnnotationFormat::LidcXml) => parse_lidc_xml(path, config),
        Some(AnnotationFormat::NormalizedJson) => read_annotation_json(path),
        None => UnsupportedFormatSnafu { path }.fail(),
    }
}

/// Annotation files below `dir`: normalized JSON files first, then XML.
pub fn find_annotations<P: AsRef<Path>>(dir: P) -> std::io::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut found = dir.find_annotation_jsons()?;
    found.extend(dir.find_annotation_xmls()?);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("001.xml", Some(AnnotationFormat::LidcXml))]
    #[case("001.XML", Some(AnnotationFormat::LidcXml))]
    #[case("LIDC-IDRI-0001.json", Some(AnnotationFormat::NormalizedJson))]
    #[case("notes.txt", None)]
    #[case("noext", None)]
    fn test_format_from_path(#[case] path: &str, #[case] expected: Option<AnnotationFormat>) {
        assert_eq!(AnnotationFormat::from_path(path), expected);
    }

    #[test]
    fn test_unsupported_format() {
        let result = read_annotation("notes.txt", &AnnotationConfig::default());
        assert!(matches!(
            result,
            Err(AnnotationError::UnsupportedFormat { .. })
        ));
        assert_eq!(
            result.unwrap_err().kind(),
            ErrorKind::MalformedAnnotation
        );
    }
}
