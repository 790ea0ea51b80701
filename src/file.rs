use dicom::dictionary_std::tags;
use dicom::object::ReadError;
use dicom::object::{open_file, DefaultDicomObject, OpenFileOptions};
use itertools::Itertools;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rust_search::SearchBuilder;

pub const DICM_PREFIX: &[u8; 4] = b"DICM";
pub const DICM_PREFIX_LOCATION: u64 = 128;

/// Suffix appended to the patient identifier to name its mask file.
pub const MASK_SUFFIX: &str = "_mask.npy";

type IOResult<T> = Result<T, std::io::Error>;

pub fn default_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

pub fn default_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner
}

fn not_a_directory() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, "Not a directory")
}

fn has_extension<P: AsRef<Path>>(path: P, candidates: &[&str]) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| candidates.iter().any(|c| c.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Recursively list regular files under `dir` matching `filter`, sorted by path.
fn search_files<F>(dir: &Path, filter: F) -> IOResult<Vec<PathBuf>>
where
    F: Fn(&Path) -> bool,
{
    if !dir.is_dir() {
        return Err(not_a_directory());
    }
    let result = SearchBuilder::default()
        .location(dir)
        .build()
        .map(PathBuf::from)
        .filter(|file| filter(file))
        .sorted()
        .dedup()
        .collect();
    Ok(result)
}

pub trait SourceFileOperations
where
    Self: AsRef<Path>,
{
    /// Read a text file with one entry per line. Blank lines and `#` comments are skipped.
    fn read_lines(&self) -> IOResult<Vec<String>> {
        let reader = BufReader::new(File::open(self.as_ref())?);
        reader
            .lines()
            .filter_map(|line| match line {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        None
                    } else {
                        Some(Ok(line.to_string()))
                    }
                }
                Err(e) => Some(Err(e)),
            })
            .collect()
    }
}

impl<P: AsRef<Path>> SourceFileOperations for P {}

pub trait DicomFileOperations
where
    Self: AsRef<Path>,
{
    /// Check if a file has a DICM prefix.
    /// This will only return an error if the file cannot be opened.
    /// Any other errors mapped to `false`.
    fn has_dicm_prefix(&self) -> IOResult<bool> {
        let mut reader = File::open(self.as_ref())?;
        let mut buffer = [0; DICM_PREFIX.len()];
        reader
            .seek(SeekFrom::Start(DICM_PREFIX_LOCATION))
            .and_then(|_| reader.read_exact(&mut buffer))
            .map_or(Ok(false), |_| Ok(&buffer == DICM_PREFIX))
    }

    /// Check if a file has a DICOM extension.
    fn has_dicom_extension(&self) -> bool {
        let path = self.as_ref();
        if let Some(ext) = path.extension() {
            return ext == "dcm" || ext == "dicom" || ext == "DCM" || ext == "DICOM";
        }
        false
    }

    /// Check if a path is a DICOM file as efficiently as possible.
    /// The function will use the file extension if available, otherwise it will check the DICM prefix.
    fn is_dicom_file(&self) -> IOResult<bool> {
        let path = self.as_ref();
        if self.has_dicom_extension() {
            Ok(path.is_file())
        } else if path.extension().is_some() || path.is_dir() {
            Ok(false)
        } else {
            self.has_dicm_prefix()
        }
    }

    /// Similar to `is_dicom_file`, but returns a default value if an error occurs.
    fn is_dicom_file_or(&self, default: bool) -> bool {
        self.is_dicom_file().unwrap_or(default)
    }

    /// Find all DICOM files below a directory, sorted by path.
    fn find_dicoms(&self) -> IOResult<Vec<PathBuf>> {
        search_files(self.as_ref(), |file| file.is_dicom_file_or(false))
    }

    /// Find all DICOM files in a directory, with a progress spinner.
    fn find_dicoms_with_spinner(&self) -> IOResult<Vec<PathBuf>> {
        let spinner = default_spinner();
        spinner.set_message(format!(
            "Searching for DICOM files in {}",
            self.as_ref().display()
        ));
        let result = self.find_dicoms();
        spinner.finish_and_clear();
        result
    }

    /// Immediate subdirectories, sorted by name. Each is treated as one series.
    fn series_dirs(&self) -> IOResult<Vec<PathBuf>> {
        let dir = self.as_ref();
        if !dir.is_dir() {
            return Err(not_a_directory());
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Read the DICOM file.
    fn dcmread(&self) -> Result<DefaultDicomObject, ReadError> {
        open_file(self.as_ref())
    }

    /// Read the DICOM file up to, but excluding, the pixel data.
    fn dcmread_header(&self) -> Result<DefaultDicomObject, ReadError> {
        OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(self.as_ref())
    }
}

impl<P: AsRef<Path>> DicomFileOperations for P {}

pub trait AnnotationFileOperations
where
    Self: AsRef<Path>,
{
    /// Check if a path is an XML annotation file.
    fn is_annotation_xml(&self) -> bool {
        self.as_ref().is_file() && has_extension(self, &["xml"])
    }

    /// Check if a path is a normalized JSON annotation file.
    fn is_annotation_json(&self) -> bool {
        self.as_ref().is_file() && has_extension(self, &["json"])
    }

    /// Find all XML annotation files below a directory, sorted by path.
    fn find_annotation_xmls(&self) -> IOResult<Vec<PathBuf>> {
        search_files(self.as_ref(), |file| file.is_annotation_xml())
    }

    /// Find all normalized JSON annotation files below a directory, sorted by path.
    fn find_annotation_jsons(&self) -> IOResult<Vec<PathBuf>> {
        search_files(self.as_ref(), |file| file.is_annotation_json())
    }
}

impl<P: AsRef<Path>> AnnotationFileOperations for P {}

/// Path of the mask file for a patient inside `mask_dir`.
pub fn mask_path<P: AsRef<Path>>(mask_dir: P, patient_id: &str) -> PathBuf {
    mask_dir.as_ref().join(format!("{patient_id}{MASK_SUFFIX}"))
}

/// Patient identifiers with a mask file in `mask_dir`, sorted.
pub fn patients_from_mask_dir<P: AsRef<Path>>(mask_dir: P) -> IOResult<Vec<String>> {
    let dir = mask_dir.as_ref();
    if !dir.is_dir() {
        return Err(not_a_directory());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(id) = name.strip_suffix(MASK_SUFFIX) {
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[rstest]
    #[case::empty_file(vec![], false)]
    #[case::dicm_prefix(b"DICM".to_vec(), true)]
    #[case::wrong_prefix(b"NOT_DICM".to_vec(), false)]
    fn test_has_dicm_prefix(#[case] contents: Vec<u8>, #[case] expected: bool) {
        let mut temp = NamedTempFile::new().unwrap();
        temp.seek(SeekFrom::Start(DICM_PREFIX_LOCATION)).unwrap();
        temp.write_all(&contents).unwrap();

        let result = temp.path().has_dicm_prefix().unwrap();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_has_dicm_prefix_real_dicom() {
        let dicom_file_path = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        let result = dicom_file_path.has_dicm_prefix().unwrap();
        assert!(result);
    }

    #[rstest]
    #[case::no_extension("test", false)]
    #[case::wrong_extension("test.txt", false)]
    #[case::dcm_extension("test.dcm", true)]
    #[case::dicom_extension("test.dicom", true)]
    #[case::dcm_extension_uppercase("test.DCM", true)]
    #[case::mixed_case("test.DiCoM", false)]
    fn test_has_dicom_extension(#[case] path: &str, #[case] expected: bool) {
        let path = PathBuf::from(path);
        assert_eq!(path.has_dicom_extension(), expected);
    }

    #[rstest]
    #[case::no_spinner(false)]
    #[case::spinner(true)]
    fn test_find_dicom_files(#[case] spinner: bool) {
        let temp_dir = tempfile::tempdir().unwrap();

        let dicom_path = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        let dicom_dest = temp_dir.path().join("test.dcm");
        std::fs::copy(&dicom_path, &dicom_dest).unwrap();

        let text_path = temp_dir.path().join("test.txt");
        std::fs::write(&text_path, "not a DICOM file").unwrap();

        // Series files are often nested one level deeper
        let sub_dir = temp_dir.path().join("subdir");
        std::fs::create_dir(&sub_dir).unwrap();
        let sub_dicom = sub_dir.join("sub.dcm");
        std::fs::copy(&dicom_path, &sub_dicom).unwrap();

        let files = match spinner {
            true => temp_dir.path().find_dicoms_with_spinner().unwrap(),
            false => temp_dir.path().find_dicoms().unwrap(),
        };
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p == &dicom_dest));
        assert!(files.iter().any(|p| p == &sub_dicom));
    }

    #[test]
    fn test_find_dicoms_not_a_directory() {
        let temp = NamedTempFile::new().unwrap();
        assert!(temp.path().find_dicoms().is_err());
    }

    #[test]
    fn test_series_dirs_sorted() {
        let temp_dir = tempfile::tempdir().unwrap();
        for name in ["b", "a", "c"] {
            std::fs::create_dir(temp_dir.path().join(name)).unwrap();
        }
        std::fs::write(temp_dir.path().join("file.txt"), "x").unwrap();

        let dirs = temp_dir.path().series_dirs().unwrap();
        let names: Vec<_> = dirs
            .iter()
            .map(|d| d.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_find_annotations() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("001.xml"), "<a/>").unwrap();
        std::fs::write(temp_dir.path().join("002.XML"), "<a/>").unwrap();
        std::fs::write(temp_dir.path().join("LIDC-IDRI-0001.json"), "{}").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        let xmls = temp_dir.path().find_annotation_xmls().unwrap();
        let jsons = temp_dir.path().find_annotation_jsons().unwrap();
        assert_eq!(xmls.len(), 2);
        assert_eq!(jsons.len(), 1);
    }

    #[test]
    fn test_read_lines() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "LIDC-IDRI-0001").unwrap();
        writeln!(temp).unwrap();
        writeln!(temp, "# comment").unwrap();
        writeln!(temp, "  LIDC-IDRI-0002  ").unwrap();
        temp.flush().unwrap();

        let lines = temp.path().read_lines().unwrap();
        assert_eq!(lines, vec!["LIDC-IDRI-0001", "LIDC-IDRI-0002"]);
    }

    #[test]
    fn test_patients_from_mask_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(mask_path(temp_dir.path(), "LIDC-IDRI-0005"), b"").unwrap();
        std::fs::write(mask_path(temp_dir.path(), "LIDC-IDRI-0001"), b"").unwrap();
        std::fs::write(temp_dir.path().join("other.npy"), b"").unwrap();

        let ids = patients_from_mask_dir(temp_dir.path()).unwrap();
        assert_eq!(ids, vec!["LIDC-IDRI-0001", "LIDC-IDRI-0005"]);
    }
}
