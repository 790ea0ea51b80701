use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::ParallelProgressIterator;
use lung_ct_prep::annotation::{find_annotations, read_annotation, AnnotationError};
use lung_ct_prep::config::{ConfigError, PipelineConfig};
use lung_ct_prep::dataset::resolve_series_dir;
use lung_ct_prep::file::default_bar;
use lung_ct_prep::mask::{build_mask_for_layout, save_mask, ContourCounts, MaskError};
use lung_ct_prep::metadata::SliceKeyScheme;
use lung_ct_prep::volume::{SeriesLayout, VolumeError};
use rayon::prelude::*;
use snafu::{Report, ResultExt, Snafu, Whatever};
use tracing::{error, info, Level};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("No annotation files found in source path: {}", path.display()))]
    NoSources { path: PathBuf },

    #[snafu(display("{}", source))]
    Config {
        #[snafu(source(from(ConfigError, Box::new)))]
        source: Box<ConfigError>,
    },

    #[snafu(display("Annotation error on {}: {}", path.display(), source))]
    Annotation {
        path: PathBuf,
        #[snafu(source(from(AnnotationError, Box::new)))]
        source: Box<AnnotationError>,
    },

    #[snafu(display("No series directory for patient {} in {}", patient_id, path.display()))]
    NoSeries { patient_id: String, path: PathBuf },

    #[snafu(display("Series error for patient {}: {}", patient_id, source))]
    Series {
        patient_id: String,
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display(
        "{} contours of patient {} have no {} key; try --slice-key z-position",
        count,
        patient_id,
        scheme
    ))]
    UnkeyedContours {
        patient_id: String,
        count: usize,
        scheme: SliceKeyScheme,
    },

    #[snafu(display("Mask error for patient {}: {}", patient_id, source))]
    Mask {
        patient_id: String,
        #[snafu(source(from(MaskError, Box::new)))]
        source: Box<MaskError>,
    },
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Rasterize radiologist contours into per-patient binary tumor masks", long_about = None)]
struct Args {
    #[arg(help = "Annotation source. Can be an LIDC XML file, a normalized JSON file, or a directory of them")]
    source: PathBuf,

    #[arg(help = "Directory holding one subdirectory per patient, each with one or more series directories")]
    raw_dir: PathBuf,

    #[arg(help = "Output directory for {patient_id}_mask.npy files")]
    output: PathBuf,

    #[arg(help = "Pipeline configuration file (TOML)", long = "config", short = 'c')]
    config: Option<PathBuf>,

    #[arg(
        help = "How contours are matched to slices. Overrides the configuration file",
        long = "slice-key",
        short = 'k',
        value_parser = clap::value_parser!(SliceKeyScheme),
    )]
    slice_key: Option<SliceKeyScheme>,

    #[arg(
        help = "Fail if any annotation cannot be turned into a mask",
        long = "strict",
        default_value_t = false
    )]
    strict: bool,

    #[arg(
        help = "Enable verbose logging",
        long = "verbose",
        short = 'v',
        default_value_t = false
    )]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(args).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

#[derive(Debug, Clone, PartialEq)]
struct MaskOutcome {
    patient_id: String,
    path: PathBuf,
    tumor_slices: usize,
    counts: ContourCounts,
}

fn process<P: AsRef<Path>>(
    source: P,
    raw_dir: P,
    dest: P,
    config: &PipelineConfig,
    strict: bool,
) -> Result<MaskOutcome, Error> {
    let source = source.as_ref();
    let parsed =
        read_annotation(source, &config.annotation).context(AnnotationSnafu { path: source })?;
    let annotation = parsed.annotation;
    let patient_id = annotation.patient_id.as_str();

    let series_dir =
        resolve_series_dir(raw_dir.as_ref(), patient_id).ok_or_else(|| Error::NoSeries {
            patient_id: patient_id.to_string(),
            path: raw_dir.as_ref().join(patient_id),
        })?;
    let layout = SeriesLayout::scan(&series_dir).context(SeriesSnafu { patient_id })?;

    let report = build_mask_for_layout(&annotation, &layout, config.mask.slice_key);
    if strict && report.counts.unkeyed > 0 {
        return UnkeyedContoursSnafu {
            patient_id,
            count: report.counts.unkeyed,
            scheme: config.mask.slice_key,
        }
        .fail();
    }
    let stats = report.stats();
    let path = save_mask(&report.mask, dest.as_ref(), patient_id).context(MaskSnafu { patient_id })?;
    info!(
        "Wrote {} ({} tumor slices of {}, {} contours, {} unkeyed, {} unmatched, {} dropped on read)",
        path.display(),
        stats.tumor_slices.len(),
        stats.depth,
        report.counts.rasterized,
        report.counts.unkeyed,
        report.counts.unmatched,
        parsed.dropped.total()
    );

    Ok(MaskOutcome {
        patient_id: patient_id.to_string(),
        path,
        tumor_slices: stats.tumor_slices.len(),
        counts: report.counts,
    })
}

fn run(args: Args) -> Result<Vec<MaskOutcome>, Error> {
    let mut config = PipelineConfig::load_or_default(args.config.as_ref()).context(ConfigSnafu)?;
    if let Some(scheme) = args.slice_key {
        config.mask.slice_key = scheme;
    }

    let sources = if args.source.is_dir() {
        find_annotations(&args.source).map_err(|_| Error::InvalidSourcePath {
            path: args.source.clone(),
        })?
    } else if args.source.is_file() {
        vec![args.source.clone()]
    } else {
        return InvalidSourcePathSnafu { path: args.source }.fail();
    };
    if sources.is_empty() {
        return NoSourcesSnafu { path: args.source }.fail();
    }
    info!("Number of annotation files found: {}", sources.len());

    let pb = default_bar(sources.len() as u64);
    pb.set_message("Building masks");

    let par_func = |source: &PathBuf| {
        process(source, &args.raw_dir, &args.output, &config, args.strict).map_err(|e| {
            error!(
                "Error processing annotation {}: {}",
                source.display(),
                Report::from_error(&e)
            );
            e
        })
    };

    let outcomes = if args.strict {
        sources
            .par_iter()
            .progress_with(pb)
            .map(par_func)
            .collect::<Result<Vec<_>, _>>()?
    } else {
        sources
            .par_iter()
            .progress_with(pb)
            .filter_map(|source| par_func(source).ok())
            .collect::<Vec<_>>()
    };

    let tumor_slices: usize = outcomes.iter().map(|o| o.tumor_slices).sum();
    info!(
        "Wrote {} masks with {} tumor slices in total",
        outcomes.len(),
        tumor_slices
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::{run, Args, Error};
    use lung_ct_prep::annotation::{write_annotation_json, Annotation, ContourSlice, Nodule, Point};
    use lung_ct_prep::mask::{load_mask, tumor_slices};
    use lung_ct_prep::metadata::SliceKeyScheme;
    use lung_ct_prep::test_support::{evenly_spaced, series_sop_uid, write_ct_series};
    use rstest::rstest;
    use std::path::Path;

    fn write_series(dir: &Path, depth: usize) {
        let template = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        write_ct_series(&template, dir, &evenly_spaced(depth, 2.5)).unwrap();
    }

    fn annotation(patient_id: &str) -> Annotation {
        let square = vec![Point(2, 2), Point(6, 2), Point(6, 6), Point(2, 6)];
        Annotation {
            patient_id: patient_id.to_string(),
            series_instance_uid: "1.2.3".to_string(),
            nodules: vec![Nodule {
                nodule_id: "Nodule 001".to_string(),
                radiologist_id: "reader-1".to_string(),
                slices: vec![ContourSlice {
                    sop_uid: Some(series_sop_uid(2)),
                    z_position: 5.0,
                    contour: square,
                }],
            }],
        }
    }

    #[rstest]
    #[case(SliceKeyScheme::SopInstanceUid)]
    #[case(SliceKeyScheme::ZPosition)]
    fn test_main(#[case] scheme: SliceKeyScheme) {
        let temp_dir = tempfile::tempdir().unwrap();
        let raw_dir = temp_dir.path().join("raw");
        let annotation_dir = temp_dir.path().join("annotations");
        let output_dir = temp_dir.path().join("masks");
        write_series(&raw_dir.join("LIDC-IDRI-0001").join("series"), 5);
        write_annotation_json(&annotation("LIDC-IDRI-0001"), &annotation_dir).unwrap();

        let args = Args {
            source: annotation_dir,
            raw_dir,
            output: output_dir.clone(),
            config: None,
            slice_key: Some(scheme),
            strict: true,
            verbose: false,
        };
        let outcomes = run(args).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].counts.rasterized, 1);

        let mask = load_mask(output_dir.join("LIDC-IDRI-0001_mask.npy")).unwrap();
        assert_eq!(mask.dim(), (5, 128, 128));
        assert_eq!(tumor_slices(&mask), vec![2]);
        assert_eq!(mask.iter().filter(|v| **v == 1).count(), 16);
    }

    fn z_only(annotation: Annotation) -> Annotation {
        let nodules = annotation
            .nodules
            .into_iter()
            .map(|nodule| Nodule {
                slices: nodule
                    .slices
                    .into_iter()
                    .map(|slice| ContourSlice {
                        sop_uid: None,
                        ..slice
                    })
                    .collect(),
                ..nodule
            })
            .collect();
        Annotation {
            nodules,
            ..annotation
        }
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_z_only_under_sop_scheme(#[case] strict: bool) {
        let temp_dir = tempfile::tempdir().unwrap();
        let raw_dir = temp_dir.path().join("raw");
        let annotation_dir = temp_dir.path().join("annotations");
        let output_dir = temp_dir.path().join("masks");
        write_series(&raw_dir.join("LIDC-IDRI-0003").join("series"), 5);
        write_annotation_json(&z_only(annotation("LIDC-IDRI-0003")), &annotation_dir).unwrap();

        let args = Args {
            source: annotation_dir,
            raw_dir,
            output: output_dir.clone(),
            config: None,
            slice_key: None,
            strict,
            verbose: false,
        };
        match strict {
            true => {
                let result = run(args);
                assert!(matches!(
                    result,
                    Err(Error::UnkeyedContours { count: 1, scheme: SliceKeyScheme::SopInstanceUid, .. })
                ));
                assert!(!output_dir.join("LIDC-IDRI-0003_mask.npy").exists());
            }
            false => {
                let outcomes = run(args).unwrap();
                assert_eq!(outcomes[0].counts.unkeyed, 1);
                assert_eq!(outcomes[0].counts.unmatched, 0);
                assert_eq!(outcomes[0].tumor_slices, 0);
            }
        }
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_missing_series(#[case] strict: bool) {
        let temp_dir = tempfile::tempdir().unwrap();
        let annotation_dir = temp_dir.path().join("annotations");
        write_annotation_json(&annotation("LIDC-IDRI-0002"), &annotation_dir).unwrap();

        let args = Args {
            source: annotation_dir,
            raw_dir: temp_dir.path().join("raw"),
            output: temp_dir.path().join("masks"),
            config: None,
            slice_key: None,
            strict,
            verbose: false,
        };
        match strict {
            true => assert!(matches!(run(args), Err(Error::NoSeries { .. }))),
            false => assert!(run(args).unwrap().is_empty()),
        }
    }

    #[test]
    fn test_cli() {
        use clap::CommandFactory;
        let command = Args::command();
        command.clone().debug_assert();
        assert_eq!(command.get_author(), None);
        assert_eq!(command.get_version(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_invalid_source() {
        let temp_dir = tempfile::tempdir().unwrap();
        let args = Args {
            source: temp_dir.path().join("missing"),
            raw_dir: temp_dir.path().to_path_buf(),
            output: temp_dir.path().to_path_buf(),
            config: None,
            slice_key: None,
            strict: false,
            verbose: false,
        };
        assert!(matches!(run(args), Err(Error::InvalidSourcePath { .. })));
    }
}
