use std::path::{Path, PathBuf};

use clap::Parser;
use indicatif::ParallelProgressIterator;
use lung_ct_prep::annotation::{
    parse_lidc_xml, parse_lidc_xml_as, write_annotation_json, AnnotationError, AnnotationStats,
    DropCounts,
};
use lung_ct_prep::config::{ConfigError, PipelineConfig};
use lung_ct_prep::file::{default_bar, AnnotationFileOperations};
use rayon::prelude::*;
use snafu::{Report, ResultExt, Snafu, Whatever};
use tracing::{error, info, warn, Level};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid source path: {}", path.display()))]
    InvalidSourcePath { path: PathBuf },

    #[snafu(display("No XML files found in source path: {}", path.display()))]
    NoSources { path: PathBuf },

    #[snafu(display("--patient-id requires a single XML file, got {}", path.display()))]
    PatientIdForDirectory { path: PathBuf },

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
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Convert LIDC XML annotations into normalized JSON", long_about = None)]
struct Args {
    #[arg(help = "Source path. Can be an LIDC XML file or a directory of them")]
    source: PathBuf,

    #[arg(help = "Output directory for {patient_id}.json files")]
    output: PathBuf,

    #[arg(help = "Pipeline configuration file (TOML)", long = "config", short = 'c')]
    config: Option<PathBuf>,

    #[arg(
        help = "Patient id for a single XML file. By default it is derived from the file name",
        long = "patient-id",
        short = 'p'
    )]
    patient_id: Option<String>,

    #[arg(
        help = "Keep contours marked as excluded regions (inclusion = FALSE)",
        long = "keep-exclusions",
        default_value_t = false
    )]
    keep_exclusions: bool,

    #[arg(
        help = "Fail if any XML file cannot be converted",
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

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Summary {
    files: usize,
    stats: AnnotationStats,
    dropped: DropCounts,
}

fn process(
    source: &Path,
    dest: &Path,
    patient_id: Option<&str>,
    config: &PipelineConfig,
) -> Result<(PathBuf, AnnotationStats, DropCounts), Error> {
    let parsed = match patient_id {
        Some(patient_id) => parse_lidc_xml_as(source, patient_id, &config.annotation),
        None => parse_lidc_xml(source, &config.annotation),
    }
    .context(AnnotationSnafu { path: source })?;

    if parsed.annotation.nodules.is_empty() {
        warn!("No nodule contours in {}", source.display());
    }
    let path =
        write_annotation_json(&parsed.annotation, dest).context(AnnotationSnafu { path: source })?;
    Ok((path, parsed.annotation.stats(), parsed.dropped))
}

fn run(args: Args) -> Result<Summary, Error> {
    let mut config = PipelineConfig::load_or_default(args.config.as_ref()).context(ConfigSnafu)?;
    config.annotation.keep_exclusions |= args.keep_exclusions;

    let sources = if args.source.is_dir() {
        if args.patient_id.is_some() {
            return PatientIdForDirectorySnafu { path: args.source }.fail();
        }
        args.source
            .find_annotation_xmls()
            .map_err(|_| Error::InvalidSourcePath {
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
    info!("Number of XML files found: {}", sources.len());

    let pb = default_bar(sources.len() as u64);
    pb.set_message("Converting annotations");

    let patient_id = args.patient_id.as_deref();
    let par_func = |source: &PathBuf| {
        process(source, &args.output, patient_id, &config).map_err(|e| {
            error!(
                "Error processing file {}: {}",
                source.display(),
                Report::from_error(&e)
            );
            e
        })
    };

    let results = if args.strict {
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

    let summary = results.iter().fold(
        Summary::default(),
        |acc, (_, stats, dropped)| Summary {
            files: acc.files + 1,
            stats: acc.stats + *stats,
            dropped: DropCounts {
                invalid_contours: acc.dropped.invalid_contours + dropped.invalid_contours,
                exclusions: acc.dropped.exclusions + dropped.exclusions,
                empty_nodules: acc.dropped.empty_nodules + dropped.empty_nodules,
            },
        },
    );
    info!(
        "Converted {} files: {} nodules, {} contours; dropped {} invalid contours, {} exclusions, {} empty nodules",
        summary.files,
        summary.stats.nodules,
        summary.stats.contours,
        summary.dropped.invalid_contours,
        summary.dropped.exclusions,
        summary.dropped.empty_nodules
    );
    Ok(summary)
}
