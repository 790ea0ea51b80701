use std::fmt;
use std::path::{Path, PathBuf};

use clap::Parser;
use lung_ct_prep::config::{ConfigError, PipelineConfig};
use lung_ct_prep::dataset::{
    split_patients, write_manifest, Cohort, DatasetError, PatientSplit, SampleIndex,
};
use lung_ct_prep::file::default_spinner;
use snafu::{Report, ResultExt, Snafu, Whatever};
use tracing::{error, info, warn, Level};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Invalid mask directory: {}", path.display()))]
    InvalidMaskDirectory {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("No masks found in: {}", path.display()))]
    NoPatients { path: PathBuf },

    #[snafu(display("{} patients were skipped", count))]
    SkippedPatients { count: usize },

    #[snafu(display("Failed to create directory: {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("Failed to write {}", path.display()))]
    WriteSplit {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("{}", source))]
    Config {
        #[snafu(source(from(ConfigError, Box::new)))]
        source: Box<ConfigError>,
    },

    #[snafu(display("Manifest error: {}", source))]
    Manifest {
        #[snafu(source(from(DatasetError, Box::new)))]
        source: Box<DatasetError>,
    },
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let format_str = match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        };
        write!(f, "{}", format_str)
    }
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Split a cohort and write balanced training and validation sample manifests", long_about = None)]
struct Args {
    #[arg(help = "Output directory for train/val manifests and split.json")]
    output: PathBuf,

    #[arg(help = "Pipeline configuration file (TOML)", long = "config", short = 'c')]
    config: Option<PathBuf>,

    #[arg(
        help = "Directory of patient series. Defaults to paths.raw_dir of the configuration",
        long = "raw-dir",
        short = 'r'
    )]
    raw_dir: Option<PathBuf>,

    #[arg(
        help = "Directory of {patient_id}_mask.npy files. Defaults to paths.mask_dir of the configuration",
        long = "mask-dir",
        short = 'm'
    )]
    mask_dir: Option<PathBuf>,

    #[arg(help = "Fraction of patients held out for validation", long = "val-fraction")]
    val_fraction: Option<f64>,

    #[arg(help = "Seed for the split and background sampling", long = "seed", short = 's')]
    seed: Option<u64>,

    #[arg(
        help = "Manifest format",
        long = "format",
        short = 'f',
        value_parser = clap::value_parser!(OutputFormat),
        default_value_t = OutputFormat::default(),
    )]
    format: OutputFormat,

    #[arg(
        help = "Fail if any patient is skipped",
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
        Level::INFO
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

#[derive(Debug)]
struct Outcome {
    split: PatientSplit,
    train: SampleIndex,
    val: SampleIndex,
}

fn write_outputs(outcome: &Outcome, dest: &Path, format: OutputFormat) -> Result<(), Error> {
    std::fs::create_dir_all(dest).context(CreateDirSnafu { path: dest })?;

    let split_path = dest.join("split.json");
    let split_json = serde_json::to_string_pretty(&outcome.split)
        .map_err(std::io::Error::other)
        .context(WriteSplitSnafu { path: &split_path })?;
    std::fs::write(&split_path, split_json).context(WriteSplitSnafu { path: &split_path })?;

    for (name, index) in [("train", &outcome.train), ("val", &outcome.val)] {
        let path = dest.join(format!("{name}.{format}"));
        write_manifest(index.samples(), &path).context(ManifestSnafu)?;
        info!("Wrote {} samples to {}", index.len(), path.display());
    }
    Ok(())
}

fn run(args: Args) -> Result<Outcome, Error> {
    let mut config = PipelineConfig::load_or_default(args.config.as_ref()).context(ConfigSnafu)?;
    if let Some(val_fraction) = args.val_fraction {
        config.dataset.val_fraction = val_fraction;
    }
    if let Some(seed) = args.seed {
        config.dataset.seed = seed;
    }
    config.dataset.validate().context(ConfigSnafu)?;

    let raw_dir = args.raw_dir.unwrap_or(config.paths.raw_dir.clone());
    let mask_dir = args.mask_dir.unwrap_or(config.paths.mask_dir.clone());

    let cohort = Cohort::from_mask_dir(&raw_dir, &mask_dir)
        .context(InvalidMaskDirectorySnafu { path: &mask_dir })?;
    if cohort.patient_ids.is_empty() {
        return NoPatientsSnafu { path: mask_dir }.fail();
    }
    info!("Number of patients with masks: {}", cohort.patient_ids.len());

    let split = split_patients(
        &cohort.patient_ids,
        config.dataset.val_fraction,
        config.dataset.seed,
    );
    info!(
        "Split into {} training and {} validation patients",
        split.train.len(),
        split.val.len()
    );

    let spinner = default_spinner();
    spinner.set_message("Indexing samples");
    let train_cohort = cohort.with_patients(split.train.clone());
    let val_cohort = cohort.with_patients(split.val.clone());
    let (train, val) = rayon::join(
        || SampleIndex::build(&train_cohort, &config.dataset),
        || SampleIndex::build(&val_cohort, &config.dataset),
    );
    spinner.finish_and_clear();

    let skipped = train.skipped().len() + val.skipped().len();
    for s in train.skipped().iter().chain(val.skipped()) {
        warn!("Skipped {}: {}", s.patient_id, s.reason);
    }
    if args.strict && skipped > 0 {
        return SkippedPatientsSnafu { count: skipped }.fail();
    }

    let outcome = Outcome { split, train, val };
    write_outputs(&outcome, &args.output, args.format)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::{run, Args, Error, OutputFormat};
    use lung_ct_prep::dataset::{read_manifest, SamplePolicy};
    use lung_ct_prep::mask::save_mask;
    use ndarray::{s, Array3};
    use lung_ct_prep::test_support::{evenly_spaced, write_ct_series};
    use rstest::rstest;
    use std::path::Path;

    const DEPTH: usize = 6;

    fn write_series(dir: &Path, depth: usize) {
        let template = dicom_test_files::path("pydicom/CT_small.dcm").unwrap();
        write_ct_series(&template, dir, &evenly_spaced(depth, 2.5)).unwrap();
    }

    /// Five patients, each with one tumor slice.
    fn cohort(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let raw_dir = root.join("raw");
        let mask_dir = root.join("masks");
        for i in 1..=5 {
            let patient_id = format!("LIDC-IDRI-{i:04}");
            write_series(&raw_dir.join(&patient_id).join("series"), DEPTH);
            let mut mask = Array3::<u8>::zeros((DEPTH, 128, 128));
            mask.slice_mut(s![i % DEPTH, 10..20, 10..20]).fill(1);
            save_mask(&mask, &mask_dir, &patient_id).unwrap();
        }
        (raw_dir, mask_dir)
    }

    fn args(output: &Path, raw_dir: &Path, mask_dir: &Path) -> Args {
        Args {
            output: output.to_path_buf(),
            config: None,
            raw_dir: Some(raw_dir.to_path_buf()),
            mask_dir: Some(mask_dir.to_path_buf()),
            val_fraction: None,
            seed: None,
            format: OutputFormat::Csv,
            strict: true,
            verbose: false,
        }
    }

    #[rstest]
    #[case(OutputFormat::Csv)]
    #[case(OutputFormat::Parquet)]
    fn test_main(#[case] format: OutputFormat) {
        let temp_dir = tempfile::tempdir().unwrap();
        let (raw_dir, mask_dir) = cohort(temp_dir.path());
        let output = temp_dir.path().join("index");

        let outcome = run(Args {
            format,
            ..args(&output, &raw_dir, &mask_dir)
        })
        .unwrap();
        assert_eq!(outcome.split.train.len(), 4);
        assert_eq!(outcome.split.val.len(), 1);
        // One tumor and two background slices per patient
        assert_eq!(outcome.train.len(), 12);
        assert_eq!(outcome.val.len(), 3);

        assert!(output.join("split.json").is_file());
        let train = read_manifest(output.join(format!("train.{format}"))).unwrap();
        assert_eq!(train, outcome.train.samples());
        assert_eq!(
            train
                .iter()
                .filter(|s| s.policy == SamplePolicy::Tumor)
                .count(),
            4
        );
        for sample in read_manifest(output.join(format!("val.{format}"))).unwrap() {
            assert!(outcome.split.val.contains(&sample.patient_id));
        }
    }

    #[test]
    fn test_strict_skips() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (raw_dir, mask_dir) = cohort(temp_dir.path());
        std::fs::remove_dir_all(raw_dir.join("LIDC-IDRI-0003")).unwrap();
        let output = temp_dir.path().join("index");

        let result = run(args(&output, &raw_dir, &mask_dir));
        assert!(matches!(
            result,
            Err(Error::SkippedPatients { count: 1 })
        ));

        let outcome = run(Args {
            strict: false,
            ..args(&output, &raw_dir, &mask_dir)
        })
        .unwrap();
        assert_eq!(outcome.train.len() + outcome.val.len(), 12);
    }

    #[test]
    fn test_no_patients() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mask_dir = temp_dir.path().join("masks");
        std::fs::create_dir_all(&mask_dir).unwrap();
        let result = run(args(temp_dir.path(), temp_dir.path(), &mask_dir));
        assert!(matches!(result, Err(Error::NoPatients { .. })));
    }
}
