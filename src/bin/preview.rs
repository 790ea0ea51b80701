use std::path::PathBuf;

use clap::Parser;
use image::{Rgb, RgbImage};
use lung_ct_prep::config::{ConfigError, PipelineConfig};
use lung_ct_prep::mask::{load_mask_with_shape, MaskError, MaskStats};
use lung_ct_prep::volume::{SeriesLayout, VolumeError, Window};
use ndarray::{Array2, ArrayView2, Axis};
use snafu::{ensure, Report, ResultExt, Snafu, Whatever};
use tracing::{error, info, Level};

/// Blend weight of the overlay colour on foreground pixels.
const OVERLAY_ALPHA: f32 = 0.5;
const OVERLAY_COLOR: [u8; 3] = [255, 0, 0];

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("{}", source))]
    Config {
        #[snafu(source(from(ConfigError, Box::new)))]
        source: Box<ConfigError>,
    },

    #[snafu(display("Series error on {}: {}", path.display(), source))]
    Series {
        path: PathBuf,
        #[snafu(source(from(VolumeError, Box::new)))]
        source: Box<VolumeError>,
    },

    #[snafu(display("{}", source))]
    Mask {
        #[snafu(source(from(MaskError, Box::new)))]
        source: Box<MaskError>,
    },

    #[snafu(display("Slice {} is out of range for a series of {} slices", index, depth))]
    SliceIndex { index: usize, depth: usize },

    #[snafu(display("Could not write {}: {}", path.display(), source))]
    WriteImage {
        path: PathBuf,
        #[snafu(source(from(image::ImageError, Box::new)))]
        source: Box<image::ImageError>,
    },
}

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Render a windowed CT slice, optionally with its tumor mask overlaid, as a PNG", long_about = None)]
struct Args {
    #[arg(help = "Series directory of one patient")]
    series_dir: PathBuf,

    #[arg(help = "Output PNG path")]
    output: PathBuf,

    #[arg(help = "Mask file ({patient_id}_mask.npy) to overlay", long = "mask", short = 'm')]
    mask: Option<PathBuf>,

    #[arg(
        help = "Slice index. Defaults to the slice with the most tumor pixels, or the middle slice",
        long = "slice",
        short = 's'
    )]
    slice: Option<usize>,

    #[arg(help = "Pipeline configuration file (TOML)", long = "config", short = 'c')]
    config: Option<PathBuf>,

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

/// Grey-level slice with foreground pixels tinted by the overlay colour.
fn render(hu: ArrayView2<i16>, mask: Option<ArrayView2<u8>>, window: &Window) -> RgbImage {
    let grey = window.apply_u8(&hu);
    let (rows, columns) = grey.dim();
    let mut image = RgbImage::new(columns as u32, rows as u32);
    for ((row, column), value) in grey.indexed_iter() {
        let mut pixel = [*value; 3];
        if mask.is_some_and(|m| m[[row, column]] != 0) {
            for (channel, overlay) in pixel.iter_mut().zip(OVERLAY_COLOR) {
                let blended =
                    (1.0 - OVERLAY_ALPHA) * *channel as f32 + OVERLAY_ALPHA * overlay as f32;
                *channel = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
        image.put_pixel(column as u32, row as u32, Rgb(pixel));
    }
    image
}

/// Slice with the most foreground pixels, if any.
fn busiest_slice(mask: &ndarray::Array3<u8>) -> Option<usize> {
    mask.axis_iter(Axis(0))
        .map(|slice| slice.iter().filter(|v| **v != 0).count())
        .enumerate()
        .filter(|(_, count)| *count > 0)
        .max_by_key(|(z, count)| (*count, std::cmp::Reverse(*z)))
        .map(|(z, _)| z)
}

fn run(args: Args) -> Result<usize, Error> {
    let config = PipelineConfig::load_or_default(args.config.as_ref()).context(ConfigSnafu)?;
    let window = config.volume.window;

    let layout = SeriesLayout::scan(&args.series_dir).context(SeriesSnafu {
        path: &args.series_dir,
    })?;
    let mask = args
        .mask
        .as_ref()
        .map(|path| load_mask_with_shape(path, layout.shape()))
        .transpose()
        .context(MaskSnafu)?;
    if let Some(mask) = &mask {
        let stats = MaskStats::from_mask(mask);
        info!(
            "Mask has {} tumor slices of {}",
            stats.tumor_slices.len(),
            stats.depth
        );
    }

    let index = args
        .slice
        .or_else(|| mask.as_ref().and_then(busiest_slice))
        .unwrap_or(layout.len() / 2);
    ensure!(
        index < layout.len(),
        SliceIndexSnafu {
            index,
            depth: layout.len()
        }
    );

    let hu: Array2<i16> = layout.load_slice(index).context(SeriesSnafu {
        path: &args.series_dir,
    })?;
    let mask_slice = mask.as_ref().map(|m| m.index_axis(Axis(0), index));
    let image = render(hu.view(), mask_slice, &window);
    image
        .save(&args.output)
        .context(WriteImageSnafu { path: &args.output })?;
    info!("Wrote slice {} to {}", index, args.output.display());
    Ok(index)
}
