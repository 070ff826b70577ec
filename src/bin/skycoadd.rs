use std::process;
use std::time::Instant;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use skycoadd::calibration::archive::CsvCalibrationArchive;
use skycoadd::coadder::{CalibrationSource, CoaddParams, Coadder};
use skycoadd::constants::{
    DEFAULT_BAND, DEFAULT_ITERATIONS, DEFAULT_NSIDE, DEFAULT_NUM_SEGMENTS,
    DEFAULT_REFINEMENT_STEPS, GALACTIC_BAND_MAX, GALACTIC_BAND_MIN,
};
use skycoadd::healpix::Pixelization;
use skycoadd::logging::setup_logging;
use skycoadd::mask::Mask;
use skycoadd::segments::csv_reader::{CsvSegmentSource, CsvTemplateSource};
use skycoadd::skymap::CsvMapStore;
use skycoadd::smoothing::moving_average::{BoundaryPolicy, MovingAverageParams};
use skycoadd::smoothing::{CalibrationCurves, SmoothingStrategy, SplineParams, TemporalSmoother};
use skycoadd::CoaddError;

#[derive(Parser)]
#[command(name = "skycoadd", about = "Iterative self-calibration and full-sky coaddition")]
struct Cli {
    /// Base log filter, overridden by RUST_LOG.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate and coadd every segment over several iterations.
    Coadd {
        /// Directory of segment tables.
        #[arg(long)]
        data_dir: Utf8PathBuf,

        /// Directory of per-segment template maps.
        #[arg(long)]
        template_dir: Utf8PathBuf,

        /// Dense defect map (non-zero pixels are excluded).
        #[arg(long)]
        defect_mask: Utf8PathBuf,

        /// Output directory for maps and archived calibrations.
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// HEALPix resolution.
        #[arg(long, default_value_t = DEFAULT_NSIDE)]
        nside: u32,

        /// Instrument band.
        #[arg(long, default_value_t = DEFAULT_BAND)]
        band: u8,

        /// Size of the segment universe.
        #[arg(long, default_value_t = DEFAULT_NUM_SEGMENTS)]
        num_segments: usize,

        /// Outer iterations.
        #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
        iterations: usize,

        /// Fit/adjust rounds per segment.
        #[arg(long, default_value_t = DEFAULT_REFINEMENT_STEPS)]
        refinement_steps: usize,

        /// Log and skip segments that fail to load.
        #[arg(long)]
        skip_failed: bool,

        /// Directory holding gain/offset curves to use instead of fitting.
        #[arg(long, conflicts_with = "moving_average")]
        prior: Option<Utf8PathBuf>,

        /// Smooth each iteration's calibration with a moving average of this many neighbours
        /// (25 when given without a value).
        #[arg(long, num_args = 0..=1, default_missing_value = "25")]
        moving_average: Option<usize>,

        /// Wrap the moving-average window around the segment axis instead of truncating it.
        #[arg(long, requires = "moving_average")]
        wrap: bool,
    },

    /// Fit smoothing curves on an archived iteration.
    Smooth {
        /// Directory of archived calibration tables.
        #[arg(long)]
        archive: Utf8PathBuf,

        /// Iteration to smooth.
        #[arg(long)]
        iteration: usize,

        /// Output directory for the curves.
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// Residual target of the gain curve.
        #[arg(long)]
        gain_smoothing: Option<f64>,

        /// Residual target of the offset curve.
        #[arg(long)]
        offset_smoothing: Option<f64>,

        /// Z-score rejection threshold.
        #[arg(long)]
        zscore_threshold: Option<f64>,
    },
}

struct CoaddArgs {
    data_dir: Utf8PathBuf,
    template_dir: Utf8PathBuf,
    defect_mask: Utf8PathBuf,
    output: Utf8PathBuf,
    nside: u32,
    band: u8,
    num_segments: usize,
    iterations: usize,
    refinement_steps: usize,
    skip_failed: bool,
    prior: Option<Utf8PathBuf>,
    moving_average: Option<usize>,
    wrap: bool,
}

fn cmd_coadd(args: CoaddArgs) -> Result<(), CoaddError> {
    let pixelization = Pixelization::new(args.nside);
    let mask = Mask::from_defect_file(
        &pixelization,
        &args.defect_mask,
        GALACTIC_BAND_MIN,
        GALACTIC_BAND_MAX,
    )?;

    let calibration_source = match (&args.prior, args.moving_average) {
        (Some(dir), _) => CalibrationSource::Prior(CalibrationCurves::load(dir)?),
        (None, Some(window)) => {
            let boundary = if args.wrap {
                BoundaryPolicy::Wrap
            } else {
                BoundaryPolicy::Clamp
            };
            CalibrationSource::SmoothedEachIteration(SmoothingStrategy::MovingAverage(
                MovingAverageParams { window, boundary },
            ))
        }
        (None, None) => CalibrationSource::Fitted,
    };

    let params = CoaddParams::builder()
        .num_segments(args.num_segments)
        .iterations(args.iterations)
        .refinement_steps(args.refinement_steps)
        .band(args.band)
        .skip_failed_segments(args.skip_failed)
        .calibration_source(calibration_source)
        .build()?;

    let segments = CsvSegmentSource::new(args.data_dir.clone(), args.band);
    let templates = CsvTemplateSource::new(args.template_dir.clone(), args.band, pixelization.npix());
    let mut store = CsvMapStore::new(args.output.clone())?;
    let mut archive = CsvCalibrationArchive::new(args.output.join("fitvals"))?;

    let outcome =
        Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive).run()?;
    if let Some(stats) = outcome.history.latest().and_then(|t| t.stats()) {
        info!("Final calibration:\n{stats:#}");
    }
    info!(
        "{} of {} pixels covered by the final map",
        outcome.final_map.covered_pixels(),
        outcome.final_map.npix()
    );
    Ok(())
}

fn cmd_smooth(
    archive_dir: Utf8PathBuf,
    iteration: usize,
    output: Utf8PathBuf,
    gain_smoothing: Option<f64>,
    offset_smoothing: Option<f64>,
    zscore_threshold: Option<f64>,
) -> Result<(), CoaddError> {
    let defaults = SplineParams::default();
    let params = SplineParams {
        gain_smoothing: gain_smoothing.unwrap_or(defaults.gain_smoothing),
        offset_smoothing: offset_smoothing.unwrap_or(defaults.offset_smoothing),
        zscore_threshold: zscore_threshold.unwrap_or(defaults.zscore_threshold),
        ..defaults
    };
    let smoother = TemporalSmoother::new(params)?;
    let archive = CsvCalibrationArchive::new(archive_dir)?;
    let curves = smoother.fit_archive(&archive, iteration, &output)?;
    info!(
        "Gain curve: {} coefficients, residual {:.3}; offset curve: {} coefficients, residual {:.3}",
        curves.gain.coefficients().len(),
        curves.gain.residual(),
        curves.offset.coefficients().len(),
        curves.offset.residual()
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(&cli.log_level) {
        eprintln!("{e}");
        process::exit(2);
    }

    let start = Instant::now();
    let result = match cli.command {
        Commands::Coadd {
            data_dir,
            template_dir,
            defect_mask,
            output,
            nside,
            band,
            num_segments,
            iterations,
            refinement_steps,
            skip_failed,
            prior,
            moving_average,
            wrap,
        } => cmd_coadd(CoaddArgs {
            data_dir,
            template_dir,
            defect_mask,
            output,
            nside,
            band,
            num_segments,
            iterations,
            refinement_steps,
            skip_failed,
            prior,
            moving_average,
            wrap,
        }),
        Commands::Smooth {
            archive,
            iteration,
            output,
            gain_smoothing,
            offset_smoothing,
            zscore_threshold,
        } => cmd_smooth(
            archive,
            iteration,
            output,
            gain_smoothing,
            offset_smoothing,
            zscore_threshold,
        ),
    };

    match result {
        Ok(()) => info!("Done in {:.2?}", start.elapsed()),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
