use clap::Parser;

const CMD_NAME: &str = "fieldrun";
const DEFAULT_ARCHIVE: &str = "old";
const DEFAULT_COLNAME: &str = "CORRECTED_DATA";

/// Stores our command-line args format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// List file naming the calibration subset measurement sets
    #[arg(short, long, value_name = "FILE")]
    #[arg(env = "FIELDRUN_MSLIST")]
    pub mslist: Option<String>,

    /// List file naming the full-bandwidth measurement sets
    #[arg(long, value_name = "FILE")]
    pub full_mslist: Option<String>,

    /// Working directory holding pipeline artifacts
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    #[arg(env = "FIELDRUN_WORK_DIR")]
    pub work_dir: String,

    /// Cache directory; falls back to the working directory if missing
    #[arg(long, value_name = "DIR")]
    #[arg(env = "FIELDRUN_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// Directory for per-step log files (console output if unset)
    #[arg(short, long, value_name = "DIR")]
    pub logging: Option<String>,

    /// Directory artifacts are moved into on rollback
    #[arg(long, value_name = "DIR", default_value = DEFAULT_ARCHIVE)]
    pub archive_dir: String,

    /// Dry run; record commands but execute and modify nothing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Suppress external tool console output
    #[arg(short, long)]
    pub quiet: bool,

    /// Ignore existing artifacts and re-run every step
    #[arg(long)]
    pub ignore_done: bool,

    /// Archive artifacts from this stage onward and re-run from there
    #[arg(long, value_name = "STAGE")]
    pub redo_from: Option<String>,

    /// Stop cleanly at the named checkpoint
    #[arg(long, value_name = "STAGE")]
    pub exit_after: Option<String>,

    /// Clear the derived caches before starting
    #[arg(long)]
    pub clear_cache: bool,

    /// Clear the derived caches after a successful run
    #[arg(long)]
    pub clear_cache_end: bool,

    /// Do not install the SIGINT/SIGTERM cancellation handler
    #[arg(long)]
    pub no_signal_handler: bool,

    /// Run the flux-scale bootstrap step
    #[arg(long)]
    pub bootstrap: bool,

    /// Run a second self-calibration round on the full dataset
    #[arg(long)]
    pub second_selfcal: bool,

    /// Image only the central 1/N of the field
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub reduce_field: u32,

    /// Optical catalogue used for astrometry (e.g. panstarrs)
    #[arg(long, value_name = "NAME")]
    pub method: Option<String>,

    /// Data column imaged in the first steps
    #[arg(long, value_name = "COL", default_value = DEFAULT_COLNAME)]
    pub colname: String,

    /// Image size in pixels
    #[arg(long, default_value_t = 8000)]
    pub imsize: u32,

    /// Cell size in arcsec
    #[arg(long, default_value_t = 1.5)]
    pub cellsize: f64,

    /// Number of directions for facet clustering
    #[arg(long, default_value_t = 45)]
    pub ndir: u32,

    /// Briggs robust value for self-cal imaging
    #[arg(long, default_value_t = -0.15, allow_hyphen_values = true)]
    pub image_robust: f64,

    /// Briggs robust value for final imaging
    #[arg(long, default_value_t = -0.5, allow_hyphen_values = true)]
    pub final_robust: f64,

    /// Briggs robust value for low-resolution imaging
    #[arg(long, default_value_t = -0.25, allow_hyphen_values = true)]
    pub low_robust: f64,

    /// Briggs robust value for calibration (natural weighting if unset)
    #[arg(long, allow_hyphen_values = true)]
    pub solutions_robust: Option<f64>,

    /// Restoring beam for final imaging, arcsec
    #[arg(long)]
    pub final_psf_arcsec: Option<f64>,

    /// Low-resolution restoring beam, arcsec; enables the low-res rounds
    #[arg(long)]
    pub low_psf_arcsec: Option<f64>,

    /// Low-resolution cell size in arcsec
    #[arg(long, default_value_t = 4.5)]
    pub low_cell: f64,

    /// Low-resolution image size override
    #[arg(long)]
    pub low_imsize: Option<u32>,

    /// Shortest baseline used in imaging, km
    #[arg(long, default_value_t = 0.1)]
    pub image_uvmin: f64,

    /// Shortest baseline used in calibration, km
    #[arg(long)]
    pub solutions_uvmin: Option<f64>,

    /// Derive the calibration uvmin from the model flux histogram
    #[arg(long)]
    pub auto_uvmin: bool,

    /// Baseline length below which calibration weights are tapered, km
    #[arg(long)]
    pub wtuv: Option<f64>,

    /// Auto-mask thresholds for the four imaging rounds
    #[arg(long, value_delimiter = ',', num_args = 4,
          default_values_t = [25.0, 20.0, 10.0, 5.0])]
    pub thresholds: Vec<f64>,

    /// Kalman filter iterations for the three calibration rounds
    #[arg(long, value_delimiter = ',', num_args = 3, default_values_t = [1u32, 6, 6])]
    pub niter_kf: Vec<u32>,

    /// Calibration solution interval, seconds
    #[arg(long, default_value_t = 60)]
    pub dt: u32,

    /// Smooth amplitude solutions with this window size
    #[arg(long, value_name = "WINDOW")]
    pub smoothing: Option<u32>,

    /// Minimum size in arcsec of extended sources added to the mask
    #[arg(long)]
    pub extended_size: Option<f64>,

    /// RMS threshold for the extended source mask
    #[arg(long, default_value_t = 3.0)]
    pub extended_rms: f64,

    /// TGSS catalogue path merged into external masks
    #[arg(long, value_name = "FILE")]
    pub tgss: Option<String>,

    /// User region file merged into external masks
    #[arg(long, value_name = "FILE")]
    pub region: Option<String>,

    /// Worker processes handed to the external tools
    #[arg(long, default_value_t = 32)]
    pub ncpu: u32,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
