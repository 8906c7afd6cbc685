use std::path::PathBuf;

use anyhow::Result;

use crate::args::Args;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("No measurement set list specified (use --mslist)")]
    NoDatasetList,
    #[error("Measurement set list \"{0}\" does not exist")]
    MissingDatasetList(String),
    #[error("--exit-after stage \"{0}\" is not in the stage table")]
    UnknownCheckpoint(String),
    #[error("--reduce-field factor must be at least 1")]
    BadReduceFactor,
}

/// Settings are like Args, except all the logic has been applied:
/// defaults are in, paths are resolved, and invalid combinations have
/// already been rejected. Constructed once before the run and shared
/// read-only with every component.
#[derive(Debug)]
pub struct Settings {
    pub mslist: PathBuf,
    pub full_mslist: Option<PathBuf>,
    pub work_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub logging: Option<PathBuf>,
    pub archive_dir: PathBuf,

    pub dry_run: bool,
    pub quiet: bool,
    /// skip steps whose artifacts already exist
    pub restart: bool,
    pub redo_from: Option<String>,
    pub exit_after: Option<String>,
    pub clear_cache: bool,
    pub clear_cache_end: bool,
    pub catch_signal: bool,

    pub bootstrap: bool,
    pub second_selfcal: bool,
    pub reduce_field: u32,
    pub method: Option<String>,

    pub colname: String,
    pub imsize: u32,
    pub cellsize: f64,
    pub ndir: u32,
    pub image_robust: f64,
    pub final_robust: f64,
    pub low_robust: f64,
    pub solutions_robust: Option<f64>,
    pub final_psf_arcsec: Option<f64>,
    pub low_psf_arcsec: Option<f64>,
    pub low_cell: f64,
    pub low_imsize: Option<u32>,
    pub image_uvmin: f64,
    pub solutions_uvmin: Option<f64>,
    pub auto_uvmin: bool,
    pub wtuv: Option<f64>,
    pub thresholds: Vec<f64>,
    pub niter_kf: Vec<u32>,
    pub dt: u32,
    pub smoothing: Option<u32>,
    pub extended_size: Option<f64>,
    pub extended_rms: f64,
    pub tgss: Option<String>,
    pub region: Option<String>,
    pub ncpu: u32,

    pub verbose: u8,
}

impl Settings {
    /// Path of the per-step log file, when a logging dir is configured.
    pub fn log_path(&self, name: &str) -> Option<PathBuf> {
        self.logging.as_ref().map(|dir| dir.join(name))
    }

    /// Key/value view of the resolved configuration for the run summary.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        fn opt<T: std::fmt::Debug>(v: &Option<T>) -> String {
            match v {
                Some(v) => format!("{v:?}"),
                None => String::from("None"),
            }
        }
        vec![
            ("mslist", format!("{:?}", self.mslist)),
            ("full_mslist", opt(&self.full_mslist)),
            ("work_dir", format!("{:?}", self.work_dir)),
            ("cache_dir", opt(&self.cache_dir)),
            ("logging", opt(&self.logging)),
            ("archive_dir", format!("{:?}", self.archive_dir)),
            ("dry_run", self.dry_run.to_string()),
            ("quiet", self.quiet.to_string()),
            ("restart", self.restart.to_string()),
            ("redo_from", opt(&self.redo_from)),
            ("exit_after", opt(&self.exit_after)),
            ("clear_cache", self.clear_cache.to_string()),
            ("clear_cache_end", self.clear_cache_end.to_string()),
            ("bootstrap", self.bootstrap.to_string()),
            ("second_selfcal", self.second_selfcal.to_string()),
            ("reduce_field", self.reduce_field.to_string()),
            ("method", opt(&self.method)),
            ("colname", self.colname.clone()),
            ("imsize", self.imsize.to_string()),
            ("cellsize", self.cellsize.to_string()),
            ("ndir", self.ndir.to_string()),
            ("image_robust", self.image_robust.to_string()),
            ("final_robust", self.final_robust.to_string()),
            ("low_robust", self.low_robust.to_string()),
            ("solutions_robust", opt(&self.solutions_robust)),
            ("final_psf_arcsec", opt(&self.final_psf_arcsec)),
            ("low_psf_arcsec", opt(&self.low_psf_arcsec)),
            ("low_cell", self.low_cell.to_string()),
            ("low_imsize", opt(&self.low_imsize)),
            ("image_uvmin", self.image_uvmin.to_string()),
            ("solutions_uvmin", opt(&self.solutions_uvmin)),
            ("auto_uvmin", self.auto_uvmin.to_string()),
            ("wtuv", opt(&self.wtuv)),
            ("thresholds", format!("{:?}", self.thresholds)),
            ("niter_kf", format!("{:?}", self.niter_kf)),
            ("dt", self.dt.to_string()),
            ("smoothing", opt(&self.smoothing)),
            ("extended_size", opt(&self.extended_size)),
            ("extended_rms", self.extended_rms.to_string()),
            ("tgss", opt(&self.tgss)),
            ("region", opt(&self.region)),
            ("ncpu", self.ncpu.to_string()),
        ]
    }
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let mslist = PathBuf::from(args.mslist.ok_or(Error::NoDatasetList)?);
        let work_dir = PathBuf::from(&args.work_dir);
        if !resolved(&work_dir, &mslist) {
            return Err(Error::MissingDatasetList(mslist.display().to_string()).into());
        }

        if let Some(stage) = &args.exit_after {
            let table = crate::stages::Sequencer::standard();
            if table.position(stage).is_none() {
                return Err(Error::UnknownCheckpoint(stage.clone()).into());
            }
        }

        if args.reduce_field == 0 {
            return Err(Error::BadReduceFactor.into());
        }

        Ok(Self {
            mslist,
            full_mslist: args.full_mslist.map(PathBuf::from),
            cache_dir: args.cache_dir.map(PathBuf::from),
            logging: args.logging.map(PathBuf::from),
            archive_dir: PathBuf::from(args.archive_dir),
            work_dir,

            dry_run: args.dry_run,
            quiet: args.quiet,
            restart: !args.ignore_done,
            redo_from: args.redo_from,
            exit_after: args.exit_after,
            clear_cache: args.clear_cache,
            clear_cache_end: args.clear_cache_end,
            catch_signal: !args.no_signal_handler,

            bootstrap: args.bootstrap,
            second_selfcal: args.second_selfcal,
            reduce_field: args.reduce_field,
            method: args.method,

            colname: args.colname,
            imsize: args.imsize,
            cellsize: args.cellsize,
            ndir: args.ndir,
            image_robust: args.image_robust,
            final_robust: args.final_robust,
            low_robust: args.low_robust,
            solutions_robust: args.solutions_robust,
            final_psf_arcsec: args.final_psf_arcsec,
            low_psf_arcsec: args.low_psf_arcsec,
            low_cell: args.low_cell,
            low_imsize: args.low_imsize,
            image_uvmin: args.image_uvmin,
            solutions_uvmin: args.solutions_uvmin,
            auto_uvmin: args.auto_uvmin,
            wtuv: args.wtuv,
            thresholds: args.thresholds,
            niter_kf: args.niter_kf,
            dt: args.dt,
            smoothing: args.smoothing,
            extended_size: args.extended_size,
            extended_rms: args.extended_rms,
            tgss: args.tgss,
            region: args.region,
            ncpu: args.ncpu,

            verbose: args.verbose,
        })
    }
}

fn resolved(work_dir: &std::path::Path, list: &std::path::Path) -> bool {
    if list.is_absolute() {
        list.exists()
    } else {
        work_dir.join(list).exists()
    }
}
