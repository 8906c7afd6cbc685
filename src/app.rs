use std::path::Path;

use anyhow::{Context, Result};

use crate::background::{self, BackgroundTask};
use crate::cache::CacheManager;
use crate::cancel::Catcher;
use crate::dataset::DatasetRef;
use crate::exec::{capture_cmd, run_cmd, RunOpts};
use crate::fs::Fs;
use crate::report;
use crate::sentinel::Sentinels;
use crate::settings::Settings;
use crate::stages::{RollbackHooks, Sequencer};
use crate::steps::{self, CalParams, ImageParams};
use crate::ui::Ui;

/// Scratch list written by the bootstrap tool; it only exists on some
/// runs but still owns cache entries that need clearing.
const TEMP_MSLIST: &str = "temp_mslist.txt";

/// How a run ended, short of a fatal error.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    /// stopped cleanly at the named checkpoint (--exit-after)
    StoppedEarly(String),
}

/// Main application struct. Walks the stage table forward, skipping
/// every step whose artifact already exists on disk.
pub struct App {
    settings: Settings,
    fs: Fs,
    ui: Ui,
    catcher: Catcher,
}

/// Rollback side effects that live outside the working directory,
/// performed by external tools against the measurement sets.
struct ShellHooks<'a> {
    app: &'a App,
    /// list whose bootstrap columns get stripped
    strip_list: String,
}

impl RollbackHooks for ShellHooks<'_> {
    fn strip_solution_columns(&mut self) -> Result<()> {
        run_cmd(
            &steps::strip_columns_command(&self.strip_list),
            &self.app.opts("strip-columns.log"),
        )
    }

    fn archive_solutions(&mut self, names: &[&str]) -> Result<()> {
        let dest = self.app.fs.resolve(&self.app.settings.archive_dir);
        run_cmd(
            &steps::archive_solutions_command(&dest, names),
            &self.app.opts("archive-solutions.log"),
        )
    }
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let fs = Fs::new(&settings.work_dir, settings.dry_run);
        let ui = Ui::new(&settings);
        Self {
            settings,
            fs,
            ui,
            catcher: Catcher::new(),
        }
    }

    pub fn run(&self) -> Result<Outcome> {
        let s = &self.settings;
        self.ui.report(&format!(
            "Welcome to fieldrun, version {}",
            env!("CARGO_PKG_VERSION")
        ));
        self.ui.start_timer();

        if s.catch_signal {
            self.catcher.install().context("installing signal handlers")?;
        }
        self.fs.check_root()?;
        if let Some(dir) = &s.logging {
            self.fs.create_dir(self.fs.resolve(dir))?;
        }

        let sentinels = Sentinels::new(&self.fs, s.restart);
        let cache = CacheManager::new(&self.fs, s.cache_dir.as_deref());
        let cache_dir = cache.resolve();

        // shared memory segments can survive a crashed tool run
        run_cmd(&steps::clean_shm_command(), &self.opts_console())?;

        let mslist = DatasetRef::load(&self.fs, &s.mslist)?;
        let mslist_str = mslist.path().display().to_string();
        let full_mslist = match &s.full_mslist {
            Some(path) => Some(DatasetRef::load(&self.fs, path)?),
            None => None,
        };
        let temp_mslist = DatasetRef::load_or_empty(&self.fs, Path::new(TEMP_MSLIST))?;

        // A dataset that needed imaging weights is new to us, and a new
        // dataset may carry stale cache entries from wherever it came
        // from. Same when redoing: the cache refers to archived products.
        let new_dataset = self.ensure_imaging_weights(&mslist)?;
        if s.clear_cache || new_dataset || s.redo_from.is_some() {
            self.clear_all_caches(&cache, &mslist, &temp_mslist, full_mslist.as_ref())?;
        }

        let uvrange = (s.image_uvmin, 1000.0);
        let mut killms_uvmin = s.solutions_uvmin.unwrap_or(0.0);
        let mut colname = s.colname.clone();
        let mut external_mask = String::from("external_mask.fits");
        let mut ddsols = String::from("killms_ap1");
        let mut field_imsize: Option<u32> = None;
        let mut ndir = s.ndir;

        if s.reduce_field != 1 && s.redo_from.is_none() {
            self.subtract_outer_field(&sentinels, &cache_dir, &colname)?;
            colname = String::from("DATA_SUB");

            // check image at the original size before shrinking the field
            let mut p = ImageParams::new("image_predict_check", &mslist_str, &colname);
            p.majorcycles = 0;
            p.robust = s.image_robust;
            p.peak_factor = 0.05;
            p.automask_threshold = None;
            p.uvrange = Some(uvrange);
            self.image(&sentinels, &cache, &p)?;

            field_imsize = Some(s.imsize / s.reduce_field);
            ndir = 1;
        }

        let mut seq = Sequencer::standard();
        if let Some(target) = &s.redo_from {
            self.ui.report(&format!("Rolling back to stage {target}"));
            let strip_list = s
                .full_mslist
                .as_ref()
                .unwrap_or(&s.mslist)
                .display()
                .to_string();
            let mut hooks = ShellHooks { app: self, strip_list };
            let archive = self.fs.resolve(&s.archive_dir);
            seq.rollback(target, &self.fs, &archive, &mut hooks)?;
        }

        seq.advance("start", &sentinels, &self.catcher, || {
            let mut p = ImageParams::new("image_dirin_SSD_init", &mslist_str, &colname);
            p.majorcycles = 0;
            p.robust = s.image_robust;
            p.peak_factor = 0.05;
            p.automask_threshold = None;
            p.uvrange = Some(uvrange);
            p.imsize = field_imsize;
            self.image(&sentinels, &cache, &p)?;

            self.make_external_mask(
                &sentinels,
                &external_mask,
                "image_dirin_SSD_init.dirty.fits",
                None,
            )?;

            // deep clean with the external mask and automasking
            let mut p = ImageParams::new("image_dirin_SSD", &mslist_str, &colname);
            p.majorcycles = 4;
            p.robust = s.image_robust;
            p.peak_factor = 0.05;
            p.reuse_psf = true;
            p.reuse_dirty = true;
            p.automask_threshold = Some(s.thresholds[0]);
            p.mask = Some(&external_mask);
            p.uvrange = Some(uvrange);
            p.imsize = field_imsize;
            self.image(&sentinels, &cache, &p)?;

            let mask = self.make_mask(
                &sentinels,
                "image_dirin_SSD.app.restored.fits",
                s.thresholds[0],
                Some(&external_mask),
            )?;
            self.mask_dicomodel(
                &sentinels,
                "image_dirin_SSD.DicoModel",
                &mask,
                "image_dirin_SSD_masked.DicoModel",
            )?;

            // the deep clean reuses the init products
            self.fs.symlink_if_missing(
                "image_dirin_SSD_init.Norm.fits",
                self.fs.resolve("image_dirin_SSD.Norm.fits"),
            )?;
            self.fs.symlink_if_missing(
                "image_dirin_SSD_init.dirty.fits",
                self.fs.resolve("image_dirin_SSD.dirty.fits"),
            )?;

            if self.make_model(&sentinels, &mask, "image_dirin_SSD", ndir)? {
                // re-clustering changed the facet geometry, so the cached
                // facet info is stale
                cache.clear(&mslist)?;
            }
            Ok(())
        })?;

        if s.auto_uvmin {
            killms_uvmin = self.optimize_uvmin("image_dirin_SSD", &mslist_str, &colname)?;
        }
        if let Some(out) = self.checkpoint("dirin") {
            return Ok(out);
        }

        seq.advance("dirin", &sentinels, &self.catcher, || {
            let p = CalParams {
                colname: &colname,
                niterkf: s.niter_kf[0],
                dicomodel: Some("image_dirin_SSD_masked.DicoModel"),
                clusterfile: Some("image_dirin_SSD.npy.ClusterCat.npy"),
                uvrange: Some((killms_uvmin, 1000.0)),
                wtuv: s.wtuv,
                robust: s.solutions_robust,
            };
            self.calibrate(&sentinels, &cache_dir, &mslist, "image_dirin_SSD", "killms_p1", &p)?;

            if s.bootstrap {
                self.ui.report("Running flux-scale bootstrap");
                run_cmd(&steps::bootstrap_command(s), &self.opts("bootstrap.log"))?;
                colname = String::from("SCALED_DATA");
            }

            // extended source mask, if requested and the bootstrap mean
            // image is there to build it from
            if s.extended_size.is_some()
                && self.fs.exists(self.fs.resolve("image_bootstrap.app.mean.fits"))
            {
                if !sentinels.is_done("bootstrap-mask-high.fits")? {
                    self.ui.report("Making the extended source mask");
                    let cmd = steps::extended_mask_command(
                        s,
                        "image_bootstrap.app.mean.fits",
                        "image_dirin_SSD.app.restored.fits",
                        "bootstrap",
                        s.extended_size.unwrap_or_default(),
                    );
                    run_cmd(&cmd, &self.opts("extended-mask.log"))?;
                }
                external_mask = String::from("external_mask_ext.fits");
                self.make_external_mask(
                    &sentinels,
                    &external_mask,
                    "image_dirin_SSD_init.dirty.fits",
                    Some("bootstrap-mask-high.fits"),
                )?;
            }

            // apply the phase solutions and image again
            let mut p = ImageParams::new("image_phase1", &mslist_str, &colname);
            p.majorcycles = 3;
            p.robust = s.image_robust;
            p.peak_factor = 0.01;
            p.automask_threshold = Some(s.thresholds[1]);
            p.mask = Some(&external_mask);
            p.ddsols = Some("killms_p1");
            p.applysols = Some("P");
            p.dicomodel = Some("image_dirin_SSD_masked.DicoModel");
            p.uvrange = Some(uvrange);
            p.imsize = field_imsize;
            self.image(&sentinels, &cache, &p)?;

            let mask = self.make_mask(
                &sentinels,
                "image_phase1.app.restored.fits",
                s.thresholds[1],
                Some(&external_mask),
            )?;
            self.mask_dicomodel(
                &sentinels,
                "image_phase1.DicoModel",
                &mask,
                "image_phase1_masked.DicoModel",
            )?;
            Ok(())
        })?;

        if let Some(out) = self.checkpoint("phase") {
            return Ok(out);
        }
        if s.auto_uvmin {
            killms_uvmin = self.optimize_uvmin("image_phase1", &mslist_str, &colname)?;
        }

        seq.advance("phase", &sentinels, &self.catcher, || {
            let p = CalParams {
                colname: &colname,
                niterkf: s.niter_kf[1],
                dicomodel: Some("image_phase1_masked.DicoModel"),
                clusterfile: None,
                uvrange: Some((killms_uvmin, 1000.0)),
                wtuv: s.wtuv,
                robust: s.solutions_robust,
            };
            self.calibrate(&sentinels, &cache_dir, &mslist, "image_phase1", "killms_ap1", &p)?;

            ddsols = String::from("killms_ap1");
            if let Some(window) = s.smoothing {
                self.ui.report("Smoothing amplitude solutions");
                ddsols = self.smooth_solutions(&sentinels, &mslist, "killms_ap1", window)?;
            }

            // apply phase and amplitude solutions and image again
            let mut p = ImageParams::new("image_ampphase1", &mslist_str, &colname);
            p.majorcycles = 3;
            p.robust = s.image_robust;
            p.peak_factor = 0.005;
            p.automask_threshold = Some(s.thresholds[2]);
            p.mask = Some("image_phase1.app.restored.fits.mask.fits");
            p.ddsols = Some(&ddsols);
            p.applysols = Some("AP");
            p.dicomodel = Some("image_phase1_masked.DicoModel");
            p.uvrange = Some(uvrange);
            p.imsize = field_imsize;
            self.image(&sentinels, &cache, &p)?;
            Ok(())
        })?;

        if let Some(out) = self.checkpoint("ampphase") {
            return Ok(out);
        }

        // everything from here on needs the full-bandwidth dataset
        if let Some(full) = &full_mslist {
            let full_str = full.path().display().to_string();
            self.ensure_imaging_weights(full)?;

            if s.auto_uvmin {
                killms_uvmin = self.optimize_uvmin("image_ampphase1", &mslist_str, &colname)?;
            }

            seq.advance("ampphase", &sentinels, &self.catcher, || {
                let mask = self.make_mask(
                    &sentinels,
                    "image_ampphase1.app.restored.fits",
                    s.thresholds[2],
                    Some(&external_mask),
                )?;
                self.mask_dicomodel(
                    &sentinels,
                    "image_ampphase1.DicoModel",
                    &mask,
                    "image_ampphase1_masked.DicoModel",
                )?;

                colname = String::from("MODEL_DATA");

                let p = CalParams {
                    colname: &colname,
                    niterkf: s.niter_kf[2],
                    dicomodel: Some("image_ampphase1_masked.DicoModel"),
                    clusterfile: Some("image_dirin_SSD.npy.ClusterCat.npy"),
                    uvrange: Some((killms_uvmin, 1000.0)),
                    wtuv: s.wtuv,
                    robust: s.solutions_robust,
                };
                self.calibrate(&sentinels, &cache_dir, full, "image_ampphase1", "killms_f_ap1", &p)?;

                ddsols = String::from("killms_f_ap1");
                if let Some(window) = s.smoothing {
                    self.ui.report("Smoothing amplitude solutions");
                    ddsols = self.smooth_solutions(&sentinels, full, "killms_f_ap1", window)?;
                }

                if let Some(psf) = s.low_psf_arcsec {
                    // low-res images first, so their mask can feed the
                    // high-res rounds
                    let low_uvrange = (s.image_uvmin, 2.5 * 206.0 / psf);
                    let low_imsize = s
                        .low_imsize
                        .unwrap_or((f64::from(s.imsize) * s.cellsize / s.low_cell) as u32);

                    self.make_external_mask(
                        &sentinels,
                        "test_low_mask.fits",
                        "image_full_low.dirty.fits",
                        None,
                    )?;

                    let mut p = ImageParams::new("image_full_low", &full_str, &colname);
                    p.majorcycles = 2;
                    p.robust = s.low_robust;
                    p.peak_factor = 0.001;
                    p.automask_threshold = Some(5.0);
                    p.mask = Some("test_low_mask.fits");
                    p.ddsols = Some(&ddsols);
                    p.applysols = Some("AP");
                    p.uvrange = Some(low_uvrange);
                    p.beamsize = Some(psf);
                    p.imsize = Some(low_imsize);
                    p.cellsize = Some(s.low_cell);
                    p.smooth = true;
                    self.image(&sentinels, &cache, &p)?;

                    let low_mask = self.make_mask(
                        &sentinels,
                        "image_full_low.app.restored.fits",
                        3.0,
                        None,
                    )?;
                    let mut p = ImageParams::new("image_full_low_im", &full_str, &colname);
                    p.majorcycles = 1;
                    p.robust = s.low_robust;
                    p.peak_factor = 0.001;
                    p.automask_threshold = Some(5.0);
                    p.mask = Some(&low_mask);
                    p.ddsols = Some(&ddsols);
                    p.applysols = Some("AP");
                    p.dicomodel = Some("image_full_low.DicoModel");
                    p.uvrange = Some(low_uvrange);
                    p.beamsize = Some(psf);
                    p.imsize = Some(low_imsize);
                    p.cellsize = Some(s.low_cell);
                    p.reuse_psf = true;
                    p.dirty_from_resid = true;
                    p.smooth = true;
                    self.image(&sentinels, &cache, &p)?;

                    if !sentinels.is_done("full-mask-low.fits")? {
                        self.ui.report("Making the full-bandwidth extended source mask");
                        let cmd = steps::extended_mask_command(
                            s,
                            "image_full_low_im.app.restored.fits",
                            "image_dirin_SSD.app.restored.fits",
                            "full",
                            1500.0,
                        );
                        run_cmd(&cmd, &self.opts("extended-mask-full.log"))?;
                    }

                    let im_mask = self.make_mask(
                        &sentinels,
                        "image_full_low_im.app.restored.fits",
                        3.0,
                        Some("full-mask-low.fits"),
                    )?;
                    let mut p = ImageParams::new("image_full_low_m", &full_str, &colname);
                    p.majorcycles = 1;
                    p.robust = s.low_robust;
                    p.peak_factor = 0.001;
                    p.rms_factor = 2.5;
                    p.automask_threshold = Some(4.0);
                    p.mask = Some(&im_mask);
                    p.ddsols = Some(&ddsols);
                    p.applysols = Some("AP");
                    p.dicomodel = Some("image_full_low_im.DicoModel");
                    p.uvrange = Some(low_uvrange);
                    p.beamsize = Some(psf);
                    p.imsize = Some(low_imsize);
                    p.cellsize = Some(s.low_cell);
                    p.reuse_psf = true;
                    p.dirty_from_resid = true;
                    p.smooth = true;
                    self.image(&sentinels, &cache, &p)?;

                    external_mask = String::from("external_mask_ext-deep.fits");
                    self.make_external_mask(
                        &sentinels,
                        &external_mask,
                        "image_dirin_SSD_init.dirty.fits",
                        Some("full-mask-high.fits"),
                    )?;
                }

                // remask the previous run with the (possibly deeper)
                // external mask
                let mask = self.make_mask(
                    &sentinels,
                    "image_ampphase1.app.restored.fits",
                    s.thresholds[2],
                    Some(&external_mask),
                )?;
                self.mask_dicomodel(
                    &sentinels,
                    "image_ampphase1.DicoModel",
                    &mask,
                    "image_ampphase1_masked.DicoModel",
                )?;
                Ok(())
            })?;

            if let Some(out) = self.checkpoint("fulllow") {
                return Ok(out);
            }

            // start the catalogue download early; its output is not
            // needed until the facet offsets at the very end
            let mut download: Option<BackgroundTask> = None;
            if let Some(method) = &s.method {
                self.ui.report("Checking if optical catalogue download is required");
                let catalogue = self.fs.resolve(steps::catalogue_sentinel(method));
                if self.fs.exists(&catalogue) {
                    self.ui.warn("All catalogue data present, skipping download");
                } else {
                    let cmd = steps::download_command(method);
                    let opts = self.opts("download.log");
                    download = Some(BackgroundTask::spawn("catalogue download", move || {
                        run_cmd(&cmd, &opts)
                    }));
                }
            }

            seq.advance("fulllow", &sentinels, &self.catcher, || {
                let mut p = ImageParams::new("image_full_ampphase1", &full_str, &colname);
                p.majorcycles = 1;
                p.robust = s.final_robust;
                p.peak_factor = 0.001;
                p.automask_threshold = Some(s.thresholds[3]);
                p.mask = Some("image_ampphase1.app.restored.fits.mask.fits");
                p.ddsols = Some(&ddsols);
                p.applysols = Some("AP");
                p.dicomodel = Some("image_ampphase1_masked.DicoModel");
                p.uvrange = Some(uvrange);
                p.beamsize = s.final_psf_arcsec;
                p.smooth = true;
                self.image(&sentinels, &cache, &p)?;

                let mask = self.make_mask(
                    &sentinels,
                    "image_full_ampphase1.app.restored.fits",
                    s.thresholds[3],
                    Some(&external_mask),
                )?;
                self.mask_dicomodel(
                    &sentinels,
                    "image_full_ampphase1.DicoModel",
                    &mask,
                    "image_full_ampphase1_masked.DicoModel",
                )?;

                let mut p = ImageParams::new("image_full_ampphase1m", &full_str, &colname);
                p.majorcycles = 1;
                p.robust = s.final_robust;
                p.peak_factor = 0.001;
                p.automask_threshold = Some(s.thresholds[3]);
                p.mask = Some(&mask);
                p.ddsols = Some(&ddsols);
                p.applysols = Some("AP");
                p.dicomodel = Some("image_full_ampphase1_masked.DicoModel");
                p.uvrange = Some(uvrange);
                p.beamsize = s.final_psf_arcsec;
                p.reuse_psf = true;
                p.dirty_from_resid = true;
                p.smooth = true;
                self.image(&sentinels, &cache, &p)?;
                Ok(())
            })?;

            let mut last_image = "image_full_ampphase1m";
            if s.second_selfcal {
                seq.advance("full", &sentinels, &self.catcher, || {
                    self.fs.symlink_if_missing(
                        "image_full_ampphase1.Norm.fits",
                        self.fs.resolve("image_full_ampphase1m.Norm.fits"),
                    )?;

                    let mask = self.make_mask(
                        &sentinels,
                        "image_full_ampphase1m.app.restored.fits",
                        s.thresholds[3],
                        Some(&external_mask),
                    )?;
                    self.mask_dicomodel(
                        &sentinels,
                        "image_full_ampphase1m.DicoModel",
                        &mask,
                        "image_full_ampphase1m_masked.DicoModel",
                    )?;

                    let p = CalParams {
                        colname: &colname,
                        niterkf: s.niter_kf[2],
                        dicomodel: Some("image_full_ampphase1m_masked.DicoModel"),
                        clusterfile: Some("image_dirin_SSD.npy.ClusterCat.npy"),
                        uvrange: None,
                        wtuv: None,
                        robust: None,
                    };
                    self.calibrate(
                        &sentinels,
                        &cache_dir,
                        full,
                        "image_full_ampphase1m",
                        "killms_f_ap2",
                        &p,
                    )?;

                    let mut p = ImageParams::new("image_full_ampphase2", &full_str, &colname);
                    p.majorcycles = 1;
                    p.robust = s.final_robust;
                    p.peak_factor = 0.001;
                    p.automask_threshold = Some(s.thresholds[3]);
                    p.mask = Some(&mask);
                    p.ddsols = Some("killms_f_ap2");
                    p.applysols = Some("AP");
                    p.dicomodel = Some("image_full_ampphase1m_masked.DicoModel");
                    p.uvrange = Some(uvrange);
                    p.beamsize = s.final_psf_arcsec;
                    p.smooth = true;
                    self.image(&sentinels, &cache, &p)?;

                    last_image = "image_full_ampphase2";
                    Ok(())
                })?;
            }

            if let Some(method) = &s.method {
                seq.advance("full2", &sentinels, &self.catcher, || {
                    let catalogue = self.fs.resolve(steps::catalogue_sentinel(method));
                    let cmd = steps::download_command(method);
                    let opts = self.opts("download.log");
                    background::ensure_complete(
                        download.take(),
                        || run_cmd(&cmd, &opts),
                        || s.dry_run || self.fs.exists(&catalogue),
                    )
                    .context("fetching the astrometry catalogue")?;

                    if !sentinels.is_done("facet-offset.txt")? {
                        run_cmd(&steps::offsets_command(s, method), &self.opts("offsets.log"))?;
                    }

                    // a restart may have lost the residual cache entries
                    // the shifted restore needs; remake them
                    let entry = full.file_name();
                    if !cache.has_entry_item(entry, "LastResidual")
                        || !cache.has_entry_item(entry, "PSF")
                    {
                        let mut p =
                            ImageParams::new("image_full_ampphase1m_reimage", &full_str, &colname);
                        p.majorcycles = 0;
                        p.robust = s.final_robust;
                        p.peak_factor = 0.001;
                        p.automask_threshold = Some(s.thresholds[3]);
                        p.mask = Some("image_full_ampphase1.app.restored.fits.mask.fits");
                        p.ddsols = Some(&ddsols);
                        p.applysols = Some("AP");
                        p.dicomodel = Some("image_full_ampphase1m.DicoModel");
                        p.uvrange = Some(uvrange);
                        p.beamsize = s.final_psf_arcsec;
                        p.smooth = true;
                        self.image(&sentinels, &cache, &p)?;

                        self.fs.symlink_if_missing(
                            "Dirty",
                            cache.entry_item(entry, "LastResidual"),
                        )?;
                        self.fs.symlink_if_missing(
                            "Dirty.hash",
                            cache.entry_item(entry, "LastResidual.hash"),
                        )?;
                    }

                    if !sentinels.is_done(&steps::shift_sentinel(last_image))? {
                        self.catcher.check()?;
                        run_cmd(
                            &steps::shift_command(&cache_dir, last_image, "facet-offset.txt"),
                            &self.opts(&format!("ddf-{last_image}_shift.log")),
                        )?;
                    }
                    Ok(())
                })?;
            }
        } else {
            self.ui.warn("No full measurement set list supplied, stopping here");
        }

        report::write_summary(&self.fs, s, &self.tool_versions())?;
        if s.clear_cache_end {
            self.clear_all_caches(&cache, &mslist, &temp_mslist, full_mslist.as_ref())?;
        }
        let _ = self.ui.print_elapsed("full run");
        Ok(Outcome::Completed)
    }

    /// Clean early stop at a requested checkpoint.
    fn checkpoint(&self, name: &str) -> Option<Outcome> {
        if self.settings.exit_after.as_deref() == Some(name) {
            self.ui
                .warn(&format!("Stopping at requested checkpoint \"{name}\""));
            Some(Outcome::StoppedEarly(name.to_owned()))
        } else {
            None
        }
    }

    /// Version banners of the external tools, for the summary. A tool
    /// that does not answer is recorded as unknown rather than failing
    /// an otherwise complete run.
    fn tool_versions(&self) -> Vec<(&'static str, String)> {
        ["DDF.py", "killMS.py"]
            .into_iter()
            .map(|tool| {
                let version = capture_cmd(&steps::version_command(tool), self.settings.dry_run)
                    .unwrap_or_default();
                let version = if version.is_empty() {
                    String::from("unknown")
                } else {
                    version
                };
                (tool, version)
            })
            .collect()
    }

    fn opts(&self, log_name: &str) -> RunOpts {
        RunOpts {
            dry_run: self.settings.dry_run,
            quiet: self.settings.quiet,
            log: self
                .settings
                .log_path(log_name)
                .map(|p| self.fs.resolve(p)),
        }
    }

    fn opts_console(&self) -> RunOpts {
        RunOpts {
            dry_run: self.settings.dry_run,
            quiet: self.settings.quiet,
            log: None,
        }
    }

    /// Run one external step unless its artifact already exists.
    /// Returns whether the step actually ran.
    fn step(&self, sentinels: &Sentinels, artifact: &str, log_name: &str, cmd: &str) -> Result<bool> {
        if sentinels.is_done(artifact)? {
            return Ok(false);
        }
        run_cmd(cmd, &self.opts(log_name))?;
        Ok(true)
    }

    fn image(&self, sentinels: &Sentinels, cache: &CacheManager, p: &ImageParams) -> Result<()> {
        self.catcher.check()?;
        let cmd = steps::image_command(&self.settings, cache, p);
        self.step(
            sentinels,
            &steps::image_sentinel(p),
            &format!("ddf-{}.log", p.name),
            &cmd,
        )?;
        Ok(())
    }

    /// Make a threshold mask from a restored image, merging in the
    /// external mask when one exists. Returns the mask file name.
    fn make_mask(
        &self,
        sentinels: &Sentinels,
        image: &str,
        threshold: f64,
        external: Option<&str>,
    ) -> Result<String> {
        self.catcher.check()?;
        let mask = steps::mask_sentinel(image);
        let ran = self.step(
            sentinels,
            &mask,
            &format!("mask-{image}.log"),
            &steps::mask_command(image, threshold),
        )?;
        if ran {
            if let Some(external) = external {
                if self.fs.exists(self.fs.resolve(external)) {
                    run_cmd(
                        &steps::merge_mask_command(&mask, external),
                        &self.opts(&format!("merge-{image}.log")),
                    )?;
                }
            }
        }
        Ok(mask)
    }

    fn mask_dicomodel(
        &self,
        sentinels: &Sentinels,
        indico: &str,
        mask: &str,
        outdico: &str,
    ) -> Result<bool> {
        self.catcher.check()?;
        self.step(
            sentinels,
            outdico,
            &format!("maskdico-{outdico}.log"),
            &steps::masked_model_command(indico, mask, outdico),
        )
    }

    /// Cluster the sky model into facets. Returns whether the clustering
    /// actually ran, so the caller can invalidate the cache.
    fn make_model(&self, sentinels: &Sentinels, mask: &str, image: &str, ndir: u32) -> Result<bool> {
        self.catcher.check()?;
        self.step(
            sentinels,
            &steps::model_sentinel(image),
            &format!("makemodel-{image}.log"),
            &steps::model_command(mask, image, ndir),
        )
    }

    fn make_external_mask(
        &self,
        sentinels: &Sentinels,
        name: &str,
        template: &str,
        extended: Option<&str>,
    ) -> Result<()> {
        self.catcher.check()?;
        self.step(
            sentinels,
            name,
            &format!("extmask-{name}.log"),
            &steps::external_mask_command(&self.settings, name, template, extended),
        )?;
        Ok(())
    }

    /// Calibrate every measurement set of a dataset in turn. Each set has
    /// its own solutions sentinel, so a run that died mid-list resumes
    /// from the set it died on.
    fn calibrate(
        &self,
        sentinels: &Sentinels,
        cache_dir: &Path,
        dataset: &DatasetRef,
        image: &str,
        outsols: &str,
        p: &CalParams,
    ) -> Result<()> {
        for ms in dataset.names() {
            self.catcher.check()?;
            if sentinels.is_done(&steps::calibrate_sentinel(ms, outsols))? {
                continue;
            }
            let cmd = steps::calibrate_command(&self.settings, cache_dir, ms, image, outsols, p);
            let log = format!("killms-{outsols}-{}.log", ms.replace('/', "_"));
            run_cmd(&cmd, &self.opts(&log))?;
        }
        Ok(())
    }

    /// Smooth the amplitude solutions of every measurement set; returns
    /// the name of the smoothed solution set.
    fn smooth_solutions(
        &self,
        sentinels: &Sentinels,
        dataset: &DatasetRef,
        ddsols: &str,
        window: u32,
    ) -> Result<String> {
        let outsols = format!("{ddsols}.Smooth");
        for ms in dataset.names() {
            self.catcher.check()?;
            if sentinels.is_done(&steps::smooth_sentinel(ms, &outsols))? {
                continue;
            }
            let log = format!("smooth-{outsols}-{}.log", ms.replace('/', "_"));
            run_cmd(&steps::smooth_command(ms, ddsols, window), &self.opts(&log))?;
        }
        Ok(outsols)
    }

    /// Add imaging weights to any measurement set that lacks them.
    /// Returns true if any set needed them, which marks the dataset as
    /// new to this working directory.
    fn ensure_imaging_weights(&self, dataset: &DatasetRef) -> Result<bool> {
        self.ui.report("Checking for imaging weights in the input measurement sets");
        let mut added = false;
        for ms in dataset.names() {
            self.catcher.check()?;
            let marker = self.fs.resolve(format!("{ms}/IMAGING_WEIGHT"));
            if self.fs.exists(&marker) {
                continue;
            }
            let log = format!("weights-{}.log", ms.replace('/', "_"));
            run_cmd(&steps::weights_command(ms), &self.opts(&log))?;
            added = true;
        }
        Ok(added)
    }

    /// Find the shortest usable calibration baseline. The optimiser's
    /// result is cached in a text file, so it is computed once per image
    /// even across restarts.
    fn optimize_uvmin(&self, root: &str, mslist: &str, colname: &str) -> Result<f64> {
        self.ui.report("Optimizing uvmin for self-cal");
        let file = self.fs.resolve(steps::uvmin_file(root));
        let floor = self.settings.solutions_uvmin.unwrap_or(0.0);
        if !self.fs.exists(&file) {
            run_cmd(
                &steps::uvmin_command(root, mslist, colname),
                &self.opts(&format!("uvmin-{root}.log")),
            )?;
        }
        if !self.fs.exists(&file) {
            // dry run: the optimiser never wrote its output
            return Ok(floor);
        }
        let text = self.fs.read_to_string(&file)?;
        let value: f64 = text
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .parse()
            .with_context(|| format!("parsing uvmin value in {file:?}"))?;
        log::info!("using shortest baseline of {value} km");
        Ok(value.max(floor))
    }

    /// Predict and subtract the outer field so only the central square
    /// remains in the data. Both halves leave a marker file behind, since
    /// neither produces an artifact of its own.
    fn subtract_outer_field(
        &self,
        sentinels: &Sentinels,
        cache_dir: &Path,
        colname: &str,
    ) -> Result<()> {
        let s = &self.settings;
        self.catcher.check()?;
        let mslist = s.mslist.display().to_string();
        let inner = s.imsize / s.reduce_field;

        let predicted = "image_predict.HasPredicted";
        if !sentinels.is_done(predicted)? {
            let cmd = steps::predict_command(
                s,
                cache_dir,
                "image_phase1_predict",
                &mslist,
                colname,
                inner,
            );
            run_cmd(&cmd, &self.opts("ddf-image_phase1_predict.log"))?;
            self.fs.write_file(self.fs.resolve(predicted), "")?;
        }

        let subtracted = "image_predict.HasSubtracted";
        if !sentinels.is_done(subtracted)? {
            let cmd = steps::subtract_command(&mslist, colname, "DATA_SUB", "DATA_SUB");
            run_cmd(&cmd, &self.opts("subtract-outer.log"))?;
            self.fs.write_file(self.fs.resolve(subtracted), "")?;
        }
        Ok(())
    }

    fn clear_all_caches(
        &self,
        cache: &CacheManager,
        mslist: &DatasetRef,
        temp: &DatasetRef,
        full: Option<&DatasetRef>,
    ) -> Result<()> {
        let mut all = vec![mslist, temp];
        if let Some(full) = full {
            all.push(full);
        }
        cache.clear_all(&all)
    }
}
