//! Command lines for the external imaging and calibration tools.
//!
//! Everything here is pure string construction; deciding whether a step
//! runs at all (sentinels, cancellation, caching) happens in the driver.
//! The contract with every tool is exit code zero, nothing more.

use std::fmt::Write;
use std::path::Path;

use crate::cache::CacheManager;
use crate::settings::Settings;

/// Parameters for one imaging round.
pub struct ImageParams<'a> {
    pub name: &'a str,
    pub mslist: &'a str,
    pub colname: &'a str,
    pub majorcycles: u32,
    pub robust: f64,
    pub peak_factor: f64,
    pub rms_factor: f64,
    pub mask: Option<&'a str>,
    pub ddsols: Option<&'a str>,
    pub applysols: Option<&'a str>,
    pub dicomodel: Option<&'a str>,
    pub clusterfile: Option<&'a str>,
    pub imsize: Option<u32>,
    pub cellsize: Option<f64>,
    pub beamsize: Option<f64>,
    pub uvrange: Option<(f64, f64)>,
    pub automask_threshold: Option<f64>,
    pub reuse_psf: bool,
    pub reuse_dirty: bool,
    pub dirty_from_resid: bool,
    pub smooth: bool,
}

impl<'a> ImageParams<'a> {
    pub fn new(name: &'a str, mslist: &'a str, colname: &'a str) -> Self {
        Self {
            name,
            mslist,
            colname,
            majorcycles: 3,
            robust: 0.0,
            peak_factor: 0.1,
            rms_factor: 3.0,
            mask: None,
            ddsols: None,
            applysols: None,
            dicomodel: None,
            clusterfile: None,
            imsize: None,
            cellsize: None,
            beamsize: None,
            uvrange: None,
            automask_threshold: Some(10.0),
            reuse_psf: false,
            reuse_dirty: false,
            dirty_from_resid: false,
            smooth: false,
        }
    }
}

/// The artifact whose existence marks this imaging round complete:
/// the restored image, or the dirty image for a dirty-only round.
pub fn image_sentinel(p: &ImageParams) -> String {
    if p.majorcycles > 0 {
        format!("{}.app.restored.fits", p.name)
    } else {
        format!("{}.dirty.fits", p.name)
    }
}

/// Cache entries are keyed by the list file's name, without any leading path.
fn dataset_entry(mslist: &str) -> &str {
    Path::new(mslist)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(mslist)
}

pub fn image_command(s: &Settings, cache: &CacheManager, p: &ImageParams) -> String {
    let cache_dir = cache.resolve();
    let entry = dataset_entry(p.mslist);
    let imsize = p.imsize.unwrap_or(s.imsize);
    let cellsize = p.cellsize.unwrap_or(s.cellsize);
    let mut cmd = format!(
        "DDF.py --Output-Name={} --Data-MS={} --Deconv-PeakFactor {} --Data-ColName {} \
         --Parallel-NCPU={} --Image-Mode=Clean --Deconv-CycleFactor=0 \
         --Deconv-MaxMinorIter=1000000 --Deconv-MaxMajorIter={} --Deconv-Mode SSD \
         --SSDClean-SSDSolvePars [S,Alpha] --SSDClean-BICFactor 0 --Weight-Robust {} \
         --Image-NPix={} --Image-Cell {} --Facets-NFacets=11 --Deconv-RMSFactor={} \
         --Weight-ColName=IMAGING_WEIGHT --Freq-NBand=2 --Data-Sort 1 --Cache-Dir={}",
        p.name,
        p.mslist,
        p.peak_factor,
        p.colname,
        s.ncpu,
        p.majorcycles,
        p.robust,
        imsize,
        cellsize,
        p.rms_factor,
        cache_dir.display(),
    );
    if let Some(beam) = p.beamsize {
        let _ = write!(cmd, " --Output-RestoringBeam {beam}");
    }
    if let Some(cluster) = p.clusterfile {
        let _ = write!(cmd, " --Facets-CatNodes={cluster}");
    }
    if let Some(threshold) = p.automask_threshold {
        let _ = write!(cmd, " --Mask-Auto=1 --Mask-SigTh={threshold:.2}");
    }
    if let Some(mask) = p.mask {
        let _ = write!(cmd, " --Mask-External={mask}");
    }
    if let (Some(apply), Some(sols)) = (p.applysols, p.ddsols) {
        let _ = write!(
            cmd,
            " --DDESolutions-DDModeGrid={apply} --DDESolutions-DDModeDeGrid={apply} \
             --DDESolutions-DDSols={sols}"
        );
    }
    if let Some(dico) = p.dicomodel {
        let _ = write!(cmd, " --Predict-InitDicoModel={dico}");
    }
    if let Some((lo, hi)) = p.uvrange {
        let _ = write!(cmd, " --Selection-UVRangeKm=[{lo},{hi}]");
    }
    // A crash or cache clear can destroy the entry a reuse flag points at;
    // forcing reuse of a missing entry makes DDF.py fail, so check first.
    if p.dirty_from_resid && cache.has_entry_item(entry, "LastResidual") {
        cmd.push_str(" --Cache-Dirty forceresidual");
    }
    if p.reuse_dirty && cache.has_entry_item(entry, "Dirty") {
        cmd.push_str(" --Cache-Dirty forcedirty");
    }
    if p.reuse_psf && cache.has_entry_item(entry, "PSF") {
        cmd.push_str(" --Cache-PSF force");
    }
    if p.smooth {
        cmd.push_str(" --Beam-Smooth=1");
    }
    cmd
}

/// Predict-only imaging round used by the reduced-field branch.
pub fn predict_command(
    s: &Settings,
    cache_dir: &Path,
    name: &str,
    mslist: &str,
    colname: &str,
    npix_inner: u32,
) -> String {
    format!(
        "DDF.py --Output-Name={name} --Data-MS={mslist} --Data-ColName {colname} \
         --Parallel-NCPU={} --Image-Mode=Predict --Predict-InitDicoModel=image_phase1.DicoModel \
         --Image-NPix={} --Image-Cell {} --Predict-MaskSquare [0,{npix_inner}] --Cache-Dir={}",
        s.ncpu,
        s.imsize,
        s.cellsize,
        cache_dir.display(),
    )
}

/// Parameters for one calibration round on a single measurement set.
pub struct CalParams<'a> {
    pub colname: &'a str,
    pub niterkf: u32,
    pub dicomodel: Option<&'a str>,
    pub clusterfile: Option<&'a str>,
    pub uvrange: Option<(f64, f64)>,
    pub wtuv: Option<f64>,
    pub robust: Option<f64>,
}

/// Per-measurement-set solutions sentinel; lets a failed multi-set
/// calibration round resume from the set it died on.
pub fn calibrate_sentinel(ms: &str, outsols: &str) -> String {
    format!("{ms}/killMS.{outsols}.sols.npz")
}

pub fn calibrate_command(
    s: &Settings,
    cache_dir: &Path,
    ms: &str,
    image: &str,
    outsols: &str,
    p: &CalParams,
) -> String {
    let mut cmd = format!(
        "killMS.py --MSName {ms} --SolverType KAFCA --PolMode Scalar --BaseImageName {image} \
         --dt {} --NIterKF {} --CovQ 0.1 --NCPU {} --OutSolsName {outsols} --InCol {} \
         --DDFCacheDir={}",
        s.dt,
        p.niterkf,
        s.ncpu,
        p.colname,
        cache_dir.display(),
    );
    match p.robust {
        Some(robust) => {
            let _ = write!(cmd, " --Weighting Briggs --Robust={robust}");
        }
        None => cmd.push_str(" --Weighting Natural"),
    }
    if let Some((lo, hi)) = p.uvrange {
        match p.wtuv {
            Some(wtuv) => {
                let _ = write!(cmd, " --WTUV={wtuv} --WeightUVMinMax={lo},{hi}");
            }
            None => {
                let _ = write!(cmd, " --UVMinMax={lo},{hi}");
            }
        }
    }
    if let Some(cluster) = p.clusterfile {
        let _ = write!(cmd, " --NodesFile {cluster}");
    }
    if let Some(dico) = p.dicomodel {
        let _ = write!(cmd, " --DicoModel {dico}");
    }
    cmd
}

pub fn mask_sentinel(image: &str) -> String {
    format!("{image}.mask.fits")
}

pub fn mask_command(image: &str, threshold: f64) -> String {
    format!("MakeMask.py --RestoredIm={image} --Th={threshold} --Box=50,2")
}

/// Merge a second mask into the first, in place.
pub fn merge_mask_command(mask: &str, other: &str) -> String {
    format!("MergeMask.py --InMask={mask} --MergeMask={other} --OutMask={mask}")
}

pub fn model_sentinel(image: &str) -> String {
    format!("{image}.npy")
}

/// Cluster the sky model into facet directions. Re-running this step
/// changes the facet geometry, so the driver clears the dataset cache
/// whenever it actually runs.
pub fn model_command(mask: &str, image: &str, ndir: u32) -> String {
    format!("MakeModel.py --MaskName={mask} --BaseImageName={image} --NCluster={ndir} --DoPlot=0")
}

pub fn masked_model_command(indico: &str, mask: &str, outdico: &str) -> String {
    format!("MaskDicoModel.py --MaskName={mask} --InDicoModel={indico} --OutDicoModel={outdico}")
}

pub fn external_mask_command(
    s: &Settings,
    out: &str,
    template: &str,
    extended: Option<&str>,
) -> String {
    let mut cmd = format!("MakeExternalMask.py --OutMask={out} --Template={template}");
    if let Some(tgss) = &s.tgss {
        let _ = write!(cmd, " --TGSS={tgss}");
    }
    if let Some(region) = &s.region {
        let _ = write!(cmd, " --Region={region}");
    }
    if let Some(extended) = extended {
        let _ = write!(cmd, " --Extended={extended}");
    }
    cmd
}

pub fn extended_mask_command(
    s: &Settings,
    base_image: &str,
    compare_image: &str,
    rootname: &str,
    size_threshold: f64,
) -> String {
    format!(
        "MakeExtendedMask.py --Image={base_image} --Compare={compare_image} \
         --RMSThresh={} --SizeThresh={size_threshold} --RootName={rootname}",
        s.extended_rms,
    )
}

pub fn smooth_sentinel(ms: &str, sols: &str) -> String {
    format!("{ms}/killMS.{sols}.Smooth.sols.npz")
}

pub fn smooth_command(ms: &str, sols: &str, window: u32) -> String {
    format!("SmoothSols.py --MSName={ms} --SolsFile={sols} --WSize={window} --Order=2")
}

pub fn weights_command(ms: &str) -> String {
    format!("AddImagingWeights.py {ms}")
}

pub fn subtract_command(mslist: &str, colname_a: &str, colname_b: &str, out_colname: &str) -> String {
    format!(
        "SubtractColumns.py --MSList={mslist} --ColA={colname_a} --ColB={colname_b} \
         --OutCol={out_colname}"
    )
}

pub fn bootstrap_command(s: &Settings) -> String {
    let mut cmd = format!("bootstrap.py --mslist={}", s.mslist.display());
    if let Some(full) = &s.full_mslist {
        let _ = write!(cmd, " --full-mslist={}", full.display());
    }
    cmd
}

pub fn download_command(method: &str) -> String {
    format!("DownloadCatalogue.py {method}")
}

/// The catalogue file whose presence means the download is complete.
pub fn catalogue_sentinel(method: &str) -> String {
    format!("{method}-catalog.fits")
}

pub fn offsets_command(s: &Settings, method: &str) -> String {
    format!(
        "FacetOffsets.py --method={method} --mslist={}",
        s.mslist.display()
    )
}

pub fn shift_sentinel(image: &str) -> String {
    format!("{image}_shift.app.facetRestored.fits")
}

pub fn shift_command(cache_dir: &Path, image: &str, shiftfile: &str) -> String {
    format!(
        "DDF.py {image}.parset --Output-Name={image}_shift --Image-Mode=RestoreAndShift \
         --Output-ShiftFacetsFile={shiftfile} --Predict-InitDicoModel {image}.DicoModel \
         --Cache-SmoothBeam=force --Cache-Dir={}",
        cache_dir.display(),
    )
}

pub fn strip_columns_command(mslist: &str) -> String {
    format!("RemoveBootstrapColumns.py {mslist}")
}

pub fn archive_solutions_command(archive_dir: &Path, names: &[&str]) -> String {
    format!(
        "ArchiveSolutions.py --dest={} {}",
        archive_dir.display(),
        names.join(" "),
    )
}

pub fn clean_shm_command() -> String {
    String::from("CleanSHM.py")
}

/// Asks an external tool for its version banner.
pub fn version_command(tool: &str) -> String {
    format!("{tool} --version")
}

pub fn uvmin_file(root: &str) -> String {
    format!("{root}_uvmin.txt")
}

/// Writes the optimised uvmin value into `uvmin_file(root)`.
pub fn uvmin_command(root: &str, mslist: &str, colname: &str) -> String {
    format!("OptimizeUVMin.py --BaseImage={root} --MSList={mslist} --ColName={colname}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Args;
    use crate::fs::Fs;
    use clap::Parser;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn settings() -> Settings {
        let dir = std::env::temp_dir();
        let list = dir.join("steps-test-mslist.txt");
        std::fs::write(&list, "ms1.ms\n").unwrap();
        Args::parse_from([
            "fieldrun",
            "--mslist",
            list.to_str().unwrap(),
        ])
        .try_into()
        .unwrap()
    }

    #[test]
    fn test_image_sentinel_tracks_majorcycles() {
        let mut p = ImageParams::new("image_dirin_SSD", "mslist.txt", "CORRECTED_DATA");
        assert_eq!(image_sentinel(&p), "image_dirin_SSD.app.restored.fits");
        p.majorcycles = 0;
        assert_eq!(image_sentinel(&p), "image_dirin_SSD.dirty.fits");
    }

    #[test]
    fn test_image_command_optional_flags() {
        let s = settings();
        let work = tempdir().unwrap();
        let fs_iface = Fs::new(work.path(), false);
        let cache = CacheManager::new(&fs_iface, Some(work.path()));
        let mut p = ImageParams::new("image_phase1", "mslist.txt", "CORRECTED_DATA");
        p.ddsols = Some("killms_p1");
        p.applysols = Some("P");
        p.dicomodel = Some("image_dirin_SSD_masked.DicoModel");
        p.uvrange = Some((0.1, 1000.0));

        let cmd = image_command(&s, &cache, &p);
        assert!(cmd.starts_with("DDF.py "));
        assert!(cmd.contains("--Output-Name=image_phase1"));
        assert!(cmd.contains("--DDESolutions-DDSols=killms_p1"));
        assert!(cmd.contains("--DDESolutions-DDModeGrid=P"));
        assert!(cmd.contains("--Predict-InitDicoModel=image_dirin_SSD_masked.DicoModel"));
        assert!(cmd.contains("--Selection-UVRangeKm=[0.1,1000]"));
        assert!(cmd.contains(&format!("--Cache-Dir={}", work.path().display())));
    }

    #[test]
    fn test_solutions_not_applied_without_both_halves() {
        let s = settings();
        let work = tempdir().unwrap();
        let fs_iface = Fs::new(work.path(), false);
        let cache = CacheManager::new(&fs_iface, None);
        let mut p = ImageParams::new("image", "mslist.txt", "CORRECTED_DATA");
        p.applysols = Some("AP");
        // no ddsols supplied:
        let cmd = image_command(&s, &cache, &p);
        assert!(!cmd.contains("--DDESolutions"));
    }

    #[test]
    fn test_cache_reuse_flags_need_surviving_entries() {
        let s = settings();
        let work = tempdir().unwrap();
        let fs_iface = Fs::new(work.path(), false);
        let cache = CacheManager::new(&fs_iface, Some(work.path()));
        let mut p = ImageParams::new("image_full", "lists/mslist.txt", "DATA_SUB");
        p.reuse_psf = true;
        p.dirty_from_resid = true;

        // nothing cached yet: forcing reuse would make the tool fail
        let cmd = image_command(&s, &cache, &p);
        assert!(!cmd.contains("--Cache-PSF"));
        assert!(!cmd.contains("--Cache-Dirty"));

        let entry = work.path().join("mslist.txt.ddfcache");
        std::fs::create_dir(&entry).unwrap();
        std::fs::write(entry.join("PSF"), "").unwrap();
        std::fs::write(entry.join("LastResidual"), "").unwrap();

        let cmd = image_command(&s, &cache, &p);
        assert!(cmd.contains("--Cache-PSF force"));
        assert!(cmd.contains("--Cache-Dirty forceresidual"));

        p.dirty_from_resid = false;
        p.reuse_dirty = true;
        // the Dirty item itself is still missing:
        let cmd = image_command(&s, &cache, &p);
        assert!(!cmd.contains("--Cache-Dirty forcedirty"));
    }

    #[test]
    fn test_calibrate_command_weighting() {
        let s = settings();
        let cache = PathBuf::from(".");
        let p = CalParams {
            colname: "CORRECTED_DATA",
            niterkf: 6,
            dicomodel: None,
            clusterfile: None,
            uvrange: Some((0.0, 1000.0)),
            wtuv: None,
            robust: None,
        };
        let cmd = calibrate_command(&s, &cache, "ms1.ms", "image_dirin_SSD", "killms_p1", &p);
        assert!(cmd.contains("--Weighting Natural"));
        assert!(cmd.contains("--UVMinMax=0,1000"));
        assert!(cmd.contains("--OutSolsName killms_p1"));

        let briggs = CalParams {
            robust: Some(-0.5),
            wtuv: Some(0.5),
            ..p
        };
        let cmd = calibrate_command(&s, &cache, "ms1.ms", "image", "killms_p1", &briggs);
        assert!(cmd.contains("--Weighting Briggs --Robust=-0.5"));
        assert!(cmd.contains("--WTUV=0.5 --WeightUVMinMax=0,1000"));
    }

    #[test]
    fn test_per_ms_sentinels() {
        assert_eq!(
            calibrate_sentinel("ms1.ms", "killms_p1"),
            "ms1.ms/killMS.killms_p1.sols.npz"
        );
        assert_eq!(
            smooth_sentinel("ms1.ms", "killms_ap1"),
            "ms1.ms/killMS.killms_ap1.Smooth.sols.npz"
        );
    }

    #[test]
    fn test_archive_solutions_command_lists_names() {
        let cmd = archive_solutions_command(Path::new("old"), &["p1", "ap1"]);
        assert_eq!(cmd, "ArchiveSolutions.py --dest=old p1 ap1");
    }
}
