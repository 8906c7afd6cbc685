use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cancel::Catcher;
use crate::fs::Fs;
use crate::sentinel::Sentinels;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown stage \"{0}\": not a valid restart point")]
    UnknownStage(String),
}

/// Archiving a stage below this table index strips the bootstrap solution
/// columns from the dataset (once per rollback, however many such stages
/// are archived).
const STRIP_BOUNDARY: usize = 2;

/// Lifecycle of one stage within a single engine run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    Done,
    Skipped,
    Archived,
}

/// One named unit of pipeline work.
///
/// `artifacts` are the glob patterns moved to the archive when the stage
/// is rolled back; `done` is the completion sentinel consulted before
/// running the stage forward (stages whose steps carry their own
/// finer-grained sentinels leave it unset); `solutions` names the
/// secondary solution set handed to the archival hook on rollback.
#[derive(Clone, Debug)]
pub struct Stage {
    pub name: String,
    pub done: Option<String>,
    pub artifacts: Vec<String>,
    pub solutions: Option<String>,
}

impl Stage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            done: None,
            artifacts: Vec::new(),
            solutions: None,
        }
    }

    pub fn done(mut self, artifact: &str) -> Self {
        self.done = Some(artifact.to_owned());
        self
    }

    pub fn artifacts(mut self, patterns: &[&str]) -> Self {
        self.artifacts = patterns.iter().map(|p| (*p).to_owned()).collect();
        self
    }

    pub fn solutions(mut self, name: &str) -> Self {
        self.solutions = Some(name.to_owned());
        self
    }
}

/// Domain hooks invoked during rollback for state that lives outside the
/// working directory.
pub trait RollbackHooks {
    /// Strip previously applied solution columns from the dataset.
    /// Irreversible; called at most once per rollback.
    fn strip_solution_columns(&mut self) -> Result<()>;

    /// Archive the named solution sets. Called at most once per rollback,
    /// with every collected name.
    fn archive_solutions(&mut self, names: &[&str]) -> Result<()>;
}

/// The ordered stage table and per-stage run state.
///
/// Stages form a strictly linear sequence; forward execution applies
/// skip-if-done semantics per stage, and rollback archives everything at
/// or after a requested restart point.
pub struct Sequencer {
    stages: Vec<Stage>,
    states: Vec<StageState>,
}

impl Sequencer {
    pub fn new(stages: Vec<Stage>) -> Self {
        let states = vec![StageState::Pending; stages.len()];
        Self { stages, states }
    }

    /// The fixed reduction pipeline: stage names mark restart points, and
    /// each stage's artifact globs cover everything produced after that
    /// point up to the next one.
    pub fn standard() -> Self {
        Self::new(vec![
            Stage::new("start").artifacts(&["image_dirin*", "external_mask.fits"]),
            Stage::new("dirin")
                .artifacts(&[
                    "*bootstrap*",
                    "image_phase1*",
                    "*crossmatch*",
                    "external_mask_ext.fits",
                ])
                .solutions("p1"),
            Stage::new("phase").artifacts(&["image_ampphase1*"]).solutions("ap1"),
            Stage::new("ampphase")
                .artifacts(&[
                    "image_full_low*",
                    "full-mask*.fits",
                    "external_mask_ext-deep.fits",
                ])
                .solutions("f_ap1"),
            Stage::new("fulllow").artifacts(&["image_full_ampphase1*"]),
            Stage::new("full").artifacts(&["image_full_ampphase2*"]).solutions("f_ap2"),
            Stage::new("full2").artifacts(&[
                "panstarrs-*",
                "astromap.fits",
                "facet-offset.txt",
                "summary.txt",
            ]),
        ])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    pub fn state(&self, name: &str) -> Option<StageState> {
        self.position(name).map(|i| self.states[i])
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.name.as_str())
    }

    /// Run one stage forward.
    ///
    /// Checks for cancellation first, then for the stage's completion
    /// sentinel; if the sentinel artifact exists the stage is skipped and
    /// `f` is never called. On success the stage is marked done; if `f`
    /// fails the stage is left in `Running` and is not marked done.
    pub fn advance<F>(
        &mut self,
        name: &str,
        sentinels: &Sentinels,
        catcher: &Catcher,
        f: F,
    ) -> Result<StageState>
    where
        F: FnOnce() -> Result<()>,
    {
        let idx = self
            .position(name)
            .ok_or_else(|| Error::UnknownStage(name.to_owned()))?;
        catcher.check()?;

        if let Some(done) = &self.stages[idx].done {
            if sentinels.is_done(done)? {
                self.states[idx] = StageState::Skipped;
                return Ok(StageState::Skipped);
            }
        }

        eprintln!("{} stage {name}", "RUN".green());
        self.states[idx] = StageState::Running;
        f().with_context(|| format!("while running stage \"{name}\""))?;
        self.states[idx] = StageState::Done;
        Ok(StageState::Done)
    }

    /// Roll the pipeline back to `target`: archive the declared artifacts
    /// of every stage at or after it, in table order, and fire the domain
    /// hooks. An unknown target fails before any filesystem mutation.
    pub fn rollback(
        &mut self,
        target: &str,
        fs: &Fs,
        archive_dir: &Path,
        hooks: &mut dyn RollbackHooks,
    ) -> Result<()> {
        let start = self
            .position(target)
            .ok_or_else(|| Error::UnknownStage(target.to_owned()))?;

        fs.create_dir(archive_dir)
            .context("creating archive directory")?;

        let mut solution_sets: Vec<&str> = Vec::new();
        let mut stripped = false;
        for idx in start..self.stages.len() {
            let stage = &self.stages[idx];
            log::info!("archiving stage \"{}\"", stage.name);
            for pattern in &stage.artifacts {
                fs.move_matching(pattern, archive_dir)
                    .with_context(|| format!("archiving artifacts of stage \"{}\"", stage.name))?;
            }
            if let Some(sols) = &stage.solutions {
                solution_sets.push(sols);
            }
            if idx < STRIP_BOUNDARY && !stripped {
                log::warn!("removing bootstrap solution columns");
                hooks.strip_solution_columns()?;
                stripped = true;
            }
            self.states[idx] = StageState::Archived;
        }

        if !solution_sets.is_empty() {
            hooks.archive_solutions(&solution_sets)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingHooks {
        strips: usize,
        archived: Vec<String>,
        archive_calls: usize,
    }

    impl RollbackHooks for RecordingHooks {
        fn strip_solution_columns(&mut self) -> Result<()> {
            self.strips += 1;
            Ok(())
        }
        fn archive_solutions(&mut self, names: &[&str]) -> Result<()> {
            self.archive_calls += 1;
            self.archived = names.iter().map(|n| (*n).to_owned()).collect();
            Ok(())
        }
    }

    fn abc_table() -> Vec<Stage> {
        vec![
            Stage::new("A").done("a.out").artifacts(&["a.out"]),
            Stage::new("B").done("b.out").artifacts(&["b.out"]).solutions("sols_b"),
            Stage::new("C").done("c.out").artifacts(&["c.out"]),
        ]
    }

    fn touch(dir: &std::path::Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    fn run_forward(
        seq: &mut Sequencer,
        sentinels: &Sentinels,
        catcher: &Catcher,
        work: &std::path::Path,
        ran: &mut Vec<String>,
    ) -> Result<()> {
        for name in ["A", "B", "C"] {
            let artifact = work.join(format!("{}.out", name.to_lowercase()));
            seq.advance(name, sentinels, catcher, || {
                fs::write(&artifact, "")?;
                ran.push(name.to_owned());
                Ok(())
            })?;
        }
        Ok(())
    }

    #[test]
    fn test_advance_skips_done_stages() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "a.out");
        touch(dir.path(), "b.out");

        let fs_iface = Fs::new(dir.path(), false);
        let sentinels = Sentinels::new(&fs_iface, true);
        let catcher = Catcher::new();
        let mut seq = Sequencer::new(abc_table());

        let mut ran = Vec::new();
        run_forward(&mut seq, &sentinels, &catcher, dir.path(), &mut ran)?;

        assert_eq!(ran, ["C"]);
        assert_eq!(seq.state("A"), Some(StageState::Skipped));
        assert_eq!(seq.state("B"), Some(StageState::Skipped));
        assert_eq!(seq.state("C"), Some(StageState::Done));
        Ok(())
    }

    #[test]
    fn test_second_run_skips_everything() -> Result<()> {
        let dir = tempdir()?;
        let fs_iface = Fs::new(dir.path(), false);
        let sentinels = Sentinels::new(&fs_iface, true);
        let catcher = Catcher::new();

        let mut ran = Vec::new();
        let mut seq = Sequencer::new(abc_table());
        run_forward(&mut seq, &sentinels, &catcher, dir.path(), &mut ran)?;
        assert_eq!(ran.len(), 3);

        let mut seq = Sequencer::new(abc_table());
        run_forward(&mut seq, &sentinels, &catcher, dir.path(), &mut ran)?;
        assert_eq!(ran.len(), 3, "no stage re-ran on the second pass");
        Ok(())
    }

    #[test]
    fn test_advance_stops_on_cancellation() -> Result<()> {
        let dir = tempdir()?;
        let fs_iface = Fs::new(dir.path(), false);
        let sentinels = Sentinels::new(&fs_iface, true);
        let catcher = Catcher::new();
        catcher.request_cancel();

        let mut seq = Sequencer::new(abc_table());
        let err = seq
            .advance("A", &sentinels, &catcher, || panic!("must not run"))
            .unwrap_err();
        assert!(err.root_cause().is::<crate::cancel::Cancelled>());
        assert_eq!(seq.state("A"), Some(StageState::Pending));
        Ok(())
    }

    #[test]
    fn test_rollback_archives_target_and_later_stages() -> Result<()> {
        let dir = tempdir()?;
        for f in ["a.out", "b.out", "c.out"] {
            touch(dir.path(), f);
        }
        let archive = dir.path().join("old");

        let fs_iface = Fs::new(dir.path(), false);
        let mut seq = Sequencer::new(abc_table());
        let mut hooks = RecordingHooks::default();
        seq.rollback("B", &fs_iface, &archive, &mut hooks)?;

        assert!(dir.path().join("a.out").exists(), "earlier artifact stays");
        assert!(!dir.path().join("b.out").exists());
        assert!(!dir.path().join("c.out").exists());
        assert!(archive.join("b.out").exists());
        assert!(archive.join("c.out").exists());

        assert_eq!(seq.state("A"), Some(StageState::Pending));
        assert_eq!(seq.state("B"), Some(StageState::Archived));
        assert_eq!(seq.state("C"), Some(StageState::Archived));

        assert_eq!(hooks.archived, ["sols_b"]);
        assert_eq!(hooks.archive_calls, 1);
        // B is at index 1, inside the bootstrap range:
        assert_eq!(hooks.strips, 1);
        Ok(())
    }

    #[test]
    fn test_forward_pass_after_rollback_reruns_archived_stages() -> Result<()> {
        let dir = tempdir()?;
        for f in ["a.out", "b.out", "c.out"] {
            touch(dir.path(), f);
        }
        let archive = dir.path().join("old");

        let fs_iface = Fs::new(dir.path(), false);
        let mut seq = Sequencer::new(abc_table());
        let mut hooks = RecordingHooks::default();
        seq.rollback("B", &fs_iface, &archive, &mut hooks)?;

        let sentinels = Sentinels::new(&fs_iface, true);
        let catcher = Catcher::new();
        let mut ran = Vec::new();
        let mut seq = Sequencer::new(abc_table());
        run_forward(&mut seq, &sentinels, &catcher, dir.path(), &mut ran)?;

        assert_eq!(ran, ["B", "C"], "A kept its artifact, B and C re-ran");
        Ok(())
    }

    #[test]
    fn test_rollback_from_start_strips_columns_once() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "a.out");
        touch(dir.path(), "b.out");
        let archive = dir.path().join("old");

        let fs_iface = Fs::new(dir.path(), false);
        let mut seq = Sequencer::new(abc_table());
        let mut hooks = RecordingHooks::default();
        // both A (idx 0) and B (idx 1) are inside the strip range,
        // but the side effect fires exactly once:
        seq.rollback("A", &fs_iface, &archive, &mut hooks)?;
        assert_eq!(hooks.strips, 1);
        Ok(())
    }

    #[test]
    fn test_rollback_past_strip_range_never_strips() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "c.out");
        let archive = dir.path().join("old");

        let fs_iface = Fs::new(dir.path(), false);
        let mut seq = Sequencer::new(abc_table());
        let mut hooks = RecordingHooks::default();
        seq.rollback("C", &fs_iface, &archive, &mut hooks)?;
        assert_eq!(hooks.strips, 0);
        assert!(hooks.archived.is_empty());
        assert_eq!(hooks.archive_calls, 0);
        Ok(())
    }

    #[test]
    fn test_unknown_rollback_target_mutates_nothing() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "a.out");
        let archive: PathBuf = dir.path().join("old");

        let fs_iface = Fs::new(dir.path(), false);
        let mut seq = Sequencer::new(abc_table());
        let mut hooks = RecordingHooks::default();
        let err = seq
            .rollback("nonsense", &fs_iface, &archive, &mut hooks)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnknownStage(_))
        ));
        assert!(dir.path().join("a.out").exists());
        assert!(!archive.exists(), "archive dir was never created");
        assert_eq!(hooks.strips, 0);
        Ok(())
    }

    #[test]
    fn test_standard_table_order() {
        let seq = Sequencer::standard();
        let names: Vec<&str> = seq.stage_names().collect();
        assert_eq!(
            names,
            ["start", "dirin", "phase", "ampphase", "fulllow", "full", "full2"]
        );
    }
}
