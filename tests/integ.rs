use anyhow::Result;
use clap::Parser;
use fieldrun::{App, Args, Outcome, Sequencer, Settings};
use tempfile::{tempdir, TempDir};

/// A working directory seeded with a calibration list and a full list,
/// the way an operator would set one up.
fn workdir() -> Result<TempDir> {
    let dir = tempdir()?;
    std::fs::write(dir.path().join("mslist.txt"), "ms1.ms\nms2.ms\n")?;
    std::fs::write(dir.path().join("big-mslist.txt"), "ms1.ms\nms2.ms\nms3.ms\n")?;
    Ok(dir)
}

fn run_app(dir: &TempDir, extra: &[&str]) -> Result<Outcome> {
    let mut argv = vec![
        "fieldrun",
        "--mslist",
        "mslist.txt",
        "--full-mslist",
        "big-mslist.txt",
        "--work-dir",
        dir.path().to_str().unwrap(),
        "--quiet",
        "--no-signal-handler",
    ];
    argv.extend_from_slice(extra);
    let settings: Settings = Args::parse_from(argv).try_into()?;
    App::new(settings).run()
}

#[test]
fn test_dry_run_walks_the_whole_pipeline() -> Result<()> {
    let dir = workdir()?;
    let outcome = run_app(&dir, &["--dry-run", "--method", "panstarrs"])?;
    assert!(matches!(outcome, Outcome::Completed));

    // a dry run records every command but touches nothing
    let entries: Vec<_> = std::fs::read_dir(dir.path())?.collect();
    assert_eq!(entries.len(), 2, "only the seeded list files remain");
    Ok(())
}

#[test]
fn test_dry_run_is_repeatable() -> Result<()> {
    let dir = workdir()?;
    run_app(&dir, &["--dry-run"])?;
    let outcome = run_app(&dir, &["--dry-run"])?;
    assert!(matches!(outcome, Outcome::Completed));
    Ok(())
}

#[test]
fn test_exit_after_stops_at_the_checkpoint() -> Result<()> {
    let dir = workdir()?;
    let outcome = run_app(&dir, &["--dry-run", "--exit-after", "dirin"])?;
    match outcome {
        Outcome::StoppedEarly(stage) => assert_eq!(stage, "dirin"),
        Outcome::Completed => panic!("run should have stopped at the checkpoint"),
    }
    Ok(())
}

#[test]
fn test_missing_external_tool_is_a_fatal_error() -> Result<()> {
    // without --dry-run the very first external step (shared memory
    // cleanup) fails, since the imaging tools are not on PATH here
    let dir = workdir()?;
    let err = run_app(&dir, &[]).unwrap_err();
    assert!(format!("{err:#}").contains("CleanSHM.py"));
    Ok(())
}

#[test]
fn test_unknown_redo_target_is_rejected_before_any_archiving() -> Result<()> {
    let dir = workdir()?;
    std::fs::write(dir.path().join("image_dirin_SSD.app.restored.fits"), "")?;

    let err = run_app(&dir, &["--dry-run", "--redo-from", "nonsense"]).unwrap_err();
    assert!(format!("{err:#}").contains("nonsense"));
    assert!(
        dir.path().join("image_dirin_SSD.app.restored.fits").exists(),
        "nothing was archived"
    );
    assert!(!dir.path().join("old").exists());
    Ok(())
}

#[test]
fn test_stage_table_names_are_valid_restart_points() {
    let seq = Sequencer::standard();
    for name in ["start", "dirin", "phase", "ampphase", "fulllow", "full", "full2"] {
        assert!(seq.position(name).is_some(), "{name} missing from the table");
    }
}
