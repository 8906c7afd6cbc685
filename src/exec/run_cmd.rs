use std::fs::File;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use colored::Colorize;

use super::Error;

/// How to run one external step.
#[derive(Clone, Debug, Default)]
pub struct RunOpts {
    /// record the command but do not execute it
    pub dry_run: bool,
    /// suppress console output when no log file is given
    pub quiet: bool,
    /// redirect combined stdout/stderr to this file
    pub log: Option<PathBuf>,
}

/// Run an external processing step, blocking until it exits.
///
/// The command is a full shell line (the external imaging and calibration
/// tools take long option strings), so it goes through `sh -c`. Combined
/// output is redirected to the log file if one is given, otherwise it
/// reaches the console unless `quiet` is set. Exit status zero is the only
/// success condition; nothing else about the tool is inspected.
pub fn run_cmd(cmdline: &str, opts: &RunOpts) -> Result<()> {
    if opts.dry_run {
        eprintln!("{} {cmdline}", "DRY RUN".cyan());
        return Ok(());
    }

    log::info!("running: {cmdline}");
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(cmdline);

    match &opts.log {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("creating log file {path:?}"))?;
            let file2 = file.try_clone().context("duplicating log file handle")?;
            cmd.stdout(file).stderr(file2);
        }
        None if opts.quiet => {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        None => {} // inherit the console
    }

    let status = cmd
        .status()
        .with_context(|| format!("spawning external step `{cmdline}`"))?;

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(Error::StepFailed {
                cmd: cmdline.to_owned(),
                code,
            }
            .into()),
            None => Err(Error::StepKilled {
                cmd: cmdline.to_owned(),
            }
            .into()),
        }
    }
}

/// Run a short shell line and return its trimmed stdout.
///
/// Used for probing the version banners of the external tools; a dry run
/// captures nothing and returns an empty string.
pub fn capture_cmd(cmdline: &str, dry_run: bool) -> Result<String> {
    if dry_run {
        return Ok(String::new());
    }
    log::debug!("capturing: {cmdline}");
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmdline)
        .stderr(Stdio::null())
        .output()
        .with_context(|| format!("spawning `{cmdline}`"))?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn quiet() -> RunOpts {
        RunOpts {
            quiet: true,
            ..RunOpts::default()
        }
    }

    #[test]
    fn test_zero_exit_is_success() -> Result<()> {
        run_cmd("true", &quiet())
    }

    #[test]
    fn test_nonzero_exit_is_fatal() {
        let err = run_cmd("exit 3", &quiet()).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::StepFailed { code, .. }) => assert_eq!(*code, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_output_goes_to_log_file() -> Result<()> {
        let dir = tempdir()?;
        let log = dir.path().join("step.log");
        let opts = RunOpts {
            log: Some(log.clone()),
            ..RunOpts::default()
        };
        run_cmd("echo out; echo err >&2", &opts)?;

        let text = std::fs::read_to_string(&log)?;
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        Ok(())
    }

    #[test]
    fn test_capture_cmd_returns_trimmed_stdout() -> Result<()> {
        assert_eq!(capture_cmd("echo 2.2-dev", false)?, "2.2-dev");
        // a failing command is not fatal, it just captures nothing:
        assert_eq!(capture_cmd("no-such-tool-here --version", false)?, "");
        assert_eq!(capture_cmd("echo 2.2-dev", true)?, "");
        Ok(())
    }

    #[test]
    fn test_dry_run_executes_nothing() -> Result<()> {
        let dir = tempdir()?;
        let marker = dir.path().join("ran");
        let opts = RunOpts {
            dry_run: true,
            quiet: true,
            log: None,
        };
        run_cmd(&format!("touch {}", marker.display()), &opts)?;
        assert!(!marker.exists());
        Ok(())
    }
}
