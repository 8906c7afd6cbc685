//! End-of-run summary file.

use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::Local;

use crate::fs::Fs;
use crate::settings::Settings;

const SUMMARY_FILE: &str = "summary.txt";

/// Write the resolved configuration of a completed run to `summary.txt`
/// in the working directory, together with the versions of the external
/// tools it drove. Overwrites a summary from a previous run.
pub fn write_summary(fs: &Fs, settings: &Settings, tools: &[(&str, String)]) -> Result<()> {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "fieldrun {} run completed at {}",
        env!("CARGO_PKG_VERSION"),
        Local::now().format("%Y-%m-%d %H:%M:%S"),
    );
    for (tool, version) in tools {
        let _ = writeln!(out, "{tool} version was {version}");
    }
    let _ = writeln!(out);
    for (key, value) in settings.describe() {
        let _ = writeln!(out, "{key:<20} : {value}");
    }
    fs.write_file(fs.resolve(SUMMARY_FILE), &out)
        .with_context(|| format!("while writing {SUMMARY_FILE}"))
}
