/// High-level pipeline driver
mod app;
/// Definition of command-line args
mod args;
/// Background task coordination
mod background;
/// Dataset cache invalidation
mod cache;
/// Cooperative cancellation flag
mod cancel;
/// Dataset list files
mod dataset;
/// External step execution
mod exec;
/// Filesystem operations
mod fs;
/// End-of-run summary
mod report;
/// Skip-if-done decisions
mod sentinel;
/// Combined command-line and env run settings
mod settings;
/// Stage table, forward execution, rollback
mod stages;
/// Command lines for the external tools
mod steps;
/// Text UI
mod ui;

// exported for main and tests:
pub use app::{App, Outcome};
pub use args::Args;
pub use cancel::Cancelled;
pub use settings::Settings;
pub use stages::Sequencer;

/// Run the command-line app.
pub fn run() -> Result<Outcome, anyhow::Error> {
    use clap::Parser;
    let args = Args::parse();

    // INTERPRET SETTINGS ///////////////
    let settings: Settings = args.try_into()?;

    let log_level = match settings.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logging::log_to_stderr(log_level);

    // RUN THE THING /////////////////
    let app = App::new(settings);
    app.run()
}
