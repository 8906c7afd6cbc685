/// Run one external processing step
mod run_cmd;
pub use run_cmd::{capture_cmd, run_cmd, RunOpts};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("External step failed with exit code {code}: {cmd}")]
    StepFailed { cmd: String, code: i32 },
    #[error("External step killed by signal: {cmd}")]
    StepKilled { cmd: String },
}
