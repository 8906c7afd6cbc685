use std::process::ExitCode;

use fieldrun::{Cancelled, Outcome};

fn main() -> ExitCode {
    match fieldrun::run() {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::StoppedEarly(_)) => ExitCode::from(2),
        Err(err) => {
            if err.root_cause().is::<Cancelled>() {
                eprintln!("fieldrun: {}", err.root_cause());
            } else {
                eprintln!("fieldrun error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
