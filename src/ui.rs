use std::cell::RefCell;
use std::time::{SystemTime, SystemTimeError};

use colored::Colorize;

use crate::settings::Settings;

/// All interactions with the text UI should go through this struct.
pub struct Ui {
    /// -q setting, suppresses progress chatter
    quiet: bool,
    /// keeps track of time for each stage;
    /// RefCell so timing doesn't need a unique reference
    timer: RefCell<Timer>,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            quiet: settings.quiet,
            timer: RefCell::new(Timer::now()),
        }
    }

    /// Announce a unit of pipeline progress.
    pub fn report(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Surface a non-fatal oddity to the operator.
    pub fn warn(&self, msg: &str) {
        eprintln!("{} {}", "WARNING:".yellow(), msg);
    }

    pub fn start_timer(&self) {
        self.timer.borrow_mut().reset();
    }

    pub fn print_elapsed(&self, task: &str) -> Result<(), SystemTimeError> {
        if self.quiet {
            Ok(())
        } else {
            self.timer.borrow().print_elapsed(task)
        }
    }
}

/// Utility for keeping track of the time it took to perform some operation.
struct Timer {
    start_time: SystemTime,
}

impl Timer {
    fn now() -> Self {
        Self {
            start_time: SystemTime::now(),
        }
    }

    fn reset(&mut self) {
        self.start_time = SystemTime::now();
    }

    fn print_elapsed(&self, task: &str) -> Result<(), SystemTimeError> {
        eprintln!("{} took {:?}", task, self.start_time.elapsed()?);
        Ok(())
    }
}
