use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

/// A cancellation request was observed at a checkpoint.
///
/// This is a deliberate stop, not a failure; the top level reports it
/// as user-requested rather than printing an error chain.
#[derive(Debug, thiserror::Error)]
#[error("run cancelled by user request")]
pub struct Cancelled;

/// Process-wide cancellation flag.
///
/// Long-running components call `check()` before starting expensive work.
/// The flag is set either by an OS signal (see `install`) or directly via
/// `request_cancel`, and once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct Catcher {
    flag: Arc<AtomicBool>,
}

impl Catcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register SIGINT and SIGTERM handlers that set the flag.
    pub fn install(&self) -> Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        signal_hook::flag::register(SIGINT, Arc::clone(&self.flag))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&self.flag))?;
        Ok(())
    }

    /// Request cancellation. Safe to call from any thread, idempotent.
    pub fn request_cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if cancellation has been requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_until_requested() {
        let catcher = Catcher::new();
        assert!(catcher.check().is_ok());

        catcher.request_cancel();
        assert!(catcher.check().is_err());

        // idempotent:
        catcher.request_cancel();
        assert!(catcher.is_cancelled());
    }

    #[test]
    fn test_clones_share_the_flag() {
        let catcher = Catcher::new();
        let other = catcher.clone();
        other.request_cancel();
        assert!(catcher.check().is_err());
    }
}
