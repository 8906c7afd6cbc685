use anyhow::Result;

use crate::fs::Fs;

/// Decides skip-vs-run for every pipeline step.
///
/// An artifact's presence on disk is the sole completion oracle; content
/// is never inspected, so a corrupt-but-present artifact still counts as
/// done (accepted limitation, surfaced to the operator as a warning at
/// startup). With restart mode off, every step runs regardless of what is
/// already on disk.
pub struct Sentinels<'a> {
    fs: &'a Fs,
    restart: bool,
}

impl<'a> Sentinels<'a> {
    pub fn new(fs: &'a Fs, restart: bool) -> Self {
        Self { fs, restart }
    }

    /// True iff prior work product matching `artifact` already exists and
    /// the step may be skipped. Logs each skip decision.
    pub fn is_done(&self, artifact: &str) -> Result<bool> {
        if !self.restart {
            return Ok(false);
        }
        if self.fs.any_match(artifact)? {
            log::warn!("{artifact} already exists, skipping this step");
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_plain_and_glob_sentinels() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("image_phase1.app.restored.fits"), "")?;

        let fs = Fs::new(dir.path(), false);
        let sentinels = Sentinels::new(&fs, true);

        assert!(sentinels.is_done("image_phase1.app.restored.fits")?);
        assert!(sentinels.is_done("image_phase1*")?);
        assert!(!sentinels.is_done("image_ampphase1.app.restored.fits")?);
        Ok(())
    }

    #[test]
    fn test_restart_off_never_skips() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("a.out"), "")?;

        let fs = Fs::new(dir.path(), false);
        let sentinels = Sentinels::new(&fs, false);

        assert!(!sentinels.is_done("a.out")?);
        Ok(())
    }
}
