use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};

/// Filesystem helpers shared by ops and tests
mod ops;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Working directory \"{0}\" is not a directory")]
    NotDirectory(String),
}

/// All file operations in the crate should go through this struct.
///
/// Paths are resolved relative to the working directory, which holds the
/// pipeline artifacts that serve as completion sentinels. In dry-run mode
/// every destructive operation is logged and skipped, so a dry run can
/// walk the whole pipeline without touching disk.
#[derive(Debug)]
pub struct Fs {
    /// the working directory holding pipeline artifacts
    root: PathBuf,
    /// if true, prevents all destructive operations
    dry_run: bool,
}

impl Fs {
    pub fn new(root: &Path, dry_run: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            dry_run,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that the working directory exists and is actually a directory.
    pub fn check_root(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::NotDirectory(self.root.display().to_string()).into());
        }
        Ok(())
    }

    /// Resolve a path against the working directory. Absolute paths pass
    /// through unchanged.
    pub fn resolve<T: AsRef<Path>>(&self, path: T) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Check if path exists and is a directory.
    pub fn is_dir<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().is_dir()
    }

    /// Create a directory tree.
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        if self.skip_destructive("create dir", path) {
            return Ok(());
        }
        fs::create_dir_all(path).with_context(|| format!("creating dir {path:?}"))?;
        Ok(())
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        if self.skip_destructive("write", path) {
            return Ok(());
        }
        fs::write(path, text).with_context(|| format!("writing file {path:?}"))?;
        Ok(())
    }

    /// Symlink `link` pointing at `target`, unless `link` already exists.
    pub fn symlink_if_missing<T: AsRef<Path>, U: AsRef<Path>>(
        &self,
        target: T,
        link: U,
    ) -> Result<()> {
        let (target, link) = (target.as_ref(), link.as_ref());
        if self.exists(link) {
            return Ok(());
        }
        if self.skip_destructive("symlink", link) {
            return Ok(());
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(target, link)
            .with_context(|| format!("symlinking {link:?} to {target:?}"))?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_file(target, link)
            .with_context(|| format!("symlinking {link:?} to {target:?}"))?;
        Ok(())
    }

    /// Read a file into a vec of trimmed, non-empty lines.
    pub fn read_lines<T: AsRef<Path>>(&self, path: T) -> Result<Vec<String>> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("reading list file {path:?}"))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Read entire file into a String.
    pub fn read_to_string<T: AsRef<Path>>(&self, path: T) -> Result<String> {
        let path = path.as_ref();
        fs::read_to_string(path).with_context(|| format!("reading {path:?}"))
    }

    /// True iff some artifact matching `pattern` exists under the working
    /// directory. A pattern with no wildcard is treated as a plain path,
    /// which also allows nested sentinels like `ms1/killMS.p1.sols.npz`.
    pub fn any_match(&self, pattern: &str) -> Result<bool> {
        if !is_glob(pattern) {
            return Ok(self.exists(self.resolve(pattern)));
        }
        Ok(!self.matching(&self.root, pattern)?.is_empty())
    }

    /// Paths of all entries of `dir` whose file name matches `pattern`.
    /// A missing `dir` yields no matches rather than an error.
    pub fn matching(&self, dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
        let matcher = compile(pattern)?;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {dir:?}")),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if matcher.is_match(entry.file_name()) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Move every working-directory entry matching `pattern` into
    /// `dest_dir`, replacing stale entries of the same name.
    /// Returns the number of entries moved.
    pub fn move_matching(&self, pattern: &str, dest_dir: &Path) -> Result<usize> {
        let found = self.matching(&self.root, pattern)?;
        for path in &found {
            if self.skip_destructive("move", path) {
                continue;
            }
            log::info!("moving {path:?} to {dest_dir:?}");
            ops::move_into(path, dest_dir)?;
        }
        Ok(found.len())
    }

    /// Recursively delete every entry of `dir` matching `pattern`.
    /// Entries that vanish underneath us are ignored; deletion is
    /// idempotent. Returns the number of entries deleted.
    pub fn remove_matching(&self, dir: &Path, pattern: &str) -> Result<usize> {
        let found = self.matching(dir, pattern)?;
        for path in &found {
            if self.skip_destructive("remove", path) {
                continue;
            }
            log::info!("removing {path:?}");
            ops::remove_entry(path)?;
        }
        Ok(found.len())
    }

    fn skip_destructive(&self, op: &str, path: &Path) -> bool {
        if self.dry_run {
            log::info!("dry run: would {op} {path:?}");
        }
        self.dry_run
    }
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn compile(pattern: &str) -> Result<GlobMatcher> {
    let glob =
        Glob::new(pattern).with_context(|| format!("invalid artifact pattern \"{pattern}\""))?;
    Ok(glob.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_matching_globs_and_sorts() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "image_dirin_SSD.app.restored.fits");
        touch(dir.path(), "image_dirin_SSD.dirty.fits");
        touch(dir.path(), "image_phase1.app.restored.fits");

        let fs = Fs::new(dir.path(), false);
        let found = fs.matching(dir.path(), "image_dirin*")?;
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("image_dirin_SSD.app.restored.fits"));
        Ok(())
    }

    #[test]
    fn test_matching_missing_dir_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let found = fs.matching(&dir.path().join("nope"), "*")?;
        assert!(found.is_empty());
        Ok(())
    }

    #[test]
    fn test_any_match_plain_path_may_be_nested() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("ms1"))?;
        touch(&dir.path().join("ms1"), "killMS.p1.sols.npz");

        let fs = Fs::new(dir.path(), false);
        assert!(fs.any_match("ms1/killMS.p1.sols.npz")?);
        assert!(!fs.any_match("ms2/killMS.p1.sols.npz")?);
        Ok(())
    }

    #[test]
    fn test_move_matching_archives_entries() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "image_full_low.dirty.fits");
        touch(dir.path(), "image_full_low.app.restored.fits");
        touch(dir.path(), "summary.txt");
        let archive = dir.path().join("old");
        fs::create_dir(&archive)?;

        let fs = Fs::new(dir.path(), false);
        let moved = fs.move_matching("image_full_low*", &archive)?;

        assert_eq!(moved, 2);
        assert!(archive.join("image_full_low.dirty.fits").exists());
        assert!(dir.path().join("summary.txt").exists());
        Ok(())
    }

    #[test]
    fn test_dry_run_blocks_destructive_ops() -> Result<()> {
        let dir = tempdir()?;
        touch(dir.path(), "a.out");
        let archive = dir.path().join("old");
        fs::create_dir(&archive)?;

        let fs = Fs::new(dir.path(), true);
        fs.move_matching("a.out", &archive)?;
        fs.remove_matching(dir.path(), "a.out")?;
        fs.write_file(dir.path().join("b.out"), "text")?;

        assert!(dir.path().join("a.out").exists());
        assert!(!archive.join("a.out").exists());
        assert!(!dir.path().join("b.out").exists());
        Ok(())
    }
}
