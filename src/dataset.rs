use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::fs::Fs;

/// One logical group of input data: a plain-text list file naming one
/// measurement set per line. The list file name scopes the derived cache
/// entries; the listed names drive per-file calibration loops and cache
/// clearing. The engine never looks inside the measurement sets.
#[derive(Clone, Debug)]
pub struct DatasetRef {
    path: PathBuf,
    names: Vec<String>,
}

impl DatasetRef {
    /// Load a dataset reference from its list file.
    pub fn load(fs: &Fs, path: &Path) -> Result<Self> {
        let names = fs.read_lines(fs.resolve(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            names,
        })
    }

    /// Like `load`, but a missing list file yields an empty reference.
    /// Used for transient lists (for example the bootstrap scratch list)
    /// that only exist on some runs but still own cache entries.
    pub fn load_or_empty(fs: &Fs, path: &Path) -> Result<Self> {
        if fs.exists(fs.resolve(path)) {
            Self::load(fs, path)
        } else {
            Ok(Self {
                path: path.to_path_buf(),
                names: Vec::new(),
            })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The list file name itself, used to name dataset-wide cache entries.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_load_trims_and_skips_blank_lines() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("mslist.txt"), "ms1.ms\n\n  ms2.ms \n")?;

        let fs = Fs::new(dir.path(), false);
        let ds = DatasetRef::load(&fs, Path::new("mslist.txt"))?;

        assert_eq!(ds.names(), ["ms1.ms", "ms2.ms"]);
        assert_eq!(ds.file_name(), "mslist.txt");
        Ok(())
    }

    #[test]
    fn test_load_or_empty_tolerates_missing_file() -> Result<()> {
        let dir = tempdir()?;
        let fs = Fs::new(dir.path(), false);
        let ds = DatasetRef::load_or_empty(&fs, Path::new("temp_mslist.txt"))?;
        assert!(ds.names().is_empty());
        assert_eq!(ds.file_name(), "temp_mslist.txt");
        Ok(())
    }
}
