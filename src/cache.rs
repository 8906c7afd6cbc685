use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::Result;

use crate::dataset::DatasetRef;
use crate::fs::Fs;

/// Name suffix of derived per-dataset cache entries.
pub const CACHE_SUFFIX: &str = ".ddfcache";

/// Maps datasets to their derived on-disk cache and invalidates it.
///
/// The configured cache root may only exist on some machines; when it is
/// not an accessible directory we degrade to the working directory rather
/// than running without a cache at all.
pub struct CacheManager<'a> {
    fs: &'a Fs,
    configured: Option<PathBuf>,
    /// resolve() is called for every command line; warn about the
    /// degraded location only the first time
    warned: Once,
}

impl<'a> CacheManager<'a> {
    pub fn new(fs: &'a Fs, configured: Option<&Path>) -> Self {
        Self {
            fs,
            configured: configured.map(Path::to_path_buf),
            warned: Once::new(),
        }
    }

    /// The directory holding cache entries: the configured root if it is
    /// a valid directory, else the working directory.
    pub fn resolve(&self) -> PathBuf {
        match &self.configured {
            Some(dir) if self.fs.is_dir(dir) => dir.clone(),
            Some(dir) => {
                self.warned.call_once(|| {
                    log::warn!(
                        "cache dir {dir:?} is not accessible here, falling back to working directory"
                    );
                });
                self.fs.root().to_path_buf()
            }
            None => self.fs.root().to_path_buf(),
        }
    }

    /// Path of one item inside a dataset-wide cache entry,
    /// e.g. `<cache>/<mslist>.ddfcache/PSF`.
    pub fn entry_item(&self, list_name: &str, item: &str) -> PathBuf {
        self.resolve()
            .join(format!("{list_name}{CACHE_SUFFIX}"))
            .join(item)
    }

    pub fn has_entry_item(&self, list_name: &str, item: &str) -> bool {
        self.fs.exists(self.entry_item(list_name, item))
    }

    /// Delete every cache entry derived from `dataset`: the entries named
    /// after the list file (in the cache dir and in the working dir) and
    /// the per-input entries. Entries that are already absent are skipped
    /// silently; deletion is idempotent.
    pub fn clear(&self, dataset: &DatasetRef) -> Result<()> {
        let cache_dir = self.resolve();
        log::info!("clearing cache for {}", dataset.file_name());

        let list_glob = format!("{}*{}", dataset.file_name(), CACHE_SUFFIX);
        self.fs.remove_matching(&cache_dir, &list_glob)?;
        self.fs.remove_matching(self.fs.root(), &list_glob)?;

        for name in dataset.names() {
            let name_glob = format!("{name}*{CACHE_SUFFIX}");
            self.fs.remove_matching(&cache_dir, &name_glob)?;
        }
        Ok(())
    }

    /// Clear the caches of every given dataset.
    pub fn clear_all(&self, datasets: &[&DatasetRef]) -> Result<()> {
        for dataset in datasets {
            self.clear(dataset)?;
        }
        Ok(())
    }
}
