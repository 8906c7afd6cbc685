use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

/// Move `src` into `dest_dir`, replacing any stale entry of the same name.
/// `std::fs::rename` refuses to overwrite a non-empty directory, so the
/// old archive entry is removed first.
pub fn move_into(src: &Path, dest_dir: &Path) -> Result<()> {
    let name = src
        .file_name()
        .with_context(|| format!("archiving path with no file name: {src:?}"))?;
    let target = dest_dir.join(name);
    if target.exists() {
        remove_entry(&target)?;
    }
    fs::rename(src, &target).with_context(|| format!("moving {src:?} to {target:?}"))?;
    Ok(())
}

/// Delete a file or directory tree. An entry that is already gone is not
/// an error; deletion is idempotent.
pub fn remove_entry(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("{path:?} already absent; nothing to delete");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("deleting {path:?}")),
    }
}
