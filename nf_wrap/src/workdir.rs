//! Staging the runner's working directory from the template root.

use crate::RunError;
use log::{debug, info};
use std::fs;
use std::io;
use std::path::Path;

/// Copy `template_root` into `dest`, skipping top-level entries whose name
/// is exactly one of `ignore`.
///
/// Only the top level is filtered: a nested directory named `work` is copied
/// like any other. Existing contents of `dest` are merged into, symlinks are
/// followed, and dangling symlinks are skipped.
pub fn stage_working_dir(template_root: &Path, dest: &Path, ignore: &[String]) -> Result<(), RunError> {
    info!(
        "staging {} from {}",
        dest.display(),
        template_root.display()
    );
    let staging_error = |source: io::Error| RunError::Staging {
        path: dest.to_path_buf(),
        source,
    };

    fs::create_dir_all(dest).map_err(staging_error)?;
    // The destination may live inside the template root.
    let dest = dest.canonicalize().map_err(staging_error)?;

    for entry in fs::read_dir(template_root).map_err(staging_error)? {
        let entry = entry.map_err(staging_error)?;
        let name = entry.file_name();
        if ignore.iter().any(|i| name == i.as_str()) {
            debug!("not staging {}", entry.path().display());
            continue;
        }
        copy_entry(&entry.path(), &dest.join(&name), &dest).map_err(staging_error)?;
    }
    Ok(())
}

fn copy_entry(src: &Path, dst: &Path, root: &Path) -> io::Result<()> {
    let meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound && src.is_symlink() => {
            debug!("skipping dangling symlink {}", src.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if meta.is_dir() {
        if src.canonicalize()? == root {
            return Ok(());
        }
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_entry(&entry.path(), &dst.join(entry.file_name()), root)?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}
