use crate::error::{PackerError, PackerResult};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Deletes `path` if it exists, so a stale result never outlives a failed run.
pub fn remove_existing(path: &Path) -> PackerResult<()> {
    if !path.exists() {
        return Ok(());
    }
    fs::remove_file(path).map_err(|source| PackerError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Existing output file deleted: {}", path.display());
    Ok(())
}

/// Writes the whole text in one call, creating parent directories first.
pub fn write_all(path: &Path, text: &str) -> PackerResult<()> {
    let to_error = |source| PackerError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(to_error)?;
        }
    }
    fs::write(path, text).map_err(to_error)?;
    debug!("Output written to {} ({} bytes)", path.display(), text.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_parents_and_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/result.txt");

        write_all(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");

        remove_existing(&path).unwrap();
        assert!(!path.exists());
        remove_existing(&path).unwrap();
    }

    #[test]
    fn removing_a_directory_is_a_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = remove_existing(dir.path()).unwrap_err();
        assert!(matches!(err, PackerError::OutputWriteFailed { .. }));
    }
}
