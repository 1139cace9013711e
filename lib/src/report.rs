use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::NamedTempFile;

use crate::error::IoError;
use crate::render::RenderedReport;

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Writes `report` to `path`, creating its directory if needed. The report
/// is written to a temporary file beside `path` and renamed over it, so
/// readers see either the previous report or the complete new one.
pub async fn persist(report: &RenderedReport, path: &Path) -> Result<(), IoError> {
    let dir = parent_dir(path);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| IoError::new("create directory", &dir, source))?;

    let contents = report.as_str().as_bytes().to_vec();
    let destination = path.to_path_buf();
    let written = tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut file = NamedTempFile::new_in(&dir)?;
        file.write_all(&contents)?;
        file.flush()?;
        file.as_file().sync_all()?;
        file.persist(&destination).map_err(|err| err.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)
    .and_then(|result| result);
    written.map_err(|source| IoError::new("write report", path, source))?;
    debug!("wrote {} bytes to {}", report.len(), path.display());
    Ok(())
}
