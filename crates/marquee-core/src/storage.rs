use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::models::FetchedImage;
use crate::util::venue_dir_name;

/// Number of hash characters used in stored file names.
const FILE_STEM_LEN: usize = 16;

/// Content-addressed image files under one root directory.
///
/// Layout: `<root>/<venue dir>/<hash prefix>.<ext>`. Identical bytes map to
/// the same file, which is written once and never rewritten.
#[derive(Debug, Clone)]
pub struct ImageFiles {
    root: PathBuf,
}

impl ImageFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `image` lives (or will live) for the given venue.
    pub fn path_for(&self, venue_name: &str, image: &FetchedImage) -> PathBuf {
        let stem = &image.hash[..FILE_STEM_LEN.min(image.hash.len())];
        self.root
            .join(venue_dir_name(venue_name))
            .join(format!("{stem}.{}", image.kind.extension()))
    }

    /// Write `image` to disk unless it is already there; returns its path.
    ///
    /// Bytes go to a temp file first and are renamed into place, so a
    /// reader never sees a truncated image.
    pub async fn save(&self, venue_name: &str, image: &FetchedImage) -> Result<PathBuf, AppError> {
        let path = self.path_for(venue_name, image);
        if tokio::fs::try_exists(&path).await.map_err(io_err(&path))? {
            tracing::debug!(path = %path.display(), "Image file already stored");
            return Ok(path);
        }

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        }

        let tmp = path.with_extension(format!("{}.part", image.kind.extension()));
        tokio::fs::write(&tmp, &image.bytes)
            .await
            .map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err(&path))?;

        Ok(path)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AppError + '_ {
    move |e| AppError::StorageError(format!("{}: {e}", path.display()))
}
