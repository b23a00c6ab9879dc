//! On-disk placement of generated QR code images.
//!
//! Every image lands under `<static_root>/<subdir>/<nanos>.png`, where `nanos` is
//! the creation time in nanoseconds since the Unix epoch. The directory is
//! served verbatim at `/static/<subdir>/`, so the file name doubles as the
//! public URL.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use image::ImageFormat;

use crate::clock::{Clock, SystemClock};
use crate::encoder::Bitmap;
use crate::error::{Error, Result};

/// Extension of every stored artifact.
pub const ARTIFACT_EXT: &str = "png";

/// URL prefix the static root is mounted under.
pub const STATIC_URL_PREFIX: &str = "/static";

// Retries after hitting a file that already carries the drawn name.
const MAX_NAME_ATTEMPTS: usize = 16;

/// A generated image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// `<nanos>.png`; the artifact's identity.
    pub file_name: String,
    /// Full filesystem path of the image.
    pub path: PathBuf,
    /// Public URL path, `/static/<subdir>/<file_name>`.
    pub url: String,
    pub created_at: SystemTime,
}

impl Artifact {
    /// Recovers the creation time embedded in an artifact file name.
    ///
    /// Returns `None` for names this store would never produce.
    pub fn created_at_from_name(file_name: &str) -> Option<SystemTime> {
        let stem = file_name.strip_suffix(ARTIFACT_EXT)?.strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let nanos: u64 = stem.parse().ok()?;
        UNIX_EPOCH.checked_add(Duration::from_nanos(nanos))
    }
}

/// Writes bitmaps as PNG files into the public artifact directory.
///
/// The directory is provisioned by whoever deploys the service; the store
/// never creates it.
pub struct ArtifactStore {
    dir: PathBuf,
    url_prefix: String,
    clock: Arc<dyn Clock>,
    last_stamp: AtomicU64,
}

impl ArtifactStore {
    pub fn new(static_root: impl AsRef<Path>, subdir: &str) -> Self {
        let subdir = subdir.trim_matches('/');
        Self {
            dir: static_root.as_ref().join(subdir),
            url_prefix: format!("{STATIC_URL_PREFIX}/{subdir}"),
            clock: Arc::new(SystemClock),
            last_stamp: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The directory artifacts are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.url_prefix, file_name)
    }

    /// Writes `bitmap` to a freshly named file and returns the new artifact.
    ///
    /// Safe to call from many threads at once: stamps are strictly increasing
    /// within a store and files are opened with create-new semantics, so two
    /// calls never share a name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreWriteFailed`] if the directory is missing or the
    /// file cannot be written. A partially written file is removed before the
    /// error is returned.
    pub fn store(&self, bitmap: &Bitmap) -> Result<Artifact> {
        let mut attempts = 0;
        let (stamp, path, file) = loop {
            let stamp = self.next_stamp();
            let path = self.dir.join(file_name_for(stamp));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => break (stamp, path, file),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    attempts += 1;
                    if attempts >= MAX_NAME_ATTEMPTS {
                        return Err(Error::StoreWriteFailed { path, source: err });
                    }
                    tracing::debug!(path = %path.display(), "artifact name taken, drawing another");
                }
                Err(err) => return Err(Error::StoreWriteFailed { path, source: err }),
            }
        };

        if let Err(source) = write_png(file, bitmap) {
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove partial artifact");
            }
            return Err(Error::StoreWriteFailed { path, source });
        }

        let file_name = file_name_for(stamp);
        tracing::debug!(file = %file_name, "stored artifact");
        Ok(Artifact {
            url: self.url_for(&file_name),
            file_name,
            path,
            created_at: UNIX_EPOCH + Duration::from_nanos(stamp),
        })
    }

    // Nanoseconds since the epoch, bumped past the previous stamp when the
    // clock repeats itself or steps backwards.
    fn next_stamp(&self) -> u64 {
        let now = self
            .clock
            .now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        let mut last = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last.saturating_add(1));
            match self.last_stamp.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}

fn file_name_for(stamp: u64) -> String {
    format!("{stamp}.{ARTIFACT_EXT}")
}

// The handle is dropped, and the file closed, on every path out of here.
fn write_png(file: File, bitmap: &Bitmap) -> io::Result<()> {
    let mut writer = BufWriter::new(file);
    bitmap
        .write_to(&mut writer, ImageFormat::Png)
        .map_err(|err| match err {
            image::ImageError::IoError(io) => io,
            other => io::Error::other(other),
        })?;
    writer.flush()
}
