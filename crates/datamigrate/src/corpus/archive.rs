//! Directory and `.zip` corpus locations.
//!
//! Commands always work on a directory. A `.zip` input is extracted into a
//! temp directory first; a `.zip` output is staged in a temp directory and
//! packed with DEFLATE when the command finishes. Temp directories are
//! removed when the corpus value is dropped, on success or failure.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::lock::{OutputLock, LOCK_FILE_NAME};
use crate::error::{MigrateError, Result};

const TEMP_PREFIX: &str = "datamigrate-";

/// Whether a path names a zip archive.
pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn temp_dir() -> Result<TempDir> {
    Ok(tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir()?)
}

/// Pack every file under `src` into `zip_path`, entries relative to `src`.
pub fn pack_dir(src: &Path, zip_path: &Path) -> Result<usize> {
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = zip_path.with_extension("zip.tmp");
    let mut writer = ZipWriter::new(File::create(&temp_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.file_name() == LOCK_FILE_NAME {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(name, options)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut writer)?;
        entries += 1;
    }
    writer.finish()?;
    fs::rename(&temp_path, zip_path)?;
    debug!("Packed {} entries into {}", entries, zip_path.display());
    Ok(entries)
}

/// Extract `zip_path` into `dest`, refusing entries that escape it.
pub fn unpack(zip_path: &Path, dest: &Path) -> Result<usize> {
    let mut archive = ZipArchive::new(File::open(zip_path)?)?;
    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                MigrateError::payload(
                    zip_path,
                    format!("unsafe archive entry {}", entry.name()),
                )
            })?;
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        files += 1;
    }
    debug!("Extracted {} files from {}", files, zip_path.display());
    Ok(files)
}

/// A corpus opened for reading.
#[derive(Debug)]
pub struct InputCorpus {
    root: PathBuf,
    _extracted: Option<TempDir>,
}

impl InputCorpus {
    pub fn open(path: &Path) -> Result<Self> {
        if is_zip(path) {
            if !path.is_file() {
                return Err(MigrateError::Config(format!(
                    "input archive {} does not exist",
                    path.display()
                )));
            }
            let temp = temp_dir()?;
            unpack(path, temp.path())?;
            info!("Extracted {} to {}", path.display(), temp.path().display());
            return Ok(Self {
                root: temp.path().to_path_buf(),
                _extracted: Some(temp),
            });
        }
        if !path.is_dir() {
            return Err(MigrateError::Config(format!(
                "input directory {} does not exist",
                path.display()
            )));
        }
        Ok(Self {
            root: path.to_path_buf(),
            _extracted: None,
        })
    }

    /// Directory holding the corpus files.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// A corpus opened for writing, holding the single-writer lock.
#[derive(Debug)]
pub struct OutputCorpus {
    target: PathBuf,
    root: PathBuf,
    staging: Option<TempDir>,
    _lock: OutputLock,
}

impl OutputCorpus {
    pub fn open(path: &Path) -> Result<Self> {
        if is_zip(path) {
            let parent = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            fs::create_dir_all(parent)?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let lock = OutputLock::acquire(parent.join(format!(".{}{}", file_name, LOCK_FILE_NAME)))?;
            let staging = temp_dir()?;
            return Ok(Self {
                target: path.to_path_buf(),
                root: staging.path().to_path_buf(),
                staging: Some(staging),
                _lock: lock,
            });
        }
        fs::create_dir_all(path)?;
        let lock = OutputLock::for_dir(path)?;
        Ok(Self {
            target: path.to_path_buf(),
            root: path.to_path_buf(),
            staging: None,
            _lock: lock,
        })
    }

    /// Directory to write corpus files into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the corpus ends up.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Pack a zip output; directory outputs are already in place.
    pub fn finish(self) -> Result<PathBuf> {
        if let Some(staging) = &self.staging {
            let entries = pack_dir(staging.path(), &self.target)?;
            info!("Wrote {} ({} files)", self.target.display(), entries);
        }
        Ok(self.target.clone())
    }
}
