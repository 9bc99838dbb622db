//! Filesystem helpers: atomic writes, cross-device moves, archive extraction
//! and executable bits.

use crate::error::{Error, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Atomic file write using write-then-rename.
///
/// The temp file lives next to `path` so the rename never crosses devices;
/// a crash mid-write leaves the previous contents intact.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Config(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut file = fs::File::create(&temp_path)?;
    if let Err(e) = file.write_all(contents).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::Io(e)
    })
}

/// Whether an io error is the cross-device rename failure (`EXDEV`).
pub fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

/// Move a file or directory, falling back to copy-then-remove when the
/// rename crosses filesystems.
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    move_path_with(src, dst, |from, to| fs::rename(from, to))
}

/// [`move_path`] with an injectable rename step.
pub fn move_path_with<F>(src: &Path, dst: &Path, rename: F) -> Result<()>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                "Rename {} -> {} crosses devices, copying instead",
                src.display(),
                dst.display()
            );
            let metadata = fs::symlink_metadata(src)?;
            let copied = if metadata.is_dir() {
                copy_dir_recursive(src, dst)
            } else {
                fs::copy(src, dst).map(|_| ()).map_err(Error::from)
            };
            if let Err(e) = copied {
                // Never leave a half-copied destination behind.
                let _ = remove_path(dst);
                return Err(e);
            }
            remove_path(src)
        }
        Err(e) => Err(e.into()),
    }
}

/// Remove a file or directory tree; a missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Recursively copy `src` into `dst`, preserving permissions and symlinks.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            fs::copy(entry.path(), &target).map(|_| ())?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Mark a single file executable (no-op on Windows).
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Mark every regular file directly under `dir` executable.
pub fn make_dir_executable(dir: &Path) -> Result<usize> {
    let mut count = 0;
    if !dir.is_dir() {
        return Ok(0);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            set_executable(&entry.path())?;
            count += 1;
        }
    }
    Ok(count)
}

/// Supported archive containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    /// Infer from a URL or file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::Zip => "zip",
        }
    }
}

/// Outcome of an extraction that may have skipped benign entries.
#[derive(Debug, Default, Clone)]
pub struct ExtractReport {
    pub files: usize,
    pub skipped: Vec<String>,
}

/// Entries some archivers add that never matter to the launcher.
fn is_platform_metadata(path: &str) -> bool {
    path.starts_with("__MACOSX/")
        || path.contains("/__MACOSX/")
        || path.rsplit('/').next().is_some_and(|name| {
            name.starts_with("._") || name == ".DS_Store"
        })
}

/// Reject absolute paths and parent traversal inside archives.
fn safe_relative(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(Error::Extraction(format!(
                    "Unsafe path in archive: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(clean)
}

/// Extract `archive` into `dest`.
///
/// Failures on platform metadata entries are logged and skipped; any other
/// entry failure aborts. At least one real file must result.
pub fn extract_archive(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<ExtractReport> {
    fs::create_dir_all(dest)?;
    let report = match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive, dest)?,
        ArchiveKind::Zip => extract_zip(archive, dest)?,
    };
    if report.files == 0 {
        return Err(Error::Extraction(format!(
            "{} contained no files",
            archive.display()
        )));
    }
    if !report.skipped.is_empty() {
        tracing::warn!(
            "Skipped {} metadata entr{} while extracting {}",
            report.skipped.len(),
            if report.skipped.len() == 1 { "y" } else { "ies" },
            archive.display()
        );
    }
    Ok(report)
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<ExtractReport> {
    let file = fs::File::open(archive)?;
    let decoder = flate2::read::GzDecoder::new(io::BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);
    tar.set_preserve_permissions(true);

    let mut report = ExtractReport::default();
    let entries = tar
        .entries()
        .map_err(|e| Error::Extraction(format!("Cannot read {}: {}", archive.display(), e)))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::Extraction(format!("Corrupt tar entry: {}", e)))?;
        let raw_path = entry
            .path()
            .map_err(|e| Error::Extraction(format!("Bad entry path: {}", e)))?
            .into_owned();
        let display = raw_path.to_string_lossy().into_owned();
        if is_platform_metadata(&display) {
            report.skipped.push(display);
            continue;
        }
        let relative = safe_relative(&raw_path)?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let is_file = entry.header().entry_type().is_file();
        entry
            .unpack(&target)
            .map_err(|e| Error::Extraction(format!("Failed to unpack {}: {}", display, e)))?;
        if is_file {
            report.files += 1;
        }
    }
    Ok(report)
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<ExtractReport> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(io::BufReader::new(file))
        .map_err(|e| Error::Extraction(format!("Cannot read {}: {}", archive.display(), e)))?;

    let mut report = ExtractReport::default();
    for index in 0..zip.len() {
        let mut entry = match zip.by_index(index) {
            Ok(entry) => entry,
            Err(e) => return Err(Error::Extraction(format!("Corrupt zip entry: {}", e))),
        };
        let name = entry.name().to_string();
        if is_platform_metadata(&name) {
            report.skipped.push(name);
            continue;
        }
        let relative = match entry.enclosed_name() {
            Some(path) => safe_relative(&path)?,
            None => {
                return Err(Error::Extraction(format!(
                    "Unsafe path in archive: {}",
                    name
                )))
            }
        };
        let target = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| Error::Extraction(format!("Failed to unpack {}: {}", name, e)))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }
        report.files += 1;
    }
    Ok(report)
}

/// Exclusive advisory lock held on a lock file until dropped.
///
/// Serializes read-modify-write cycles on shared state files across
/// processes. The file records the holder's PID for diagnostics.
#[derive(Debug)]
pub struct FileLock {
    file: fs::File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is acquired.
    pub fn acquire(path: &Path) -> Result<Self> {
        use fs2::FileExt;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.lock_exclusive()?;
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        tracing::trace!("Acquired lock {:?}", path);
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        use fs2::FileExt;
        if let Err(e) = self.file.unlock() {
            tracing::debug!("Failed to unlock {:?}: {}", self.path, e);
        }
    }
}
