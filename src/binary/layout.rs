//! Reconcile extracted archive layouts into the canonical `bin/` shape.
//!
//! Release archives come in three shapes:
//!
//! ```text
//! nested:     postgresql/bin/postgres ...
//! versioned:  postgresql-16.6.0/bin/postgres ...
//! flat:       sqlite3  sqldiff  LICENSE
//! ```
//!
//! The first two collapse to their inner directory. Flat archives get a
//! synthesized `bin/` holding the allowlisted executables (and any preserved
//! sub-component directories); everything else stays at the root.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

fn is_ignorable(name: &str) -> bool {
    name == "__MACOSX" || name == ".DS_Store" || name.starts_with("._")
}

/// Directory entries of `dir`, minus platform metadata.
fn meaningful_entries(dir: &Path) -> Result<Vec<fs::DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !is_ignorable(&entry.file_name().to_string_lossy()) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Descend through single-directory wrappers until reaching the real root.
pub fn find_content_root(extracted: &Path) -> Result<PathBuf> {
    let mut root = extracted.to_path_buf();
    loop {
        let entries = meaningful_entries(&root)?;
        match entries.as_slice() {
            [only] if only.file_type()?.is_dir() && only.file_name() != "bin" => {
                root = only.path();
            }
            [] => {
                return Err(Error::Extraction(format!(
                    "{} is empty after extraction",
                    root.display()
                )))
            }
            _ => return Ok(root),
        }
    }
}

/// Strip a Windows `.exe` suffix for allowlist matching.
fn executable_stem(name: &str) -> &str {
    name.strip_suffix(".exe").unwrap_or(name)
}

/// Produce a directory containing `bin/` from an extraction result.
///
/// Returns the path of the normalized tree, which is either the content root
/// itself (already canonical) or `content_root` after flat entries were
/// sorted into a new `bin/`.
pub fn normalize_layout(
    extracted: &Path,
    executables: &[&str],
    preserved_dirs: &[&str],
) -> Result<PathBuf> {
    let root = find_content_root(extracted)?;
    if root.join("bin").is_dir() {
        return Ok(root);
    }

    let bin = root.join("bin");
    fs::create_dir_all(&bin)?;
    let mut moved = 0usize;
    for entry in meaningful_entries(&root)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "bin" {
            continue;
        }
        let file_type = entry.file_type()?;
        let belongs_in_bin = if file_type.is_dir() {
            preserved_dirs.contains(&name.as_str())
        } else {
            executables.contains(&executable_stem(&name))
        };
        if belongs_in_bin {
            fs::rename(entry.path(), bin.join(&name))?;
            moved += 1;
        }
    }

    if moved == 0 {
        return Err(Error::Extraction(format!(
            "no known executables ({}) found in archive",
            executables.join(", ")
        )));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn nested_engine_dir_collapses() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("postgresql/bin/postgres"));
        touch(&dir.path().join("postgresql/share/postgresql.conf.sample"));
        touch(&dir.path().join("__MACOSX/._postgresql"));

        let root = normalize_layout(dir.path(), &["postgres"], &[]).unwrap();
        assert_eq!(root, dir.path().join("postgresql"));
        assert!(root.join("bin/postgres").exists());
    }

    #[test]
    fn versioned_wrapper_collapses_twice() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("pkg/postgresql-16.6.0/bin/psql"));
        let root = normalize_layout(dir.path(), &["psql"], &[]).unwrap();
        assert!(root.ends_with("postgresql-16.6.0"));
    }

    #[test]
    fn flat_archive_gets_bin_dir() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("sqlite3"));
        touch(&dir.path().join("sqldiff.exe"));
        touch(&dir.path().join("LICENSE"));
        touch(&dir.path().join("server/lib.so"));
        touch(&dir.path().join("docs/readme.txt"));

        let root = normalize_layout(dir.path(), &["sqlite3", "sqldiff"], &["server"]).unwrap();
        assert_eq!(root, dir.path());
        assert!(root.join("bin/sqlite3").exists());
        assert!(root.join("bin/sqldiff.exe").exists());
        assert!(root.join("bin/server/lib.so").exists());
        assert!(root.join("LICENSE").exists());
        assert!(root.join("docs/readme.txt").exists());
    }

    #[test]
    fn flat_archive_without_known_executables_fails() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("README"));
        touch(&dir.path().join("NOTICE"));
        assert!(normalize_layout(dir.path(), &["sqlite3"], &[]).is_err());
    }
}
