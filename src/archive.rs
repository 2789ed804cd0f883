//! Archive extraction for downloaded artifacts.
//!
//! The archive format is chosen from the file name suffix. Every entry path
//! is checked against the destination before anything is written for it.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;
use crate::error::KindlyError;

/// How a downloaded artifact is unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
    /// Not an archive; the artifact itself is the payload.
    Opaque,
}

impl ArchiveKind {
    /// Derives the kind from a strict, case-insensitive suffix match.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if name.ends_with(".zip") {
            ArchiveKind::Zip
        } else {
            ArchiveKind::Opaque
        }
    }
}

/// Extracts `archive_path` into `dest_dir` according to its [`ArchiveKind`].
///
/// Returns the kind that was used. Opaque artifacts are left where they are.
pub fn extract(archive_path: &Path, dest_dir: &Path) -> Result<ArchiveKind, KindlyError> {
    let kind = ArchiveKind::from_path(archive_path);
    debug!(archive = %archive_path.display(), ?kind, "Decompressing file");
    match kind {
        ArchiveKind::TarGz => extract_tar_gz(archive_path, dest_dir)?,
        ArchiveKind::Zip => extract_zip(archive_path, dest_dir)?,
        ArchiveKind::Opaque => {}
    }
    Ok(kind)
}

/// Joins an archive entry name onto `dest_dir`, refusing anything that
/// could resolve outside of it (`..` segments, absolute or prefixed paths).
fn safe_join(dest_dir: &Path, entry_name: &Path) -> Result<PathBuf, KindlyError> {
    let mut relative = PathBuf::new();
    for component in entry_name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(KindlyError::PathTraversal(
                    entry_name.display().to_string(),
                ));
            }
        }
    }
    Ok(dest_dir.join(relative))
}

fn create_dir(path: &Path) -> Result<(), KindlyError> {
    std::fs::create_dir_all(path).map_err(|e| KindlyError::file_op("create directory", path, e))
}

fn create_parent(path: &Path) -> Result<(), KindlyError> {
    match path.parent() {
        Some(parent) => create_dir(parent),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), KindlyError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| KindlyError::file_op("set permissions on", path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), KindlyError> {
    Ok(())
}

fn invalid(path: &Path, e: impl ToString) -> KindlyError {
    KindlyError::ArchiveInvalid { path: path.to_path_buf(), reason: e.to_string() }
}

/// Streams a gzip-compressed tarball, recreating directories and regular
/// files with their recorded mode bits. Other entry types are skipped.
pub fn extract_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<(), KindlyError> {
    let file = File::open(archive_path)
        .map_err(|e| KindlyError::file_op("open", archive_path, e))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    create_dir(dest_dir)?;

    let entries = archive.entries().map_err(|e| invalid(archive_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(archive_path, e))?;
        let entry_path = entry.path().map_err(|e| invalid(archive_path, e))?.into_owned();
        let target = safe_join(dest_dir, &entry_path)?;

        match entry.header().entry_type() {
            EntryType::Directory => create_dir(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                let mode = entry.header().mode().map_err(|e| invalid(archive_path, e))?;
                create_parent(&target)?;
                let mut out = File::create(&target)
                    .map_err(|e| KindlyError::file_op("create", &target, e))?;
                io::copy(&mut entry, &mut out)
                    .map_err(|e| KindlyError::file_op("write", &target, e))?;
                drop(out);
                set_mode(&target, mode)?;
            }
            other => {
                debug!(entry = %entry_path.display(), kind = ?other, "Skipping tar entry");
            }
        }
    }
    Ok(())
}

/// Extracts a zip archive.
///
/// All entry names are validated before the first write, so an archive
/// with a single escaping entry writes nothing at all.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<(), KindlyError> {
    let file = File::open(archive_path)
        .map_err(|e| KindlyError::file_op("open", archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| invalid(archive_path, e))?;

    let mut targets = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| invalid(archive_path, e))?;
        let name = entry.name().to_string();
        // enclosed_name rejects names that zip itself considers unsafe
        if entry.enclosed_name().is_none() {
            return Err(KindlyError::PathTraversal(name));
        }
        targets.push(safe_join(dest_dir, Path::new(&name))?);
    }

    create_dir(dest_dir)?;
    for (i, target) in targets.iter().enumerate() {
        let mut entry = archive.by_index(i).map_err(|e| invalid(archive_path, e))?;
        if entry.is_dir() {
            create_dir(target)?;
            continue;
        }
        create_parent(target)?;
        let mut out = File::create(target)
            .map_err(|e| KindlyError::file_op("create", target, e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| KindlyError::file_op("write", target, e))?;
        drop(out);
        if let Some(mode) = entry.unix_mode() {
            set_mode(target, mode)?;
        }
    }
    Ok(())
}
