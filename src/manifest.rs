use std::fs;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::KindlyError;
use crate::util::is_valid_package_name;

/// File extension of manifest records.
pub const MANIFEST_EXTENSION: &str = "toml";

/// The local record of what was installed for one package.
///
/// Only files that were actually copied are listed, so removal never
/// touches anything kindly did not create.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    /// Where the spec came from, as written by [`crate::SpecLocation::to_record`].
    pub source: String,
    pub version: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub bin: Vec<String>,
    #[serde(default)]
    pub completion: Vec<String>,
    #[serde(default)]
    pub man: Vec<String>,
}

impl PackageManifest {
    /// `name@version`, as shown by `list --installed`.
    pub fn display_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// One manifest file per package in a single directory.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The manifest file of `name`; names that are not a plain file name
    /// are refused so every manifest stays inside the store directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, KindlyError> {
        if !is_valid_package_name(name) {
            return Err(KindlyError::InvalidRequest(format!("invalid package name {name:?}")));
        }
        Ok(self.dir.join(format!("{name}.{MANIFEST_EXTENSION}")))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    pub fn write(&self, manifest: &PackageManifest) -> Result<(), KindlyError> {
        let path = self.path_for(&manifest.name)?;
        fs::create_dir_all(&self.dir)
            .map_err(|e| KindlyError::file_op("create directory", &self.dir, e))?;
        let content = toml::to_string_pretty(manifest).map_err(|e| {
            KindlyError::file_op("serialize", &path, std::io::Error::other(e))
        })?;
        fs::write(&path, content).map_err(|e| KindlyError::file_op("write", &path, e))
    }

    pub fn read(&self, name: &str) -> Result<PackageManifest, KindlyError> {
        let path = self.path_for(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(KindlyError::ManifestNotFound(name.to_string()));
            }
            Err(e) => return Err(KindlyError::file_op("read", &path, e)),
        };
        toml::from_str(&content).map_err(|e| {
            KindlyError::file_op(
                "parse",
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    pub fn delete(&self, name: &str) -> Result<(), KindlyError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(KindlyError::ManifestNotFound(name.to_string()))
            }
            Err(e) => Err(KindlyError::file_op("delete", &path, e)),
        }
    }

    /// Package names with a manifest, i.e. every manifest file's base name
    /// without its extension, sorted.
    pub fn names(&self) -> Result<Vec<String>, KindlyError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(KindlyError::file_op("read directory", &self.dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KindlyError::file_op("read directory", &self.dir, e))?;
            let path = entry.path();
            if !path.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXTENSION)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Every recorded manifest, sorted by package name.
    pub fn list_all(&self) -> Result<Vec<PackageManifest>, KindlyError> {
        self.names()?
            .iter()
            .map(|name| self.read(name))
            .collect()
    }
}
