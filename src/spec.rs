use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

/// A package's declarative spec as published by a source.
///
/// Immutable per published version. URL and binary member names may carry
/// `{{.Version}}`, `{{.OS}}` and `{{.Arch}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSpec {
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub repo_url: String,
    pub license: String,
    pub tags: Vec<String>,
    /// Published version, in semantic-version form.
    pub version: String,
    /// Download assets keyed by `<os>_<arch>`.
    pub assets: BTreeMap<String, Asset>,
    /// Binary member names, may be templated by OS and architecture.
    pub bin: Vec<String>,
    /// Completion member names per shell.
    pub completion: BTreeMap<String, Vec<String>>,
    pub man: Vec<String>,
}

/// Download location for one platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Asset {
    pub url: String,
    /// Checksum file URL; empty means "no checksum published".
    pub sha_url: String,
}

/// Spec files are published either wrapped under a `spec:` key or flat.
#[derive(Deserialize)]
#[serde(untagged)]
enum SpecDocument {
    Wrapped { spec: PackageSpec },
    Flat(PackageSpec),
}

#[derive(Serialize)]
struct WrappedRef<'a> {
    spec: &'a PackageSpec,
}

impl PackageSpec {
    /// Parses a YAML spec document in either the wrapped or the flat layout.
    pub fn from_yaml(document: &str) -> Result<Self, serde_yaml::Error> {
        let document: SpecDocument = serde_yaml::from_str(document)?;
        Ok(match document {
            SpecDocument::Wrapped { spec } => spec,
            SpecDocument::Flat(spec) => spec,
        })
    }

    /// Serializes in the wrapped (`spec:`) layout.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&WrappedRef { spec: self })
    }

    /// Completion member names for `shell`, empty if none are declared.
    pub fn completion_for(&self, shell: &str) -> &[String] {
        self.completion
            .get(shell)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
