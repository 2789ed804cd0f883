use std::fmt;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use tracing::debug;
use url::Url;
use crate::config::{Config, Platform, Source};
use crate::context::Context;
use crate::error::KindlyError;
use crate::fetch::{fetch_text, Transport};
use crate::spec::PackageSpec;
use crate::template::{expand_optional_url, expand_url, TemplateContext};
use crate::util::{
    canonical_version, compare_versions, is_valid_package_name, is_valid_version, split_name_version,
};

/// Extension of published spec documents.
pub const SPEC_EXTENSION: &str = "yaml";

const FILE_RECORD_PREFIX: &str = "file:";

/// Where a package's spec document is read from.
///
/// Exactly one location is active per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecLocation {
    /// A configured source by name; `None` is the default source.
    Source(Option<String>),
    /// A spec document on the local filesystem.
    File(PathBuf),
    /// A spec document at an explicit URL.
    Url(String),
}

impl Default for SpecLocation {
    fn default() -> Self {
        SpecLocation::Source(None)
    }
}

impl SpecLocation {
    /// Builds a location from mutually exclusive CLI options.
    pub fn from_options(
        source: Option<String>,
        file: Option<PathBuf>,
        url: Option<String>,
    ) -> Result<Self, KindlyError> {
        match (source, file, url) {
            (source, None, None) => Ok(SpecLocation::Source(source)),
            (None, Some(file), None) => Ok(SpecLocation::File(file)),
            (None, None, Some(url)) => Ok(SpecLocation::Url(url)),
            _ => Err(KindlyError::InvalidRequest(
                "only one of a named source, a local file or an explicit URL may be given".to_string(),
            )),
        }
    }

    /// The string stored in a manifest's `source` field.
    pub fn to_record(&self, config: &Config) -> String {
        match self {
            SpecLocation::Source(Some(name)) => name.clone(),
            SpecLocation::Source(None) => config.default_source.clone(),
            SpecLocation::File(path) => format!("{FILE_RECORD_PREFIX}{}", path.display()),
            SpecLocation::Url(url) => url.clone(),
        }
    }

    /// Parses a manifest's `source` field back into a location.
    pub fn from_record(record: &str) -> Self {
        if let Some(path) = record.strip_prefix(FILE_RECORD_PREFIX) {
            SpecLocation::File(PathBuf::from(path))
        } else if record.starts_with("http://") || record.starts_with("https://") {
            SpecLocation::Url(record.to_string())
        } else if record.is_empty() {
            SpecLocation::Source(None)
        } else {
            SpecLocation::Source(Some(record.to_string()))
        }
    }
}

/// A request to install (or check) one package.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallRequest {
    /// Package name for named sources; the path or URL otherwise.
    pub name: String,
    pub version: Option<String>,
    pub location: SpecLocation,
}

impl InstallRequest {
    /// Builds a request from a CLI argument.
    ///
    /// For named sources the argument is `name[@version]`; for file and URL
    /// locations the argument is the path or URL itself.
    pub fn parse(arg: &str, location: SpecLocation) -> Self {
        match location {
            SpecLocation::Source(_) => {
                let (name, version) = split_name_version(arg);
                Self { name, version, location }
            }
            SpecLocation::File(_) => Self {
                name: arg.to_string(),
                version: None,
                location: SpecLocation::File(PathBuf::from(arg)),
            },
            SpecLocation::Url(_) => Self {
                name: arg.to_string(),
                version: None,
                location: SpecLocation::Url(arg.to_string()),
            },
        }
    }

    pub fn named(name: &str) -> Self {
        Self::parse(name, SpecLocation::default())
    }
}

/// Everything needed to fetch one package, derived from its spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub name: String,
    pub version: String,
    pub url: Url,
    pub checksum_url: Option<Url>,
    pub os_arch: String,
}

impl fmt::Display for DownloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.name, self.version, self.os_arch)
    }
}

/// URL of `name`'s spec document in a remote source.
pub fn spec_url(source: &Source, name: &str) -> Option<String> {
    match source {
        Source::Github { owner, repo, path, branch } => {
            let path = path.trim_matches('/');
            let dir = if path.is_empty() { String::new() } else { format!("{path}/") };
            Some(format!(
                "https://raw.githubusercontent.com/{owner}/{repo}/{branch}/{dir}{name}.{SPEC_EXTENSION}"
            ))
        }
        Source::Url { base } => Some(format!(
            "{}/{name}.{SPEC_EXTENSION}",
            base.trim_end_matches('/')
        )),
        Source::Local { .. } => None,
    }
}

fn unavailable(name: &str, reason: impl ToString) -> KindlyError {
    KindlyError::SpecUnavailable { name: name.to_string(), reason: reason.to_string() }
}

fn read_spec_file(name: &str, path: &Path) -> Result<PackageSpec, KindlyError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| unavailable(name, format!("{}: {e}", path.display())))?;
    PackageSpec::from_yaml(&content).map_err(|e| unavailable(name, e))
}

fn fetch_spec_url(
    transport: &dyn Transport,
    ctx: &Context,
    name: &str,
    url: &str,
) -> Result<PackageSpec, KindlyError> {
    debug!(url, "Fetching package spec");
    let content = fetch_text(transport, ctx, url).map_err(|e| match e {
        e if e.is_interrupted() => e,
        other => unavailable(name, other),
    })?;
    PackageSpec::from_yaml(&content).map_err(|e| unavailable(name, e))
}

/// Retrieves and parses the spec document for a request.
pub fn fetch_spec(
    config: &Config,
    transport: &dyn Transport,
    ctx: &Context,
    name: &str,
    location: &SpecLocation,
) -> Result<PackageSpec, KindlyError> {
    match location {
        SpecLocation::File(path) => read_spec_file(name, path),
        SpecLocation::Url(url) => fetch_spec_url(transport, ctx, name, url),
        SpecLocation::Source(source_name) => {
            let (_, source) = config.source(source_name.as_deref()).ok_or_else(|| {
                unavailable(
                    name,
                    format!(
                        "unknown source {}",
                        source_name.as_deref().unwrap_or(&config.default_source)
                    ),
                )
            })?;
            match source {
                Source::Local { path } => {
                    read_spec_file(name, &path.join(format!("{name}.{SPEC_EXTENSION}")))
                }
                remote => {
                    let url = spec_url(remote, name)
                        .ok_or_else(|| unavailable(name, "source has no spec URL"))?;
                    fetch_spec_url(transport, ctx, name, &url)
                }
            }
        }
    }
}

/// Validates a spec against a request and derives its download descriptor.
///
/// Pure: no I/O happens here.
pub fn validate(
    request_name: &str,
    requested_version: Option<&str>,
    spec: &PackageSpec,
    platform: &Platform,
) -> Result<DownloadDescriptor, KindlyError> {
    if spec.name.trim().is_empty() {
        return Err(KindlyError::PackageUnavailable(request_name.to_string()));
    }
    if !is_valid_package_name(&spec.name) {
        return Err(KindlyError::InvalidRequest(format!(
            "spec for {request_name} has an invalid package name {:?}",
            spec.name
        )));
    }
    let published = spec.version.trim();
    if !published.is_empty() && !is_valid_version(published) {
        return Err(KindlyError::InvalidVersion(format!("{}@{published}", spec.name)));
    }

    let version = match requested_version {
        Some(requested) => {
            let canonical = canonical_version(requested, published)
                .map_err(|_| KindlyError::InvalidVersion(format!("{request_name}@{requested}")))?;
            let newer = published.is_empty()
                || compare_versions(&canonical, published) == Some(std::cmp::Ordering::Greater);
            if newer {
                return Err(KindlyError::VersionNotFound {
                    name: spec.name.clone(),
                    requested: canonical,
                    published: published.to_string(),
                });
            }
            canonical
        }
        None => published.to_string(),
    };

    let os_arch = platform.key();
    let asset = spec.assets.get(&os_arch).ok_or_else(|| KindlyError::PlatformUnsupported {
        name: spec.name.clone(),
        os_arch: os_arch.clone(),
    })?;

    let ctx = TemplateContext::new(&version, platform);
    let url = expand_url(&asset.url, &ctx)?;
    let checksum_url = expand_optional_url(&asset.sha_url, &ctx)?;

    Ok(DownloadDescriptor {
        name: spec.name.clone(),
        version,
        url,
        checksum_url,
        os_arch,
    })
}

/// Resolves a request into a validated descriptor and its spec.
///
/// A malformed requested version is rejected before anything is fetched.
pub fn resolve(
    config: &Config,
    transport: &dyn Transport,
    ctx: &Context,
    request: &InstallRequest,
) -> Result<(DownloadDescriptor, PackageSpec), KindlyError> {
    if let Some(version) = &request.version {
        if !is_valid_version(version) {
            return Err(KindlyError::InvalidVersion(format!("{}@{version}", request.name)));
        }
    }
    let spec = fetch_spec(config, transport, ctx, &request.name, &request.location)?;
    let descriptor = validate(
        &request.name,
        request.version.as_deref(),
        &spec,
        &config.platform,
    )?;
    debug!(%descriptor, url = %descriptor.url, "Resolved package");
    Ok((descriptor, spec))
}

#[derive(Debug, Deserialize)]
struct GithubContent {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

fn is_spec_file(name: &str) -> bool {
    name.ends_with(".yaml") || name.ends_with(".yml")
}

fn spec_stem(name: &str) -> &str {
    name.trim_end_matches(".yaml").trim_end_matches(".yml")
}

/// Names of the packages a source publishes, sorted.
pub fn list_source(
    transport: &dyn Transport,
    ctx: &Context,
    source_name: &str,
    source: &Source,
) -> Result<Vec<String>, KindlyError> {
    let mut names = match source {
        Source::Github { owner, repo, path, branch } => {
            let url = format!(
                "https://api.github.com/repos/{owner}/{repo}/contents/{}?ref={branch}",
                path.trim_matches('/')
            );
            let body = fetch_text(transport, ctx, &url)?;
            let entries: Vec<GithubContent> = serde_json::from_str(&body)
                .map_err(|e| unavailable(source_name, e))?;
            entries
                .into_iter()
                .filter(|entry| entry.kind == "file" && is_spec_file(&entry.name))
                .map(|entry| spec_stem(&entry.name).to_string())
                .collect::<Vec<_>>()
        }
        Source::Local { path } => {
            let entries = std::fs::read_dir(path)
                .map_err(|e| KindlyError::file_op("read directory", path, e))?;
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| KindlyError::file_op("read directory", path, e))?;
                let file_name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_file() && is_spec_file(&file_name) {
                    names.push(spec_stem(&file_name).to_string());
                }
            }
            names
        }
        Source::Url { base } => {
            return Err(unavailable(
                source_name,
                format!("source {base} has no package index"),
            ));
        }
    };
    names.sort();
    Ok(names)
}
