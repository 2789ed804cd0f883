//! Drafts a package spec from a GitHub repository's latest tagged release.

use serde::Deserialize;
use tracing::debug;
use crate::context::Context;
use crate::error::KindlyError;
use crate::fetch::{fetch_text, Transport};
use crate::spec::{Asset, PackageSpec};

const GITHUB_API: &str = "https://api.github.com";
const CHECKSUM_CONTENT_TYPE: &str = "application/octet-stream";

const OS_TOKENS: &[&str] = &[
    "aix", "android", "darwin", "dragonfly", "freebsd", "hurd", "illumos", "ios", "js", "linux",
    "nacl", "netbsd", "openbsd", "plan9", "solaris", "windows", "zos",
];

const ARCH_TOKENS: &[&str] = &[
    "386", "amd64", "amd64p32", "arm", "armbe", "arm64", "arm64be", "ppc64", "ppc64le", "mips",
    "mipsle", "mips64", "mips64le", "mips64p32", "mips64p32le", "ppc", "riscv", "riscv64", "s390",
    "s390x", "sparc", "sparc64", "wasm", "x86_64",
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RepoInfo {
    pub name: String,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub html_url: String,
    pub topics: Vec<String>,
    pub license: Option<RepoLicense>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RepoLicense {
    pub spdx_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseAsset {
    pub name: String,
    pub content_type: String,
    pub browser_download_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Release {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

fn get_json<T: for<'de> Deserialize<'de>>(
    transport: &dyn Transport,
    ctx: &Context,
    url: &str,
) -> Result<T, KindlyError> {
    debug!(url, "Querying GitHub API");
    let body = fetch_text(transport, ctx, url)?;
    serde_json::from_str(&body).map_err(|e| KindlyError::DownloadFailed {
        url: url.to_string(),
        reason: format!("unexpected response: {e}"),
    })
}

/// Queries the repository, its newest tag and that tag's release, then
/// drafts a spec from them.
pub fn generate_template(
    ctx: &Context,
    transport: &dyn Transport,
    owner: &str,
    repo: &str,
) -> Result<PackageSpec, KindlyError> {
    let base = format!("{GITHUB_API}/repos/{owner}/{repo}");
    let info: RepoInfo = get_json(transport, ctx, &base)?;
    let tags: Vec<Tag> = get_json(transport, ctx, &format!("{base}/tags"))?;
    let latest = tags.into_iter().next().ok_or_else(|| KindlyError::SpecUnavailable {
        name: format!("{owner}/{repo}"),
        reason: "repository has no tags".to_string(),
    })?;
    let release: Release =
        get_json(transport, ctx, &format!("{base}/releases/tags/{}", latest.name))?;
    Ok(draft_spec(&info, &latest.name, &release.assets))
}

/// Builds a spec from repository metadata and release assets.
///
/// An asset is assigned to every `os_arch` whose tokens both occur in its
/// download URL. `x86_64` is recorded as `amd64`. Binary-typed assets are
/// taken to be checksum files.
pub fn draft_spec(info: &RepoInfo, version: &str, assets: &[ReleaseAsset]) -> PackageSpec {
    let mut spec = PackageSpec {
        name: info.name.clone(),
        description: info.description.clone().unwrap_or_default(),
        homepage: info.homepage.clone().unwrap_or_default(),
        repo_url: info.html_url.clone(),
        license: info
            .license
            .as_ref()
            .and_then(|l| l.spdx_id.clone())
            .unwrap_or_default(),
        tags: info.topics.clone(),
        version: version.to_string(),
        ..Default::default()
    };

    for os in OS_TOKENS {
        for arch in ARCH_TOKENS {
            for asset in assets {
                let url = &asset.browser_download_url;
                if !url.contains(os) || !url.contains(arch) {
                    continue;
                }
                let url = if version.is_empty() {
                    url.clone()
                } else {
                    url.replace(version, "{{.Version}}")
                };
                let arch = if *arch == "x86_64" { "amd64" } else { arch };
                let entry: &mut Asset = spec.assets.entry(format!("{os}_{arch}")).or_default();
                if asset.content_type == CHECKSUM_CONTENT_TYPE {
                    entry.sha_url = url;
                } else {
                    entry.url = url;
                }
            }
        }
    }
    spec
}
