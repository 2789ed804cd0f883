use std::cmp::Ordering;
use std::path::{Component, Path, PathBuf};
use semver::Version;
use crate::error::KindlyError;

/// Separator between a package name and a requested version (`gh@v2.4.0`).
pub const VERSION_SEPARATOR: char = '@';

/// Returns the host operating system as a Go-style identifier
/// (`linux`, `darwin`, `windows`, ...), the naming spec files use.
pub fn host_os() -> String {
    match std::env::consts::OS {
        "macos" => "darwin".to_string(),
        os => os.to_string(),
    }
}

/// Returns the host CPU architecture as a Go-style identifier
/// (`amd64`, `arm64`, `386`, ...).
pub fn host_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        "x86" => "386".to_string(),
        "powerpc64" => "ppc64".to_string(),
        arch => arch.to_string(),
    }
}

/// Splits `name@version` into its name and optional version part.
pub fn split_name_version(arg: &str) -> (String, Option<String>) {
    match arg.split_once(VERSION_SEPARATOR) {
        Some((name, version)) => (name.to_string(), Some(version.to_string())),
        None => (arg.to_string(), None),
    }
}

/// Parses a version string leniently: an optional leading `v` and
/// missing minor/patch components are accepted (`v1.2` is `1.2.0`).
pub fn parse_version(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if bare.is_empty() {
        return None;
    }
    // split off pre-release/build so padding only touches the core triple
    let split_at = bare.find(['-', '+']).unwrap_or(bare.len());
    let (core, rest) = bare.split_at(split_at);
    let parts = core.split('.').count();
    let padded = match parts {
        1 => format!("{core}.0.0{rest}"),
        2 => format!("{core}.0{rest}"),
        _ => bare.to_string(),
    };
    Version::parse(&padded).ok()
}

/// Validates whether a version string is a semantic version in the
/// lenient form accepted by [`parse_version`].
pub fn is_valid_version(version: &str) -> bool {
    parse_version(version).is_some()
}

/// Canonicalizes a requested version to the full `major.minor.patch` form,
/// following the `v`-prefix style of `style` (usually the published version).
pub fn canonical_version(requested: &str, style: &str) -> Result<String, KindlyError> {
    let version = parse_version(requested)
        .ok_or_else(|| KindlyError::InvalidVersion(requested.to_string()))?;
    if style.trim().starts_with('v') {
        Ok(format!("v{version}"))
    } else {
        Ok(version.to_string())
    }
}

/// Compares two version strings by semantic-version ordering.
///
/// Returns `None` if either side does not parse.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    Some(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Returns the final path segment of a URL, the name downloads are stored under.
pub fn file_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next()?;
    path.split('/')
        .next_back()
        .filter(|segment| !segment.is_empty())
}

/// A package name must be usable as a single file name: non-empty, not
/// `.` or `..`, and free of path separators.
pub fn is_valid_package_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains(['/', '\\'])
        && name.trim() == name
}

/// Expands a leading `~/` to the home directory and makes relative paths
/// absolute against the current directory.
pub fn expand_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        return path.to_path_buf();
    }
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest);
        }
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name_version() {
        assert_eq!(
            split_name_version("gh@v2.4.0"),
            ("gh".to_string(), Some("v2.4.0".to_string()))
        );
        assert_eq!(split_name_version("gh"), ("gh".to_string(), None));
    }

    #[test]
    fn test_package_names() {
        for name in ["gh", "ripgrep", "kubectl-1.30", "app.v2"] {
            assert!(is_valid_package_name(name), "{name}");
        }
        for name in ["", ".", "..", "../../escaped", "a/b", "a\\b", "/etc/passwd", " gh"] {
            assert!(!is_valid_package_name(name), "{name:?}");
        }
    }

    #[test]
    fn test_is_valid_version_valid() {
        assert!(is_valid_version("1.2.3"));
        assert!(is_valid_version("v1.2.3"));
        assert!(is_valid_version("v1.2"));
        assert!(is_valid_version("1.2.3-rc.1"));
    }

    #[test]
    fn test_is_valid_version_invalid() {
        assert!(!is_valid_version(""));
        assert!(!is_valid_version("latest"));
        assert!(!is_valid_version("v1.x"));
    }

    #[test]
    fn test_canonical_version_follows_style() {
        assert_eq!(canonical_version("1.2", "v2.0.0").unwrap(), "v1.2.0");
        assert_eq!(canonical_version("v1.2.3", "2.0.0").unwrap(), "1.2.3");
        assert_eq!(canonical_version("v1.2.3-beta", "v1.0.0").unwrap(), "v1.2.3-beta");
        assert!(matches!(
            canonical_version("nope", "v1.0.0"),
            Err(KindlyError::InvalidVersion(_))
        ));
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("v1.10.0", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(compare_versions("1.0.0", "v1.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("1.0.0-rc.1", "1.0.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("x", "1.0.0"), None);
    }

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://github.com/o/r/releases/download/v1/app_linux.tar.gz"),
            Some("app_linux.tar.gz")
        );
        assert_eq!(file_name_from_url("https://host/a.zip?token=1"), Some("a.zip"));
        assert_eq!(file_name_from_url("https://host/dir/"), None);
    }

    #[test]
    fn test_expand_path_keeps_absolute() {
        let abs = std::env::temp_dir();
        assert_eq!(expand_path(&abs), abs);
    }

    #[test]
    fn test_host_identifiers_are_go_style() {
        assert_ne!(host_os(), "macos");
        assert_ne!(host_arch(), "x86_64");
        assert_ne!(host_arch(), "aarch64");
    }
}
