use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use crate::global::utils::{
    get_default_bin_dir, get_default_completion_dir, get_default_man_dir,
    get_default_manifest_dir, get_global_config_file,
};
use crate::util::{expand_path, host_arch, host_os};

/// Name of the source used when neither config nor flags name one.
pub const DEFAULT_SOURCE_NAME: &str = "kindly";

/// A place spec documents are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    /// A directory inside a GitHub repository, e.g. `borkod/kindly-specs/specs`.
    Github {
        owner: String,
        repo: String,
        #[serde(default)]
        path: String,
        #[serde(default = "default_branch")]
        branch: String,
    },
    /// A plain base URL; `<base>/<name>.yaml` is fetched.
    Url { base: String },
    /// A local directory of spec files.
    Local { path: PathBuf },
}

fn default_branch() -> String {
    "main".to_string()
}

/// The OS/architecture pair packages are installed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self { os: os.into(), arch: arch.into() }
    }

    /// The platform kindly runs on.
    pub fn host() -> Self {
        Self::new(host_os(), host_arch())
    }

    /// The `<os>_<arch>` key used in a spec's asset map.
    pub fn key(&self) -> String {
        format!("{}_{}", self.os, self.arch)
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

/// Everything the core needs to know about where and how to install.
///
/// Built once by the caller and passed explicitly to [`crate::Kindly`].
#[derive(Debug, Clone)]
pub struct Config {
    pub verbose: bool,
    pub out_bin_dir: PathBuf,
    pub out_completion_dir: PathBuf,
    pub out_man_dir: PathBuf,
    pub manifest_dir: PathBuf,
    /// Shell whose completion files are installed.
    pub completion: String,
    pub default_source: String,
    pub sources: BTreeMap<String, Source>,
    pub platform: Platform,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Config {
    /// A configuration rooted at `root`, with `bin/`, `completion/`, `man/`
    /// and `manifests/` underneath it and no sources.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            verbose: false,
            out_bin_dir: root.join("bin"),
            out_completion_dir: root.join("completion"),
            out_man_dir: root.join("man"),
            manifest_dir: root.join("manifests"),
            completion: "bash".to_string(),
            default_source: DEFAULT_SOURCE_NAME.to_string(),
            sources: BTreeMap::new(),
            platform: Platform::host(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(300),
        }
    }

    /// Defaults for the current user: `~/.kindly/...` and the public spec source.
    pub fn default_for_user() -> Result<Self> {
        let mut sources = BTreeMap::new();
        sources.insert(
            DEFAULT_SOURCE_NAME.to_string(),
            Source::Github {
                owner: "borkod".to_string(),
                repo: "kindly-specs".to_string(),
                path: "specs".to_string(),
                branch: default_branch(),
            },
        );
        Ok(Self {
            out_bin_dir: get_default_bin_dir()?,
            out_completion_dir: get_default_completion_dir()?,
            out_man_dir: get_default_man_dir()?,
            manifest_dir: get_default_manifest_dir()?,
            sources,
            ..Self::with_root(".")
        })
    }

    /// Loads the user defaults and overlays `path` (or the global
    /// `config.toml` when `path` is `None`) if the file exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_for_user()?;
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => get_global_config_file()?,
        };
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Could not read config file {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?;
            config.apply(file);
        }
        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) {
        if let Some(verbose) = file.verbose {
            self.verbose = verbose;
        }
        if let Some(dir) = file.out_bin_dir {
            self.out_bin_dir = expand_path(dir);
        }
        if let Some(dir) = file.out_completion_dir {
            self.out_completion_dir = expand_path(dir);
        }
        if let Some(dir) = file.out_man_dir {
            self.out_man_dir = expand_path(dir);
        }
        if let Some(dir) = file.manifest_dir {
            self.manifest_dir = expand_path(dir);
        }
        if let Some(shell) = file.completion {
            self.completion = shell;
        }
        if let Some(name) = file.default_source {
            self.default_source = name;
        }
        for (name, source) in file.sources {
            let source = match source {
                Source::Local { path } => Source::Local { path: expand_path(path) },
                other => other,
            };
            self.sources.insert(name, source);
        }
        if let Some(os) = file.os {
            self.platform.os = os;
        }
        if let Some(arch) = file.arch {
            self.platform.arch = arch;
        }
        if let Some(secs) = file.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
    }

    /// Looks up a named source, falling back to the default source.
    pub fn source(&self, name: Option<&str>) -> Option<(&str, &Source)> {
        let name = name.unwrap_or(&self.default_source);
        self.sources
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// On-disk shape of `config.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    verbose: Option<bool>,
    out_bin_dir: Option<PathBuf>,
    out_completion_dir: Option<PathBuf>,
    out_man_dir: Option<PathBuf>,
    manifest_dir: Option<PathBuf>,
    completion: Option<String>,
    default_source: Option<String>,
    sources: BTreeMap<String, Source>,
    os: Option<String>,
    arch: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}
