use std::path::PathBuf;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Config file (default: the user's kindly `config.toml`)
    #[clap(long, global = true, env = "KINDLY_CONFIG")]
    pub config: Option<PathBuf>,
    /// Print debug output
    #[clap(short, long, global = true, env = "KINDLY_VERBOSE")]
    pub verbose: bool,
    /// Directory binaries are copied to
    #[clap(long, global = true, env = "KINDLY_OUTBINDIR")]
    pub bin_dir: Option<PathBuf>,
    /// Directory completion scripts are copied to
    #[clap(long, global = true, env = "KINDLY_OUTCOMPLETIONDIR")]
    pub completion_dir: Option<PathBuf>,
    /// Directory man pages are copied to
    #[clap(long, global = true, env = "KINDLY_OUTMANDIR")]
    pub man_dir: Option<PathBuf>,
    /// Directory install manifests are kept in
    #[clap(long, global = true, env = "KINDLY_MANIFESTDIR")]
    pub manifest_dir: Option<PathBuf>,
    /// Shell whose completion scripts are installed
    #[clap(long, global = true, env = "KINDLY_COMPLETION")]
    pub completion: Option<String>,
    /// Target operating system (e.g. linux, darwin, windows)
    #[clap(long, global = true, env = "KINDLY_OS")]
    pub os: Option<String>,
    /// Target architecture (e.g. amd64, arm64)
    #[clap(long, global = true, env = "KINDLY_ARCH")]
    pub arch: Option<String>,

    #[command(subcommand)]
    pub(crate) command: KindlyCommand,
}

/// Where spec documents are read from. At most one may be given.
#[derive(Debug, Args, Clone, PartialEq, Default)]
pub struct LocationArgs {
    /// Named spec source from the config
    #[clap(long, conflicts_with_all = ["file", "url"])]
    pub source: Option<String>,
    /// Treat arguments as local spec files
    #[clap(short, long, conflicts_with = "url")]
    pub file: bool,
    /// Treat arguments as spec URLs
    #[clap(short, long)]
    pub url: bool,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum KindlyCommand {
    /// Installs packages: <name>[@<version>], or spec files / URLs with --file / --url
    Install {
        #[clap(required = true)]
        packages: Vec<String>,
        #[command(flatten)]
        location: LocationArgs,
    },
    /// Removes installed packages and their manifests
    Remove {
        #[clap(required_unless_present = "all")]
        names: Vec<String>,
        /// Remove every installed package
        #[clap(short, long)]
        all: bool,
    },
    /// Updates installed packages whose published version is newer
    Update {
        #[clap(required_unless_present = "all")]
        names: Vec<String>,
        /// Update every installed package
        #[clap(short, long)]
        all: bool,
    },
    /// Lists available packages, or installed ones with --installed
    List {
        #[clap(short, long)]
        installed: bool,
        /// Only list packages of this source
        #[clap(long, conflicts_with = "installed")]
        source: Option<String>,
    },
    /// Checks that packages resolve for the target platform without installing them
    Check {
        #[clap(required = true)]
        packages: Vec<String>,
        /// Print the resolved spec
        #[clap(short, long)]
        output: bool,
        #[command(flatten)]
        location: LocationArgs,
    },
    /// Drafts a spec from a GitHub repository's latest release
    Template {
        owner: String,
        repo: String,
    },
}
