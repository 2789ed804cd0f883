use std::path::PathBuf;
use anyhow::{anyhow, Result};
use directories::{BaseDirs, ProjectDirs};

/// Root of the per-user install tree, `~/.kindly`.
pub fn get_kindly_home() -> Result<PathBuf> {
    let base = BaseDirs::new()
        .ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(base.home_dir().join(".kindly"))
}

pub fn get_default_bin_dir() -> Result<PathBuf> {
    Ok(get_kindly_home()?.join("bin"))
}

pub fn get_default_completion_dir() -> Result<PathBuf> {
    Ok(get_kindly_home()?.join("completion"))
}

pub fn get_default_man_dir() -> Result<PathBuf> {
    Ok(get_kindly_home()?.join("man"))
}

pub fn get_default_manifest_dir() -> Result<PathBuf> {
    Ok(get_kindly_home()?.join("manifests"))
}

/// Location of `config.toml` in the platform config directory.
pub fn get_global_config_file() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "kindly", "kindly")
        .ok_or_else(|| anyhow!("Could not get project directories"))?;
    Ok(proj_dirs.config_dir().join("config.toml"))
}
