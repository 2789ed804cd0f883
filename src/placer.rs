use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use crate::error::KindlyError;

/// What happened to one declared member.
#[derive(Debug)]
pub enum Placement {
    /// Copied; holds the installed file name.
    Copied(String),
    /// No regular file with that base name exists in the extracted tree.
    Missing,
    Failed(KindlyError),
}

/// The outcome for one declared member name.
#[derive(Debug)]
pub struct MemberOutcome {
    pub member: String,
    pub placement: Placement,
}

impl MemberOutcome {
    pub fn failed(member: impl Into<String>, error: KindlyError) -> Self {
        Self { member: member.into(), placement: Placement::Failed(error) }
    }

    pub fn copied(&self) -> Option<&str> {
        match &self.placement {
            Placement::Copied(name) => Some(name),
            _ => None,
        }
    }
}

/// Finds the first regular file named `member` under `root`.
///
/// Directory entries are visited in file-name order so the choice is stable.
pub fn find_member(root: &Path, member: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == member)
        .map(|entry| entry.into_path())
}

/// Copies the first match for `member` into `dest_dir`, keeping only its base name.
pub fn place_member(root: &Path, member: &str, dest_dir: &Path) -> MemberOutcome {
    let outcome = |placement| MemberOutcome { member: member.to_string(), placement };

    let Some(source) = find_member(root, member) else {
        warn!(member, "File not found in package");
        return outcome(Placement::Missing);
    };
    if let Err(e) = std::fs::create_dir_all(dest_dir) {
        return outcome(Placement::Failed(KindlyError::file_op("create directory", dest_dir, e)));
    }
    let target = dest_dir.join(member);
    debug!(from = %source.display(), to = %target.display(), "Copying file");
    // remove first so a running or read-only previous version does not block the copy
    if target.exists() {
        if let Err(e) = std::fs::remove_file(&target) {
            warn!(file = %target.display(), error = %e, "Could not replace file");
        }
    }
    match std::fs::copy(&source, &target) {
        Ok(_) => outcome(Placement::Copied(member.to_string())),
        Err(e) => {
            let error = KindlyError::file_op("copy to", &target, e);
            warn!(member, error = %error, "Could not copy file");
            outcome(Placement::Failed(error))
        }
    }
}

/// Places every member independently; one failure never stops the others.
pub fn place_members<S: AsRef<str>>(root: &Path, members: &[S], dest_dir: &Path) -> Vec<MemberOutcome> {
    members
        .iter()
        .map(|member| place_member(root, member.as_ref(), dest_dir))
        .collect()
}

/// Names of the members that were actually copied.
pub fn copied_names(outcomes: &[MemberOutcome]) -> Vec<String> {
    outcomes
        .iter()
        .filter_map(MemberOutcome::copied)
        .map(str::to_string)
        .collect()
}
