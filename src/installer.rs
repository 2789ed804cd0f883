//! Install, remove, update and list orchestration.
//!
//! Each package runs through `Resolving -> Fetching -> Verifying ->
//! Extracting -> Placing -> ManifestWriting -> Done`. A failure in any
//! state ends that package's pipeline; batches carry on with the next name.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use chrono::Utc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use crate::archive::extract;
use crate::config::Config;
use crate::context::Context;
use crate::error::{KindlyError, PipelineError, Stage};
use crate::fetch::{download, verify_checksum, HttpTransport, Transport};
use crate::manifest::{ManifestStore, PackageManifest};
use crate::placer::{copied_names, place_members, MemberOutcome};
use crate::registry::{list_source, resolve, InstallRequest, SpecLocation};
use crate::spec::PackageSpec;
use crate::template::expand_bin_name;
use crate::util::{compare_versions, is_valid_version};

/// Result of a successful install.
#[derive(Debug)]
pub struct InstallReport {
    pub manifest: PackageManifest,
    /// Per-member outcomes, including members that were not placed.
    pub members: Vec<MemberOutcome>,
}

/// Result of a remove. Individual file deletions are best-effort.
#[derive(Debug, Default)]
pub struct RemoveReport {
    pub name: String,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, KindlyError)>,
}

/// Result of an update.
#[derive(Debug)]
pub enum UpdateOutcome {
    /// The published version was newer and has been installed.
    Updated { from: String, to: String },
    /// The installed version is current (or newer than published).
    UpToDate { version: String },
}

/// Per-package outcomes of a batch, in request order.
#[derive(Debug)]
pub struct BatchReport<T, E> {
    pub results: Vec<(String, Result<T, E>)>,
}

impl<T, E> BatchReport<T, E> {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &E)> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }
}

/// The kindly core: a configuration, a manifest store and a transport.
pub struct Kindly {
    config: Config,
    store: ManifestStore,
    transport: Box<dyn Transport>,
}

impl Kindly {
    /// Uses the HTTP transport with the configured timeouts.
    pub fn new(config: Config) -> Result<Self, KindlyError> {
        let transport = HttpTransport::new(config.connect_timeout, config.request_timeout)?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    pub fn with_transport(config: Config, transport: Box<dyn Transport>) -> Self {
        let store = ManifestStore::new(&config.manifest_dir);
        Self { config, store, transport }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Resolves a request without installing anything.
    pub fn check(&self, ctx: &Context, request: &InstallRequest) -> Result<PackageSpec, KindlyError> {
        resolve(&self.config, self.transport.as_ref(), ctx, request).map(|(_, spec)| spec)
    }

    /// Installs one package.
    ///
    /// The scratch directory lives exactly as long as this call. No manifest
    /// is written unless every state up to `Placing` succeeded.
    pub fn install(&self, ctx: &Context, request: &InstallRequest) -> Result<InstallReport, PipelineError> {
        let mut package = request.name.clone();
        let fail = |package: &str, stage, error| PipelineError::new(package, stage, error);

        debug!(package = %package, stage = %Stage::Resolving, "Installing package");
        let (descriptor, spec) = resolve(&self.config, self.transport.as_ref(), ctx, request)
            .map_err(|e| fail(&package, Stage::Resolving, e))?;
        package = descriptor.name.clone();

        let scratch = TempDir::with_prefix("kindly_").map_err(|e| {
            fail(&package, Stage::Fetching, KindlyError::file_op("create", std::env::temp_dir(), e))
        })?;

        debug!(package = %package, stage = %Stage::Fetching, url = %descriptor.url);
        let artifact = download(self.transport.as_ref(), ctx, &descriptor.url, scratch.path())
            .map_err(|e| fail(&package, Stage::Fetching, e))?;

        match &descriptor.checksum_url {
            Some(checksum_url) => {
                debug!(package = %package, stage = %Stage::Verifying, url = %checksum_url);
                verify_checksum(
                    self.transport.as_ref(),
                    ctx,
                    &artifact,
                    checksum_url,
                    &self.config.platform.os,
                    &self.config.platform.arch,
                )
                .map_err(|e| fail(&package, Stage::Verifying, e))?;
            }
            None => debug!(package = %package, "No SHA file provided, skipping SHA value check"),
        }

        debug!(package = %package, stage = %Stage::Extracting);
        let extract_dir = scratch.path().join("extract");
        extract(&artifact.path, &extract_dir)
            .map_err(|e| fail(&package, Stage::Extracting, e))?;

        debug!(package = %package, stage = %Stage::Placing);
        let members = self.place(&spec, scratch.path());

        debug!(package = %package, stage = %Stage::ManifestWriting);
        let manifest = PackageManifest {
            name: descriptor.name.clone(),
            source: request.location.to_record(&self.config),
            version: descriptor.version.clone(),
            date: Utc::now(),
            bin: copied_names(&members.bin),
            completion: copied_names(&members.completion),
            man: copied_names(&members.man),
        };
        self.store
            .write(&manifest)
            .map_err(|e| fail(&package, Stage::ManifestWriting, e))?;

        info!(package = %package, version = %manifest.version, stage = %Stage::Done, "Installed package");
        Ok(InstallReport {
            manifest,
            members: members.into_vec(),
        })
    }

    /// Copies binaries, completions for the configured shell and man pages
    /// out of `root`. Member failures are independent of one another.
    fn place(&self, spec: &PackageSpec, root: &Path) -> PlacedMembers {
        let platform = &self.config.platform;
        let mut bin = Vec::with_capacity(spec.bin.len());
        for member in &spec.bin {
            match expand_bin_name(member, platform) {
                Ok(name) => bin.extend(place_members(root, &[name], &self.config.out_bin_dir)),
                Err(e) => {
                    warn!(member = %member, error = %e, "Could not expand binary name");
                    bin.push(MemberOutcome::failed(member.as_str(), e));
                }
            }
        }
        let completion = place_members(
            root,
            spec.completion_for(&self.config.completion),
            &self.config.out_completion_dir,
        );
        let man = place_members(root, &spec.man, &self.config.out_man_dir);
        PlacedMembers { bin, completion, man }
    }

    /// Removes the files recorded for `name`, then its manifest.
    ///
    /// File deletions are attempted independently; the manifest is deleted
    /// last even when some of them failed, so the package never gets stuck
    /// half-installed.
    pub fn remove(&self, _ctx: &Context, name: &str) -> Result<RemoveReport, KindlyError> {
        let manifest = self.store.read(name)?;
        let mut report = RemoveReport { name: name.to_string(), ..Default::default() };
        for path in self.installed_paths(&manifest) {
            remove_file_logged(&path, &mut report);
        }
        debug!(package = name, "Deleting manifest");
        self.store.delete(name)?;
        Ok(report)
    }

    fn installed_paths(&self, manifest: &PackageManifest) -> Vec<PathBuf> {
        let dirs = [
            (&self.config.out_bin_dir, &manifest.bin),
            (&self.config.out_completion_dir, &manifest.completion),
            (&self.config.out_man_dir, &manifest.man),
        ];
        dirs.iter()
            .flat_map(|(dir, files)| files.iter().map(move |f| dir.join(f)))
            .collect()
    }

    /// Installs the published version of `name` if it is newer than the
    /// installed one. Equal or older published versions are a no-op.
    pub fn update(&self, ctx: &Context, name: &str) -> Result<UpdateOutcome, PipelineError> {
        let fail = |stage, error| PipelineError::new(name, stage, error);
        let installed = self.store.read(name).map_err(|e| fail(Stage::Resolving, e))?;
        let location = SpecLocation::from_record(&installed.source);
        let request = InstallRequest {
            name: match &location {
                SpecLocation::Source(_) => installed.name.clone(),
                SpecLocation::File(path) => path.display().to_string(),
                SpecLocation::Url(url) => url.clone(),
            },
            version: None,
            location,
        };

        let (descriptor, _) = resolve(&self.config, self.transport.as_ref(), ctx, &request)
            .map_err(|e| fail(Stage::Resolving, e))?;
        let newer = match compare_versions(&descriptor.version, &installed.version) {
            Some(ordering) => ordering == Ordering::Greater,
            None => {
                let bad = if is_valid_version(&installed.version) {
                    &descriptor.version
                } else {
                    &installed.version
                };
                warn!(package = name, version = %bad, "Cannot compare versions");
                return Err(fail(Stage::Resolving, KindlyError::InvalidVersion(format!("{name}@{bad}"))));
            }
        };
        if !newer {
            debug!(package = name, version = %installed.version, "Package is up to date");
            return Ok(UpdateOutcome::UpToDate { version: installed.version });
        }

        let report = self.install(ctx, &request)?;
        // drop files the new version no longer ships
        let current = self.installed_paths(&report.manifest);
        let mut stale = RemoveReport::default();
        for path in self.installed_paths(&installed) {
            if !current.contains(&path) {
                remove_file_logged(&path, &mut stale);
            }
        }
        Ok(UpdateOutcome::Updated {
            from: installed.version,
            to: report.manifest.version,
        })
    }

    /// `name@version` lines, either for installed packages or for every
    /// package published by `source` (all configured sources if `None`).
    pub fn list_packages(
        &self,
        ctx: &Context,
        source: Option<&str>,
        installed_only: bool,
    ) -> Result<Vec<String>, KindlyError> {
        if installed_only {
            return Ok(self
                .store
                .list_all()?
                .iter()
                .map(PackageManifest::display_name)
                .collect());
        }

        let sources: Vec<_> = match source {
            Some(name) => {
                let entry = self.config.source(Some(name)).ok_or_else(|| {
                    KindlyError::SpecUnavailable {
                        name: name.to_string(),
                        reason: format!("unknown source {name}"),
                    }
                })?;
                vec![entry]
            }
            None => self.config.sources.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        };

        let mut lines = Vec::new();
        for (source_name, source) in sources {
            for package in list_source(self.transport.as_ref(), ctx, source_name, source)? {
                let request = InstallRequest {
                    name: package,
                    version: None,
                    location: SpecLocation::Source(Some(source_name.to_string())),
                };
                let spec = self.check(ctx, &request)?;
                lines.push(format!("{source_name}/{}@{}", spec.name, spec.version));
            }
        }
        Ok(lines)
    }

    /// Installs each request in turn, isolating failures per package.
    pub fn install_many(
        &self,
        ctx: &Context,
        requests: &[InstallRequest],
    ) -> BatchReport<InstallReport, PipelineError> {
        BatchReport {
            results: requests
                .iter()
                .map(|request| (request.name.clone(), self.install(ctx, request)))
                .collect(),
        }
    }

    pub fn remove_many<S: AsRef<str>>(
        &self,
        ctx: &Context,
        names: &[S],
    ) -> BatchReport<RemoveReport, KindlyError> {
        BatchReport {
            results: names
                .iter()
                .map(|name| (name.as_ref().to_string(), self.remove(ctx, name.as_ref())))
                .collect(),
        }
    }

    /// Removes every package that has a manifest.
    pub fn remove_all(&self, ctx: &Context) -> Result<BatchReport<RemoveReport, KindlyError>, KindlyError> {
        let names = self.store.names()?;
        Ok(self.remove_many(ctx, &names))
    }

    pub fn update_many<S: AsRef<str>>(
        &self,
        ctx: &Context,
        names: &[S],
    ) -> BatchReport<UpdateOutcome, PipelineError> {
        BatchReport {
            results: names
                .iter()
                .map(|name| (name.as_ref().to_string(), self.update(ctx, name.as_ref())))
                .collect(),
        }
    }

    /// Updates every package that has a manifest.
    pub fn update_all(&self, ctx: &Context) -> Result<BatchReport<UpdateOutcome, PipelineError>, KindlyError> {
        let names = self.store.names()?;
        Ok(self.update_many(ctx, &names))
    }
}

struct PlacedMembers {
    bin: Vec<MemberOutcome>,
    completion: Vec<MemberOutcome>,
    man: Vec<MemberOutcome>,
}

impl PlacedMembers {
    fn into_vec(self) -> Vec<MemberOutcome> {
        self.bin
            .into_iter()
            .chain(self.completion)
            .chain(self.man)
            .collect()
    }
}

fn remove_file_logged(path: &Path, report: &mut RemoveReport) {
    debug!(file = %path.display(), "Deleting file");
    match std::fs::remove_file(path) {
        Ok(()) => report.removed.push(path.to_path_buf()),
        Err(e) => {
            let error = KindlyError::file_op("delete", path, e);
            warn!(error = %error, "Could not delete file");
            report.failed.push((path.to_path_buf(), error));
        }
    }
}
