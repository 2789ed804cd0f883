use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use kindly::config::DEFAULT_SOURCE_NAME;
use kindly::*;

const BASE: &str = "https://example.com/app";

/// Serves fixed bodies by URL and records every URL it is asked for.
#[derive(Clone, Default)]
struct MemoryTransport {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransport {
    fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.to_string(), body.into());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for MemoryTransport {
    fn open(&self, _ctx: &Context, url: &str) -> Result<Box<dyn Read + Send>, KindlyError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.files.lock().unwrap().get(url) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(KindlyError::DownloadFailed {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            }),
        }
    }
}

struct Fixture {
    dir: TempDir,
    transport: MemoryTransport,
    kindly: Kindly,
}

impl Fixture {
    fn new(os: &str, arch: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let specs = dir.path().join("specs");
        fs::create_dir_all(&specs).unwrap();

        let mut config = Config::with_root(dir.path().join("root"));
        config.platform = Platform::new(os, arch);
        config
            .sources
            .insert(DEFAULT_SOURCE_NAME.to_string(), Source::Local { path: specs });

        let transport = MemoryTransport::default();
        let kindly = Kindly::with_transport(config, Box::new(transport.clone()));
        Self { dir, transport, kindly }
    }

    fn linux() -> Self {
        Self::new("linux", "amd64")
    }

    fn publish_spec(&self, name: &str, yaml: &str) -> PathBuf {
        let path = self.dir.path().join("specs").join(format!("{name}.yaml"));
        fs::write(&path, yaml).unwrap();
        path
    }

    fn config(&self) -> &Config {
        self.kindly.config()
    }

    fn files_in(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

fn sha256(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn tar_gz(files: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data, mode) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn zip_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn app_spec(version: &str, man: &str) -> String {
    format!(
        r#"
spec:
  name: app
  description: A test application
  version: {version}
  assets:
    linux_amd64:
      url: {BASE}/{{{{.Version}}}}/app_{{{{.OS}}}}_{{{{.Arch}}}}.tar.gz
      sha_url: {BASE}/{{{{.Version}}}}/checksums.txt
  bin:
    - app
  completion:
    bash:
      - app.bash
    zsh:
      - _app
  man:
{man}
"#
    )
}

fn app_artifact(version: &str) -> Vec<u8> {
    let script = format!("#!/bin/sh\necho {version}\n");
    tar_gz(&[
        ("app/bin/app", script.as_bytes(), 0o755),
        ("app/completions/app.bash", b"complete -F _app app\n", 0o644),
        ("app/completions/_app", b"#compdef app\n", 0o644),
        ("app/man/app.1", b".TH APP 1\n", 0o644),
    ])
}

/// Publishes `app` at `version` with a matching artifact and checksum file.
fn publish_app(fixture: &Fixture, version: &str, man: &str) -> Vec<u8> {
    fixture.publish_spec("app", &app_spec(version, man));
    let artifact = app_artifact(version);
    fixture.transport.serve(&format!("{BASE}/{version}/app_linux_amd64.tar.gz"), artifact.clone());
    fixture.transport.serve(
        &format!("{BASE}/{version}/checksums.txt"),
        format!(
            "{}  app_darwin_arm64.tar.gz\n{}  app_linux_amd64.tar.gz\n",
            sha256(b"something else"),
            sha256(&artifact)
        ),
    );
    artifact
}

#[test]
fn test_install_tar_gz_places_members_and_writes_manifest() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1\n    - app-extra.1");
    let ctx = Context::background();

    let report = fixture.kindly.install(&ctx, &InstallRequest::named("app")).unwrap();

    let config = fixture.config();
    assert_eq!(fixture.files_in(&config.out_bin_dir), vec!["app"]);
    assert_eq!(fixture.files_in(&config.out_completion_dir), vec!["app.bash"]);
    assert_eq!(fixture.files_in(&config.out_man_dir), vec!["app.1"]);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(config.out_bin_dir.join("app")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    let manifest = fixture.kindly.store().read("app").unwrap();
    assert_eq!(manifest, report.manifest);
    assert_eq!(manifest.version, "v1.0.0");
    assert_eq!(manifest.source, DEFAULT_SOURCE_NAME);
    assert_eq!(manifest.bin, vec!["app"]);
    assert_eq!(manifest.completion, vec!["app.bash"]);
    // declared but absent from the archive
    assert_eq!(manifest.man, vec!["app.1"]);
    assert!(report.members.iter().any(|m| m.member == "app-extra.1" && m.copied().is_none()));
}

#[test]
fn test_install_checksum_mismatch_leaves_no_trace() {
    let fixture = Fixture::linux();
    fixture.publish_spec("app", &app_spec("v1.0.0", "    - app.1"));
    fixture
        .transport
        .serve(&format!("{BASE}/v1.0.0/app_linux_amd64.tar.gz"), app_artifact("v1.0.0"));
    fixture.transport.serve(
        &format!("{BASE}/v1.0.0/checksums.txt"),
        format!("{}  app_linux_amd64.tar.gz\n", sha256(b"tampered")),
    );

    let err = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("app"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::Verifying);
    assert!(matches!(err.error, KindlyError::ChecksumMismatch { .. }));
    let config = fixture.config();
    assert!(fixture.files_in(&config.out_bin_dir).is_empty());
    assert!(fixture.files_in(&config.manifest_dir).is_empty());
}

#[test]
fn test_checksum_file_without_platform_entry_fails() {
    let fixture = Fixture::linux();
    fixture.publish_spec("app", &app_spec("v1.0.0", "    - app.1"));
    fixture
        .transport
        .serve(&format!("{BASE}/v1.0.0/app_linux_amd64.tar.gz"), app_artifact("v1.0.0"));
    fixture.transport.serve(
        &format!("{BASE}/v1.0.0/checksums.txt"),
        format!("{}  app_darwin_arm64.tar.gz\n", sha256(b"other")),
    );

    let err = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("app"))
        .unwrap_err();
    assert!(matches!(err.error, KindlyError::ChecksumMismatch { .. }));
    assert!(!fixture.kindly.store().exists("app"));
}

#[test]
fn test_unsupported_platform_fetches_no_artifact() {
    let fixture = Fixture::new("darwin", "arm64");
    publish_app(&fixture, "v1.0.0", "    - app.1");

    let err = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("app"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::Resolving);
    assert!(matches!(
        err.error,
        KindlyError::PlatformUnsupported { ref os_arch, .. } if os_arch == "darwin_arm64"
    ));
    assert!(fixture.transport.requests().is_empty());
}

#[test]
fn test_requested_version_rules() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let ctx = Context::background();

    let newer = InstallRequest::named("app@v2.0.0");
    let err = fixture.kindly.install(&ctx, &newer).unwrap_err();
    assert!(matches!(err.error, KindlyError::VersionNotFound { .. }));

    let garbage = InstallRequest::named("app@latest-ish");
    let err = fixture.kindly.install(&ctx, &garbage).unwrap_err();
    assert!(matches!(err.error, KindlyError::InvalidVersion(_)));

    assert!(fixture.transport.requests().is_empty());
    assert!(!fixture.kindly.store().exists("app"));
}

#[test]
fn test_missing_spec_is_unavailable() {
    let fixture = Fixture::linux();
    let err = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("ghost"))
        .unwrap_err();
    assert_eq!(err.package, "ghost");
    assert!(matches!(err.error, KindlyError::SpecUnavailable { .. }));
}

#[test]
fn test_cancelled_context_stops_install() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let ctx = Context::background();
    ctx.cancel();

    let err = fixture.kindly.install(&ctx, &InstallRequest::named("app")).unwrap_err();
    assert!(matches!(err.error, KindlyError::Cancelled));
    assert!(!fixture.kindly.store().exists("app"));
}

#[test]
fn test_update_when_current_is_a_no_op() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let ctx = Context::background();
    let installed = fixture.kindly.install(&ctx, &InstallRequest::named("app")).unwrap();
    let requests = fixture.transport.requests().len();

    let outcome = fixture.kindly.update(&ctx, "app").unwrap();

    assert!(matches!(outcome, UpdateOutcome::UpToDate { ref version } if version == "v1.0.0"));
    assert_eq!(fixture.transport.requests().len(), requests);
    assert_eq!(fixture.kindly.store().read("app").unwrap().date, installed.manifest.date);
}

#[test]
fn test_update_installs_newer_version_and_drops_stale_files() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let ctx = Context::background();
    fixture.kindly.install(&ctx, &InstallRequest::named("app")).unwrap();

    publish_app(&fixture, "v1.1.0", "    []");
    let outcome = fixture.kindly.update(&ctx, "app").unwrap();

    assert!(matches!(
        outcome,
        UpdateOutcome::Updated { ref from, ref to } if from == "v1.0.0" && to == "v1.1.0"
    ));
    let config = fixture.config();
    let bin = fs::read_to_string(config.out_bin_dir.join("app")).unwrap();
    assert!(bin.contains("v1.1.0"));
    assert!(fixture.files_in(&config.out_man_dir).is_empty());
    let manifest = fixture.kindly.store().read("app").unwrap();
    assert_eq!(manifest.version, "v1.1.0");
    assert!(manifest.man.is_empty());
}

#[test]
fn test_update_of_missing_package_fails() {
    let fixture = Fixture::linux();
    let err = fixture.kindly.update(&Context::background(), "ghost").unwrap_err();
    assert!(matches!(err.error, KindlyError::ManifestNotFound(_)));
}

#[test]
fn test_update_with_unparseable_installed_version_fails() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let manifest_dir = &fixture.config().manifest_dir;
    fs::create_dir_all(manifest_dir).unwrap();
    fs::write(
        manifest_dir.join("app.toml"),
        format!(
            r#"name = "app"
source = "{DEFAULT_SOURCE_NAME}"
version = "garbage"
date = "2024-05-01T10:00:00Z"
bin = ["app"]
"#
        ),
    )
    .unwrap();

    let err = fixture.kindly.update(&Context::background(), "app").unwrap_err();

    assert_eq!(err.stage, Stage::Resolving);
    assert!(matches!(err.error, KindlyError::InvalidVersion(ref v) if v == "app@garbage"));
    assert!(fixture.transport.requests().is_empty());
    assert_eq!(fixture.kindly.store().read("app").unwrap().version, "garbage");
}

#[test]
fn test_path_like_spec_name_writes_nothing_outside_root() {
    let fixture = Fixture::linux();
    let spec = app_spec("v1.0.0", "    - app.1").replace("name: app", "name: ../../escaped");
    fixture.publish_spec("escaped", &spec);
    let artifact = app_artifact("v1.0.0");
    fixture.transport.serve(&format!("{BASE}/v1.0.0/app_linux_amd64.tar.gz"), artifact.clone());
    fixture.transport.serve(
        &format!("{BASE}/v1.0.0/checksums.txt"),
        format!("{}  app_linux_amd64.tar.gz\n", sha256(&artifact)),
    );

    let err = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("escaped"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::Resolving);
    assert!(matches!(err.error, KindlyError::InvalidRequest(_)));
    assert!(fixture.transport.requests().is_empty());
    let written: Vec<_> = walkdir::WalkDir::new(fixture.dir.path())
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".toml"))
        .collect();
    assert!(written.is_empty(), "{written:?}");
}

#[test]
fn test_remove_round_trip_leaves_no_trace() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let ctx = Context::background();
    fixture.kindly.install(&ctx, &InstallRequest::named("app")).unwrap();

    let report = fixture.kindly.remove(&ctx, "app").unwrap();

    assert_eq!(report.removed.len(), 3);
    assert!(report.failed.is_empty());
    let config = fixture.config();
    for dir in [&config.out_bin_dir, &config.out_completion_dir, &config.out_man_dir, &config.manifest_dir] {
        assert!(fixture.files_in(dir).is_empty(), "{}", dir.display());
    }
    assert!(matches!(
        fixture.kindly.remove(&ctx, "app"),
        Err(KindlyError::ManifestNotFound(_))
    ));
}

#[test]
fn test_remove_all_continues_past_missing_files() {
    let fixture = Fixture::linux();
    let config = fixture.config();
    fs::create_dir_all(&config.out_bin_dir).unwrap();
    for name in ["alpha", "beta", "gamma"] {
        // beta's binary was deleted by hand
        if name != "beta" {
            fs::write(config.out_bin_dir.join(name), b"bin").unwrap();
        }
        fixture
            .kindly
            .store()
            .write(&PackageManifest {
                name: name.to_string(),
                source: DEFAULT_SOURCE_NAME.to_string(),
                version: "v1.0.0".to_string(),
                date: chrono::Utc::now(),
                bin: vec![name.to_string()],
                completion: vec![],
                man: vec![],
            })
            .unwrap();
    }

    let report = fixture.kindly.remove_all(&Context::background()).unwrap();

    assert!(report.all_succeeded());
    let beta = report
        .results
        .iter()
        .find(|(name, _)| name == "beta")
        .and_then(|(_, r)| r.as_ref().ok())
        .unwrap();
    assert_eq!(beta.failed.len(), 1);
    assert!(fixture.files_in(&config.manifest_dir).is_empty());
    assert!(fixture.files_in(&config.out_bin_dir).is_empty());
}

#[test]
fn test_batch_install_isolates_failures() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let requests = [InstallRequest::named("ghost"), InstallRequest::named("app")];

    let report = fixture.kindly.install_many(&Context::background(), &requests);

    assert!(!report.all_succeeded());
    let failures: Vec<_> = report.failures().map(|(name, _)| name).collect();
    assert_eq!(failures, vec!["ghost"]);
    assert!(fixture.kindly.store().exists("app"));
}

#[test]
fn test_zip_path_traversal_aborts_install() {
    let fixture = Fixture::linux();
    fixture.publish_spec(
        "evil",
        &format!(
            "name: evil\nversion: 1.0.0\nassets:\n  linux_amd64:\n    url: {BASE}/evil.zip\nbin:\n  - evil\n"
        ),
    );
    fixture.transport.serve(
        &format!("{BASE}/evil.zip"),
        zip_archive(&[("evil", b"ok"), ("../../evil", b"pwned")]),
    );

    let err = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("evil"))
        .unwrap_err();

    assert_eq!(err.stage, Stage::Extracting);
    assert!(matches!(err.error, KindlyError::PathTraversal(_)));
    let config = fixture.config();
    assert!(fixture.files_in(&config.out_bin_dir).is_empty());
    assert!(!fixture.kindly.store().exists("evil"));
}

#[test]
fn test_windows_binary_gets_exe_suffix() {
    let fixture = Fixture::new("windows", "amd64");
    fixture.publish_spec(
        "app",
        &format!(
            "spec:\n  name: app\n  version: v0.9.0\n  assets:\n    windows_amd64:\n      url: {BASE}/app_{{{{.OS}}}}.zip\n  bin:\n    - app\n"
        ),
    );
    fixture.transport.serve(
        &format!("{BASE}/app_windows.zip"),
        zip_archive(&[("app/app.exe", b"MZ"), ("app/README.md", b"readme")]),
    );

    let report = fixture
        .kindly
        .install(&Context::background(), &InstallRequest::named("app"))
        .unwrap();

    assert_eq!(report.manifest.bin, vec!["app.exe"]);
    assert_eq!(fixture.files_in(&fixture.config().out_bin_dir), vec!["app.exe"]);
}

#[test]
fn test_install_from_spec_file_records_location() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let path = fixture.dir.path().join("specs").join("app.yaml");
    let request = InstallRequest::parse(
        &path.display().to_string(),
        SpecLocation::File(PathBuf::new()),
    );

    let report = fixture.kindly.install(&Context::background(), &request).unwrap();

    assert_eq!(report.manifest.name, "app");
    assert_eq!(SpecLocation::from_record(&report.manifest.source), SpecLocation::File(path));
}

#[test]
fn test_list_installed_and_available() {
    let fixture = Fixture::linux();
    publish_app(&fixture, "v1.0.0", "    - app.1");
    let ctx = Context::background();
    assert!(fixture.kindly.list_packages(&ctx, None, true).unwrap().is_empty());

    fixture.kindly.install(&ctx, &InstallRequest::named("app")).unwrap();

    assert_eq!(fixture.kindly.list_packages(&ctx, None, true).unwrap(), vec!["app@v1.0.0"]);
    assert_eq!(
        fixture.kindly.list_packages(&ctx, Some(DEFAULT_SOURCE_NAME), false).unwrap(),
        vec!["kindly/app@v1.0.0"]
    );
    assert!(matches!(
        fixture.kindly.list_packages(&ctx, Some("nope"), false),
        Err(KindlyError::SpecUnavailable { .. })
    ));
}
