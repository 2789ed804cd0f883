//! # Kindly Core Library
//!
//! This crate contains the core logic of `kindly`, a cross-platform package
//! manager for prebuilt binary releases. A package is described by a small
//! YAML spec published in a spec source; installing it downloads the release
//! artifact for the host platform, verifies its checksum, extracts it and
//! copies the declared binaries, shell completions and man pages into
//! user-configured directories. Every install is recorded in a manifest so it
//! can later be updated or removed.
//!
//! The [`Kindly`] facade is the entry point; the `kindly` CLI is a thin layer
//! on top of it.
//!
//! ## Modules Overview
//! - [`config`] – Output directories, spec sources and target platform
//! - [`spec`] – The package spec document (YAML)
//! - [`registry`] – Spec retrieval, validation and download descriptors
//! - [`template`] – `{{.Version}}` / `{{.OS}}` / `{{.Arch}}` expansion
//! - [`fetch`] – Streaming downloads and SHA-256 verification
//! - [`archive`] – tar.gz and zip extraction with path confinement
//! - [`placer`] – Locating members in an extracted tree and copying them out
//! - [`manifest`] – Installed-package records
//! - [`installer`] – The install, update, remove and list orchestration
//! - [`generate`] – Drafting a spec from a GitHub release
//! - [`context`] – Cancellation and deadlines
//! - [`global`] – Default per-user paths

pub mod archive;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod generate;
pub mod global;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod placer;
pub mod registry;
pub mod spec;
pub mod template;
pub mod util;

pub use config::{Config, Platform, Source};
pub use context::Context;
pub use error::{KindlyError, PipelineError, Stage};
pub use fetch::{HttpTransport, Transport};
pub use installer::{BatchReport, InstallReport, Kindly, RemoveReport, UpdateOutcome};
pub use manifest::{ManifestStore, PackageManifest};
pub use registry::{DownloadDescriptor, InstallRequest, SpecLocation};
pub use spec::{Asset, PackageSpec};
