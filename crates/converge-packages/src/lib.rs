//! Canonical dependency keys for compiled package caching.
//!
//! A key encodes a package's transitive dependency closure (names and
//! versions, in declared order) and nothing about the package itself, so
//! two packages from unrelated releases with identical closures share
//! compiled artifacts.

use thiserror::Error;

mod key;
mod models;

pub use key::{DependencyKeyGenerator, PackageNode};
pub use models::{CompiledPackageSpec, Package, Release, ReleaseVersion};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyKeyError {
    #[error("Package `{0}' not found")]
    UnknownPackage(String),
    #[error("Package `{package}' depends on `{dependency}', which is not in scope")]
    UnknownDependency { package: String, dependency: String },
    #[error("Package `{0}' appears more than once in scope")]
    DuplicatePackage(String),
    #[error("Dependency cycle: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },
}

pub type Result<T> = std::result::Result<T, DependencyKeyError>;
