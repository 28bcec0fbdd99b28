use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Compiled package entry as listed in a release manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPackageSpec {
    pub name: String,
    pub version: String,
    pub fingerprint: String,
    pub stemcell: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: Uuid,
    pub name: String,
}

impl Release {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }
}

/// Persisted package. The same name can exist with different versions and
/// dependencies across releases and across versions of one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: Uuid,
    pub release_id: Uuid,
    pub name: String,
    pub version: String,
    pub fingerprint: Option<String>,
    /// Declared dependency names, order significant.
    #[serde(default)]
    pub dependency_set: Vec<String>,
}

impl Package {
    pub fn new(release: &Release, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            release_id: release.id,
            name: name.into(),
            version: version.into(),
            fingerprint: None,
            dependency_set: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependency_set = names.into_iter().map(Into::into).collect();
        self
    }
}

/// One version of a release and the packages it contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseVersion {
    pub id: Uuid,
    pub release_id: Uuid,
    pub version: String,
    pub packages: Vec<Package>,
}

impl ReleaseVersion {
    pub fn new(release: &Release, version: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            release_id: release.id,
            version: version.into(),
            packages: Vec::new(),
        }
    }

    pub fn add_package(&mut self, package: Package) {
        self.packages.push(package);
    }
}
