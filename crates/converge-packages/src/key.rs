use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::{CompiledPackageSpec, DependencyKeyError, Package, ReleaseVersion, Result};

/// Anything that can sit in a dependency graph.
pub trait PackageNode {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn dependency_names(&self) -> &[String];
}

impl PackageNode for CompiledPackageSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependency_names(&self) -> &[String] {
        &self.dependencies
    }
}

impl PackageNode for Package {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dependency_names(&self) -> &[String] {
        &self.dependency_set
    }
}

/// Name index over exactly one scope: one manifest package list, or the
/// membership of one release version.
struct Scope<'a, P> {
    by_name: HashMap<&'a str, &'a P>,
}

impl<'a, P: PackageNode> Scope<'a, P> {
    fn build(nodes: impl IntoIterator<Item = &'a P>) -> Result<Self> {
        let mut by_name = HashMap::new();
        for node in nodes {
            if by_name.insert(node.name(), node).is_some() {
                return Err(DependencyKeyError::DuplicatePackage(node.name().to_string()));
            }
        }
        Ok(Self { by_name })
    }

    fn get(&self, name: &str) -> Option<&'a P> {
        self.by_name.get(name).copied()
    }

    /// `[[name, version], [name, version, [...]], ...]` for the direct
    /// dependencies of `node`, expanded recursively. `path` holds the names
    /// from the root down to `node`.
    fn expand(&self, node: &P, path: &mut Vec<String>) -> Result<Vec<Value>> {
        let mut entries = Vec::with_capacity(node.dependency_names().len());

        for dep_name in node.dependency_names() {
            if path.iter().any(|seen| seen == dep_name) {
                let mut cycle = path.clone();
                cycle.push(dep_name.clone());
                return Err(DependencyKeyError::DependencyCycle { path: cycle });
            }

            let dep = self
                .get(dep_name)
                .ok_or_else(|| DependencyKeyError::UnknownDependency {
                    package: node.name().to_string(),
                    dependency: dep_name.clone(),
                })?;

            let mut entry = vec![
                Value::String(dep.name().to_string()),
                Value::String(dep.version().to_string()),
            ];
            if !dep.dependency_names().is_empty() {
                path.push(dep_name.clone());
                let nested = self.expand(dep, path)?;
                path.pop();
                entry.push(Value::Array(nested));
            }
            entries.push(Value::Array(entry));
        }

        Ok(entries)
    }
}

fn render<P: PackageNode>(scope: &Scope<'_, P>, root: &P) -> Result<String> {
    let mut path = vec![root.name().to_string()];
    let entries = scope.expand(root, &mut path)?;
    let key = Value::Array(entries).to_string();
    debug!(package = root.name(), %key, "Generated dependency key");
    Ok(key)
}

/// Builds dependency keys. Stateless; safe to share across threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyKeyGenerator;

impl DependencyKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Key for `package_name`, resolving names against the manifest's
    /// compiled package list.
    pub fn generate_from_manifest(
        &self,
        package_name: &str,
        compiled_packages: &[CompiledPackageSpec],
    ) -> Result<String> {
        let scope = Scope::build(compiled_packages)?;
        let root = scope
            .get(package_name)
            .ok_or_else(|| DependencyKeyError::UnknownPackage(package_name.to_string()))?;
        render(&scope, root)
    }

    /// Key for a persisted package, resolving names only against the
    /// packages of `release_version`.
    pub fn generate_from_models(
        &self,
        package: &Package,
        release_version: &ReleaseVersion,
    ) -> Result<String> {
        let scope = Scope::build(&release_version.packages)?;
        render(&scope, package)
    }
}
