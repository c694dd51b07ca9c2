use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A package manager / toolchain whose dependency output we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EcosystemType {
    Pipenv,
    Npm,
    Composer,
    Cargo,
    Maven,
    Gradle,
    Go,
}

impl EcosystemType {
    pub const ALL: [EcosystemType; 7] = [
        EcosystemType::Pipenv,
        EcosystemType::Npm,
        EcosystemType::Composer,
        EcosystemType::Cargo,
        EcosystemType::Maven,
        EcosystemType::Gradle,
        EcosystemType::Go,
    ];

    /// Stable key used in config files and as the fetcher of dependency locators.
    pub fn key(&self) -> &'static str {
        match self {
            EcosystemType::Pipenv => "pipenv",
            EcosystemType::Npm => "npm",
            EcosystemType::Composer => "composer",
            EcosystemType::Cargo => "cargo",
            EcosystemType::Maven => "maven",
            EcosystemType::Gradle => "gradle",
            EcosystemType::Go => "go",
        }
    }

    /// Executable that resolves dependencies for this ecosystem.
    pub fn tool(&self) -> &'static str {
        match self {
            EcosystemType::Pipenv => "pipenv",
            EcosystemType::Npm => "npm",
            EcosystemType::Composer => "composer",
            EcosystemType::Cargo => "cargo",
            EcosystemType::Maven => "mvn",
            EcosystemType::Gradle => "gradle",
            EcosystemType::Go => "go",
        }
    }
}

impl std::fmt::Display for EcosystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for EcosystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EcosystemType::ALL
            .into_iter()
            .find(|e| e.key() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Identity of one resolved package. All three fields take part in equality.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId {
    pub ecosystem: EcosystemType,
    pub name: String,
    /// Empty for an unpinned root.
    pub revision: String,
}

impl PackageId {
    pub fn new(ecosystem: EcosystemType, name: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            revision: revision.into(),
        }
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}${}", self.ecosystem, self.name, self.revision)
    }
}

/// An edge from a consumer to a resolved dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    /// Declared version constraint. Empty for intra-graph edges.
    pub target: String,
    pub resolved: PackageId,
}

impl Import {
    pub fn new(target: impl Into<String>, resolved: PackageId) -> Self {
        Self {
            target: target.into(),
            resolved,
        }
    }
}

/// A package and its direct children in the resolved tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: PackageId,
    pub imports: Vec<Import>,
}

/// Canonical dependency graph. Keys are unique and every import inside the
/// graph resolves to a key. Uploads carry it as source units, never directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    packages: BTreeMap<PackageId, Package>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &PackageId) -> bool {
        self.packages.contains_key(id)
    }

    pub fn get(&self, id: &PackageId) -> Option<&Package> {
        self.packages.get(id)
    }

    /// Insert `package` unless its id is already present. Returns whether it was inserted.
    pub fn insert(&mut self, package: Package) -> bool {
        match self.packages.entry(package.id.clone()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(package);
                true
            }
        }
    }

    /// Fold `other` into `self`; ids already present keep their first-seen imports.
    pub fn merge(&mut self, other: &Graph) {
        for package in other.packages.values() {
            self.insert(package.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }
}

/// Output of one module's analysis: its direct imports and full graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deps {
    pub direct: Vec<Import>,
    pub transitive: Graph,
}

/// One discovered analysis unit, usually a single manifest file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(rename = "type")]
    pub ecosystem: EcosystemType,
    /// Manifest file, relative to the project root.
    pub target: PathBuf,
    /// Directory the ecosystem tool runs in, relative to the project root.
    pub path: PathBuf,
    /// Package name patterns to leave out of the graph (`foo*` is a prefix match).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

/// Remote build state as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl BuildStatus {
    /// Classify the service's task status string.
    pub fn from_task_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "SUCCEEDED" => BuildStatus::Succeeded,
            "FAILED" => BuildStatus::Failed,
            "RUNNING" => BuildStatus::Running,
            "CREATED" | "ASSIGNED" | "PENDING" | "QUEUED" => BuildStatus::Pending,
            _ => BuildStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStatus::Succeeded | BuildStatus::Failed)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Pending => write!(f, "pending"),
            BuildStatus::Running => write!(f, "running"),
            BuildStatus::Succeeded => write!(f, "succeeded"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, rev: &str, children: &[&str]) -> Package {
        Package {
            id: PackageId::new(EcosystemType::Npm, name, rev),
            imports: children
                .iter()
                .map(|c| Import::new("", PackageId::new(EcosystemType::Npm, *c, "1.0.0")))
                .collect(),
        }
    }

    #[test]
    fn test_package_id_equality_uses_all_fields() {
        let a = PackageId::new(EcosystemType::Npm, "left-pad", "1.0.0");
        assert_eq!(a, PackageId::new(EcosystemType::Npm, "left-pad", "1.0.0"));
        assert_ne!(a, PackageId::new(EcosystemType::Npm, "left-pad", "1.0.1"));
        assert_ne!(a, PackageId::new(EcosystemType::Pipenv, "left-pad", "1.0.0"));
    }

    #[test]
    fn test_graph_insert_keeps_first_seen() {
        let mut graph = Graph::new();
        assert!(graph.insert(pkg("a", "1.0.0", &["b"])));
        assert!(!graph.insert(pkg("a", "1.0.0", &[])));
        let a = graph.get(&PackageId::new(EcosystemType::Npm, "a", "1.0.0")).unwrap();
        assert_eq!(a.imports.len(), 1);
    }

    #[test]
    fn test_graph_merge() {
        let mut left = Graph::new();
        left.insert(pkg("a", "1.0.0", &["b"]));
        let mut right = Graph::new();
        right.insert(pkg("a", "1.0.0", &[]));
        right.insert(pkg("c", "2.0.0", &[]));

        left.merge(&right);
        assert_eq!(left.len(), 2);
        let a = left.get(&PackageId::new(EcosystemType::Npm, "a", "1.0.0")).unwrap();
        assert_eq!(a.imports.len(), 1);
    }

    #[test]
    fn test_build_status_classification() {
        assert_eq!(BuildStatus::from_task_status("SUCCEEDED"), BuildStatus::Succeeded);
        assert_eq!(BuildStatus::from_task_status("failed"), BuildStatus::Failed);
        assert_eq!(BuildStatus::from_task_status("RUNNING"), BuildStatus::Running);
        assert_eq!(BuildStatus::from_task_status("CREATED"), BuildStatus::Pending);
        assert_eq!(BuildStatus::from_task_status(""), BuildStatus::Unknown);
        assert!(!BuildStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_ecosystem_keys_round_trip() {
        for eco in EcosystemType::ALL {
            assert_eq!(eco.key().parse::<EcosystemType>(), Ok(eco));
        }
        assert!("bower".parse::<EcosystemType>().is_err());
    }
}
