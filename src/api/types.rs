//! Wire types for the service's CLI API.

use serde::{Deserialize, Serialize};

use crate::locator::Locator;
use crate::models::{Deps, EcosystemType, Module};

/// `GET organization`
#[derive(Debug, Clone, Deserialize)]
pub struct Organization {
    #[serde(rename = "organizationId", alias = "organizationID", alias = "OrganizationID")]
    pub organization_id: u64,
}

/// `GET builds/{locator}/latest_build`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildResponse {
    #[serde(default, alias = "Task")]
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    #[serde(default, alias = "Status")]
    pub status: String,
}

/// `GET builds/{locator}/issues`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuesResponse {
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// A policy violation reported for a build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: u64,
    /// e.g. `policy_flag`, `policy_conflict`, `vulnerability`.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Locator of the offending dependency.
    #[serde(default, rename = "revisionId")]
    pub revision_id: String,
    #[serde(default)]
    pub resolved: bool,
}

impl Issue {
    /// Unresolved issues fail the build.
    pub fn is_blocking(&self) -> bool {
        !self.resolved
    }
}

/// `POST builds/custom` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Extra metadata attached to an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub title: Option<String>,
    pub branch: Option<String>,
}

/// One analyzed module as the service ingests it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub name: String,
    #[serde(rename = "type")]
    pub ecosystem: EcosystemType,
    pub manifest: String,
    pub build: SourceUnitBuild,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnitBuild {
    pub artifact: String,
    pub succeeded: bool,
    /// Locators of the direct dependencies.
    pub imports: Vec<String>,
    pub dependencies: Vec<SourceUnitDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceUnitDependency {
    pub locator: String,
    pub imports: Vec<String>,
}

impl SourceUnit {
    pub fn new(module: &Module, deps: &Deps) -> Self {
        let locator = |id| Locator::for_package(id).to_string();
        Self {
            name: module.name.clone(),
            ecosystem: module.ecosystem,
            manifest: module.target.to_string_lossy().into_owned(),
            build: SourceUnitBuild {
                artifact: "default".to_string(),
                succeeded: true,
                imports: deps.direct.iter().map(|i| locator(&i.resolved)).collect(),
                dependencies: deps
                    .transitive
                    .packages()
                    .map(|p| SourceUnitDependency {
                        locator: locator(&p.id),
                        imports: p.imports.iter().map(|i| locator(&i.resolved)).collect(),
                    })
                    .collect(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{normalize, DepTree};
    use std::path::PathBuf;

    #[test]
    fn test_build_response_accepts_either_case() {
        let lower: BuildResponse = serde_json::from_str(r#"{"task":{"status":"RUNNING"}}"#).unwrap();
        assert_eq!(lower.task.unwrap().status, "RUNNING");

        let upper: BuildResponse = serde_json::from_str(r#"{"ID":0,"Error":null,"Task":{"Status":"SUCCEEDED"}}"#).unwrap();
        assert_eq!(upper.task.unwrap().status, "SUCCEEDED");

        let empty: BuildResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.task.is_none());
    }

    #[test]
    fn test_organization() {
        let org: Organization = serde_json::from_str(r#"{"organizationId": 42}"#).unwrap();
        assert_eq!(org.organization_id, 42);
        let org: Organization = serde_json::from_str(r#"{"OrganizationID": 3}"#).unwrap();
        assert_eq!(org.organization_id, 3);
    }

    #[test]
    fn test_issues() {
        let issues: IssuesResponse = serde_json::from_str(
            r#"{"count": 2, "issues": [
                {"id": 1, "type": "policy_flag", "revisionId": "npm+left-pad$1.0.0", "resolved": false},
                {"id": 2, "type": "policy_conflict", "revisionId": "npm+gpl-thing$2.0.0", "resolved": true}
            ]}"#,
        )
        .unwrap();
        assert_eq!(issues.count, 2);
        assert!(issues.issues[0].is_blocking());
        assert!(!issues.issues[1].is_blocking());

        let none: IssuesResponse = serde_json::from_str(r#"{"Task":{"Status":"SUCCEEDED"}}"#).unwrap();
        assert!(none.issues.is_empty());
    }

    #[test]
    fn test_source_unit_from_deps() {
        let module = Module {
            name: "web".to_string(),
            ecosystem: EcosystemType::Npm,
            target: PathBuf::from("web/package.json"),
            path: PathBuf::from("web"),
            ignore: Vec::new(),
        };
        let roots = vec![DepTree::new("@babel/core", "7.20.0")
            .with_requirement("^7.0.0")
            .with_children(vec![DepTree::new("debug", "4.3.4")])];
        let deps = normalize(EcosystemType::Npm, &roots).unwrap();

        let unit = SourceUnit::new(&module, &deps);
        assert_eq!(unit.manifest, "web/package.json");
        assert_eq!(unit.build.imports, vec!["npm+@babel%2Fcore$7.20.0".to_string()]);
        assert_eq!(unit.build.dependencies.len(), 2);
        let babel = unit
            .build
            .dependencies
            .iter()
            .find(|d| d.locator == "npm+@babel%2Fcore$7.20.0")
            .unwrap();
        assert_eq!(babel.imports, vec!["npm+debug$4.3.4".to_string()]);

        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["type"], "npm");
        assert_eq!(json["build"]["dependencies"].as_array().unwrap().len(), 2);
        let back: SourceUnit = serde_json::from_value(json).unwrap();
        assert_eq!(back, unit);
    }
}
