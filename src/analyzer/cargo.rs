use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::Deserialize;

use crate::graph::{self, DepTree};
use crate::models::{Deps, EcosystemType, Module};

use super::{run_tool, AnalyzeError, Analyzer, AnalyzerContext, IgnoreList};

const METADATA_ARGS: [&str; 2] = ["metadata", "--format-version=1"];

#[derive(Debug, Deserialize)]
struct Metadata {
    packages: Vec<CargoPackage>,
    #[serde(default)]
    workspace_members: Vec<String>,
    resolve: Option<Resolve>,
}

#[derive(Debug, Deserialize)]
struct CargoPackage {
    id: String,
    name: String,
    version: String,
    #[serde(default)]
    dependencies: Vec<CargoDependency>,
}

#[derive(Debug, Deserialize)]
struct CargoDependency {
    name: String,
    req: String,
    #[serde(default)]
    rename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resolve {
    nodes: Vec<ResolveNode>,
    #[serde(default)]
    root: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResolveNode {
    id: String,
    #[serde(default)]
    deps: Vec<NodeDep>,
}

#[derive(Debug, Deserialize)]
struct NodeDep {
    /// Crate name as seen from the dependent, with `-` replaced by `_`.
    name: String,
    pkg: String,
}

/// Analyzer for Rust crates, using the resolve graph from `cargo metadata`.
pub struct CargoAnalyzer {
    module: Module,
    ctx: AnalyzerContext,
}

impl CargoAnalyzer {
    pub fn new(module: Module, ctx: AnalyzerContext) -> Self {
        Self { module, ctx }
    }

    pub fn boxed(module: Module, ctx: AnalyzerContext) -> Box<dyn Analyzer> {
        Box::new(Self::new(module, ctx))
    }
}

#[async_trait]
impl Analyzer for CargoAnalyzer {
    fn module(&self) -> &Module {
        &self.module
    }

    async fn analyze(&self) -> Result<Deps, AnalyzeError> {
        let dir = self.ctx.module_dir(&self.module);
        let out = run_tool("cargo", &METADATA_ARGS, &dir, self.ctx.timeout).await?;
        deps_from_output(&out, &IgnoreList::new(&self.module.ignore))
    }
}

fn deps_from_output(output: &str, ignore: &IgnoreList) -> Result<Deps, AnalyzeError> {
    let metadata: Metadata = serde_json::from_str(output).map_err(|source| AnalyzeError::Parse {
        command: format!("cargo {}", METADATA_ARGS.join(" ")),
        source,
    })?;
    let mut roots = unfold(&metadata);
    graph::prune_roots(&mut roots, &|name| ignore.is_ignored(name));
    Ok(graph::normalize(EcosystemType::Cargo, &roots)?)
}

/// `cargo metadata` already reports a graph. Turn it into the tree shape the
/// normalizer takes, expanding each package id the first time it is reached so
/// the tree stays the size of the graph.
fn unfold(metadata: &Metadata) -> Vec<DepTree> {
    let Some(resolve) = &metadata.resolve else {
        return Vec::new();
    };
    let packages: HashMap<&str, &CargoPackage> =
        metadata.packages.iter().map(|p| (p.id.as_str(), p)).collect();
    let nodes: HashMap<&str, &ResolveNode> = resolve.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    // Nested workspace members are folded into this module, so every member
    // contributes its dependencies. The root package, if any, goes first.
    let mut members: Vec<&str> = resolve.root.iter().map(String::as_str).collect();
    for member in &metadata.workspace_members {
        if !members.contains(&member.as_str()) {
            members.push(member);
        }
    }
    let member_set: HashSet<&str> = members.iter().copied().collect();

    let mut expanded: HashSet<&str> = member_set.clone();
    let mut roots = Vec::new();
    let mut seen_roots = HashSet::new();
    for member in members {
        let (Some(&node), Some(&package)) = (nodes.get(member), packages.get(member)) else {
            continue;
        };
        for dep in &node.deps {
            if member_set.contains(dep.pkg.as_str()) || !seen_roots.insert(dep.pkg.as_str()) {
                continue;
            }
            if let Some(mut tree) = subtree(&dep.pkg, &packages, &nodes, &mut expanded) {
                tree.requirement = declared_req(package, &dep.name).unwrap_or_default();
                roots.push(tree);
            }
        }
    }
    roots
}

fn subtree<'a>(
    id: &'a str,
    packages: &HashMap<&str, &'a CargoPackage>,
    nodes: &HashMap<&str, &'a ResolveNode>,
    expanded: &mut HashSet<&'a str>,
) -> Option<DepTree> {
    let package = packages.get(id)?;
    let mut tree = DepTree::new(package.name.as_str(), package.version.as_str());
    if expanded.insert(id) {
        if let Some(&node) = nodes.get(id) {
            tree.children = node
                .deps
                .iter()
                .filter_map(|dep| subtree(&dep.pkg, packages, nodes, expanded))
                .collect();
        }
    }
    Some(tree)
}

fn declared_req(package: &CargoPackage, extern_name: &str) -> Option<String> {
    package
        .dependencies
        .iter()
        .find(|d| d.rename.as_deref().unwrap_or(&d.name).replace('-', "_") == extern_name)
        .map(|d| d.req.clone())
}
