use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::graph::{self, DepTree};
use crate::models::{Deps, EcosystemType, Module};

use super::{read_manifest, run_tool_lenient, AnalyzeError, Analyzer, AnalyzerContext, IgnoreList};

const LS_ARGS: [&str; 3] = ["ls", "--json", "--all"];
const DECLARED_SECTIONS: [&str; 3] = ["dependencies", "devDependencies", "optionalDependencies"];

/// Top level of `npm ls --json --all`.
#[derive(Debug, Deserialize)]
struct NpmLs {
    #[serde(default)]
    dependencies: BTreeMap<String, NpmNode>,
}

#[derive(Debug, Deserialize)]
struct NpmNode {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    dependencies: BTreeMap<String, NpmNode>,
}

/// Analyzer for Node.js projects, using the tree `npm ls` resolves from `node_modules`.
pub struct NpmAnalyzer {
    module: Module,
    ctx: AnalyzerContext,
}

impl NpmAnalyzer {
    pub fn new(module: Module, ctx: AnalyzerContext) -> Self {
        Self { module, ctx }
    }

    pub fn boxed(module: Module, ctx: AnalyzerContext) -> Box<dyn Analyzer> {
        Box::new(Self::new(module, ctx))
    }
}

#[async_trait]
impl Analyzer for NpmAnalyzer {
    fn module(&self) -> &Module {
        &self.module
    }

    async fn analyze(&self) -> Result<Deps, AnalyzeError> {
        let dir = self.ctx.module_dir(&self.module);
        let manifest = dir.join("package.json");
        let declared = if manifest.exists() {
            declared_ranges(&read_manifest(&manifest)?)
        } else {
            HashMap::new()
        };

        let out = run_tool_lenient("npm", &LS_ARGS, &dir, self.ctx.timeout).await?;
        deps_from_output(&out, &declared, &IgnoreList::new(&self.module.ignore))
    }
}

/// Declared version ranges from a parsed `package.json`.
fn declared_ranges(package_json: &Value) -> HashMap<String, String> {
    let mut ranges = HashMap::new();
    for section in DECLARED_SECTIONS {
        if let Some(pkgs) = package_json.get(section).and_then(|v| v.as_object()) {
            for (name, range) in pkgs {
                if let Some(range) = range.as_str() {
                    ranges.entry(name.clone()).or_insert_with(|| range.to_string());
                }
            }
        }
    }
    ranges
}

fn deps_from_output(
    output: &str,
    declared: &HashMap<String, String>,
    ignore: &IgnoreList,
) -> Result<Deps, AnalyzeError> {
    let ls: NpmLs = serde_json::from_str(output).map_err(|source| AnalyzeError::Parse {
        command: format!("npm {}", LS_ARGS.join(" ")),
        source,
    })?;

    let mut roots = to_trees(ls.dependencies);
    for root in &mut roots {
        if let Some(range) = declared.get(&root.name) {
            root.requirement = range.clone();
        }
    }
    graph::prune_roots(&mut roots, &|name| ignore.is_ignored(name));
    Ok(graph::normalize(EcosystemType::Npm, &roots)?)
}

fn to_trees(nodes: BTreeMap<String, NpmNode>) -> Vec<DepTree> {
    nodes
        .into_iter()
        .filter_map(|(name, node)| match node.version {
            Some(version) if !node.missing => {
                Some(DepTree::new(name, version).with_children(to_trees(node.dependencies)))
            }
            _ => {
                warn!(package = %name, "npm reports package as missing; leaving it out");
                None
            }
        })
        .collect()
}
