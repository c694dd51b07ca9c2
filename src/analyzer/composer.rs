use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::graph::{self, DepTree};
use crate::models::{Deps, EcosystemType, Module};

use super::{read_manifest, run_tool, AnalyzeError, Analyzer, AnalyzerContext, IgnoreList};

const SHOW_ARGS: [&str; 2] = ["show", "--format=json"];
const TREE_ARGS: [&str; 3] = ["show", "--tree", "--format=json"];

/// `composer show --format=json`: every installed package with its resolved version.
#[derive(Debug, Deserialize)]
struct ShowOutput {
    #[serde(default)]
    installed: Vec<InstalledPackage>,
}

#[derive(Debug, Deserialize)]
struct InstalledPackage {
    name: String,
    version: String,
}

/// `composer show --tree --format=json`: root requirements and their nested requirements.
#[derive(Debug, Deserialize)]
struct TreeOutput {
    #[serde(default)]
    installed: Vec<TreeNode>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    name: String,
    /// Installed version at the top level, the requested constraint below it.
    #[serde(default)]
    version: String,
    #[serde(default)]
    requires: Vec<TreeNode>,
}

/// Analyzer for PHP projects managed by Composer.
pub struct ComposerAnalyzer {
    module: Module,
    ctx: AnalyzerContext,
}

impl ComposerAnalyzer {
    pub fn new(module: Module, ctx: AnalyzerContext) -> Self {
        Self { module, ctx }
    }

    pub fn boxed(module: Module, ctx: AnalyzerContext) -> Box<dyn Analyzer> {
        Box::new(Self::new(module, ctx))
    }
}

#[async_trait]
impl Analyzer for ComposerAnalyzer {
    fn module(&self) -> &Module {
        &self.module
    }

    async fn analyze(&self) -> Result<Deps, AnalyzeError> {
        let dir = self.ctx.module_dir(&self.module);
        let manifest = dir.join("composer.json");
        let declared = if manifest.exists() {
            declared_constraints(&read_manifest(&manifest)?)
        } else {
            HashMap::new()
        };

        let (show, tree) = tokio::try_join!(
            run_tool("composer", &SHOW_ARGS, &dir, self.ctx.timeout),
            run_tool("composer", &TREE_ARGS, &dir, self.ctx.timeout),
        )?;
        deps_from_output(&show, &tree, &declared, &IgnoreList::new(&self.module.ignore))
    }
}

/// Platform requirements (the PHP runtime and its extensions) are not packages.
fn is_platform_package(name: &str) -> bool {
    matches!(name, "php" | "php-64bit" | "php-ipv6" | "php-zts" | "php-debug" | "hhvm" | "composer")
        || name.starts_with("ext-")
        || name.starts_with("lib-")
        || (name.starts_with("composer-") && name.ends_with("-api"))
}

fn declared_constraints(composer_json: &Value) -> HashMap<String, String> {
    let mut constraints = HashMap::new();
    for section in ["require", "require-dev"] {
        if let Some(reqs) = composer_json.get(section).and_then(|v| v.as_object()) {
            for (name, constraint) in reqs {
                if let Some(constraint) = constraint.as_str() {
                    constraints.entry(name.clone()).or_insert_with(|| constraint.to_string());
                }
            }
        }
    }
    constraints
}

fn parse<'a, T: Deserialize<'a>>(output: &'a str, args: &[&str]) -> Result<T, AnalyzeError> {
    serde_json::from_str(output).map_err(|source| AnalyzeError::Parse {
        command: format!("composer {}", args.join(" ")),
        source,
    })
}

fn deps_from_output(
    show: &str,
    tree: &str,
    declared: &HashMap<String, String>,
    ignore: &IgnoreList,
) -> Result<Deps, AnalyzeError> {
    let show: ShowOutput = parse(show, &SHOW_ARGS)?;
    let tree: TreeOutput = parse(tree, &TREE_ARGS)?;

    let resolved: HashMap<String, String> = show
        .installed
        .into_iter()
        .map(|p| (p.name, p.version))
        .collect();

    let mut roots: Vec<DepTree> = tree
        .installed
        .into_iter()
        .map(|node| {
            let version = resolved.get(&node.name).cloned().unwrap_or(node.version);
            let requirement = declared.get(&node.name).cloned().unwrap_or_default();
            DepTree::new(node.name, version)
                .with_requirement(requirement)
                .with_children(nested(node.requires, &resolved))
        })
        .collect();

    graph::prune_roots(&mut roots, &|name| is_platform_package(name) || ignore.is_ignored(name));
    Ok(graph::normalize(EcosystemType::Composer, &roots)?)
}

fn nested(nodes: Vec<TreeNode>, resolved: &HashMap<String, String>) -> Vec<DepTree> {
    nodes
        .into_iter()
        .map(|node| {
            let version = resolved.get(&node.name).cloned().unwrap_or_default();
            DepTree::new(node.name, version)
                .with_requirement(node.version)
                .with_children(nested(node.requires, resolved))
        })
        .collect()
}
