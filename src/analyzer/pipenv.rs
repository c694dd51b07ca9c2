use async_trait::async_trait;
use serde::Deserialize;

use crate::graph::{self, DepTree};
use crate::models::{Deps, EcosystemType, Module};

use super::{run_tool, AnalyzeError, Analyzer, AnalyzerContext, IgnoreList};

const GRAPH_ARGS: [&str; 2] = ["graph", "--json-tree"];

/// One node of `pipenv graph --json-tree` output.
#[derive(Debug, Deserialize)]
struct PipenvNode {
    package_name: String,
    installed_version: String,
    /// `null` or `"Any"` when unconstrained.
    #[serde(default)]
    required_version: Option<String>,
    #[serde(default)]
    dependencies: Vec<PipenvNode>,
}

impl From<PipenvNode> for DepTree {
    fn from(node: PipenvNode) -> Self {
        DepTree::new(node.package_name, node.installed_version)
            .with_requirement(node.required_version.unwrap_or_default())
            .with_children(node.dependencies.into_iter().map(DepTree::from).collect())
    }
}

/// Analyzer for Python projects managed by Pipenv.
pub struct PipenvAnalyzer {
    module: Module,
    ctx: AnalyzerContext,
}

impl PipenvAnalyzer {
    pub fn new(module: Module, ctx: AnalyzerContext) -> Self {
        Self { module, ctx }
    }

    pub fn boxed(module: Module, ctx: AnalyzerContext) -> Box<dyn Analyzer> {
        Box::new(Self::new(module, ctx))
    }
}

#[async_trait]
impl Analyzer for PipenvAnalyzer {
    fn module(&self) -> &Module {
        &self.module
    }

    async fn analyze(&self) -> Result<Deps, AnalyzeError> {
        let dir = self.ctx.module_dir(&self.module);
        let out = run_tool("pipenv", &GRAPH_ARGS, &dir, self.ctx.timeout).await?;
        deps_from_output(&out, &IgnoreList::new(&self.module.ignore))
    }
}

fn parse_graph(output: &str) -> Result<Vec<DepTree>, AnalyzeError> {
    let nodes: Vec<PipenvNode> = serde_json::from_str(output).map_err(|source| AnalyzeError::Parse {
        command: format!("pipenv {}", GRAPH_ARGS.join(" ")),
        source,
    })?;
    Ok(nodes.into_iter().map(DepTree::from).collect())
}

fn deps_from_output(output: &str, ignore: &IgnoreList) -> Result<Deps, AnalyzeError> {
    let mut roots = parse_graph(output)?;
    graph::prune_roots(&mut roots, &|name| ignore.is_ignored(name));
    Ok(graph::normalize(EcosystemType::Pipenv, &roots)?)
}
