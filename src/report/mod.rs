//! Output for people ([`terminal`]) and for machines (JSON).
//!
//! Saved analyses are JSON arrays of [`SourceUnit`]s, the same payload
//! `upload` sends, so `analyze --output` and `upload --file` round-trip.

pub mod terminal;

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::analyzer::ModuleOutcome;
use crate::api::{Issue, SourceUnit};
use crate::models::{BuildStatus, Graph};

/// Path meaning "standard output" for `--output`.
pub const STDOUT: &str = "-";

/// Latest build of a project, as shown by `report`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub locator: String,
    pub status: String,
    pub issues: Vec<Issue>,
}

impl BuildReport {
    pub fn new(locator: String, status: BuildStatus, issues: Vec<Issue>) -> Self {
        Self {
            locator,
            status: status.to_string(),
            issues,
        }
    }

    pub fn blocking(&self) -> usize {
        self.issues.iter().filter(|i| i.is_blocking()).count()
    }
}

/// One source unit per successfully analyzed module.
pub fn source_units(outcomes: &[ModuleOutcome]) -> Vec<SourceUnit> {
    outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok().map(|deps| SourceUnit::new(&o.module, deps)))
        .collect()
}

/// All packages across modules; a package shared by modules appears once.
pub fn merged_graph(outcomes: &[ModuleOutcome]) -> Graph {
    let mut graph = Graph::new();
    for deps in outcomes.iter().filter_map(|o| o.result.as_ref().ok()) {
        graph.merge(&deps.transitive);
    }
    graph
}

/// Write `value` as pretty JSON to `output`, or to stdout when it is [`STDOUT`].
pub fn write_json<T: Serialize + ?Sized>(value: &T, output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON output")?;
    if output == Path::new(STDOUT) {
        println!("{json}");
        return Ok(());
    }
    std::fs::write(output, json).with_context(|| format!("Failed to write {}", output.display()))
}

/// Read an analysis saved by `analyze --output`.
pub fn read_source_units(path: &Path) -> Result<Vec<SourceUnit>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not a saved analysis", path.display()))
}
