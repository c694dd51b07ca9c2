use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::{EcosystemType, Module};

/// How far below the project root manifests are looked for.
const MAX_DEPTH: usize = 4;

/// Directories that hold installed or generated code rather than modules.
const SKIPPED_DIRS: [&str; 5] = ["node_modules", "vendor", "target", "bower_components", "__pycache__"];

/// Manifest file name to ecosystem, checked in this order within a directory.
const MANIFESTS: [(&str, EcosystemType); 8] = [
    ("Pipfile", EcosystemType::Pipenv),
    ("package.json", EcosystemType::Npm),
    ("composer.json", EcosystemType::Composer),
    ("Cargo.toml", EcosystemType::Cargo),
    ("pom.xml", EcosystemType::Maven),
    ("build.gradle", EcosystemType::Gradle),
    ("build.gradle.kts", EcosystemType::Gradle),
    ("go.mod", EcosystemType::Go),
];

/// Walk `root` and return a module for every recognized manifest.
///
/// Paths in the returned modules are relative to `root`. Cargo manifests
/// below another Cargo manifest are workspace members and are covered by
/// the outer module.
pub fn discover_modules(root: &Path) -> Result<Vec<Module>> {
    let mut modules: Vec<Module> = Vec::new();
    let mut pending = vec![(PathBuf::new(), 0usize)];

    while let Some((relative, depth)) = pending.pop() {
        let dir = root.join(&relative);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if relative.as_os_str().is_empty() => {
                return Err(e).with_context(|| format!("Failed to read {}", root.display()));
            }
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };

        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && depth < MAX_DEPTH
                && !name.starts_with('.')
                && !SKIPPED_DIRS.contains(&name.as_str())
            {
                subdirs.push(relative.join(&name));
            }
        }

        let mut seen_gradle = false;
        for (manifest, ecosystem) in MANIFESTS {
            if !dir.join(manifest).is_file() {
                continue;
            }
            if ecosystem == EcosystemType::Gradle && std::mem::replace(&mut seen_gradle, true) {
                continue;
            }
            if ecosystem == EcosystemType::Cargo && covered_by_cargo_workspace(&modules, &relative) {
                continue;
            }
            modules.push(Module {
                name: module_name(root, &relative),
                ecosystem,
                target: relative.join(manifest),
                path: relative.clone(),
                ignore: Vec::new(),
            });
        }

        // Reverse so the stack pops directories in name order.
        subdirs.sort();
        pending.extend(subdirs.into_iter().rev().map(|d| (d, depth + 1)));
    }

    Ok(modules)
}

fn covered_by_cargo_workspace(modules: &[Module], dir: &Path) -> bool {
    modules
        .iter()
        .any(|m| m.ecosystem == EcosystemType::Cargo && dir.starts_with(&m.path))
}

fn module_name(root: &Path, relative: &Path) -> String {
    if relative.as_os_str().is_empty() {
        root.canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| ".".to_string())
    } else {
        relative.to_string_lossy().replace('\\', "/")
    }
}
