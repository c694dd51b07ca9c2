//! Ecosystem analyzers and the registry that picks one per [`Module`].
//!
//! Every analyzer runs its ecosystem's own resolution tool, parses the
//! output into [`DepTree`](crate::graph::DepTree)s, drops ignored packages,
//! and hands the result to [`graph::normalize`](crate::graph::normalize).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::graph::NormalizeError;
use crate::models::{Deps, EcosystemType, Module};

pub mod cargo;
pub mod composer;
pub mod npm;
pub mod pipenv;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("no analyzer is registered for `{0}` modules")]
    UnsupportedEcosystem(EcosystemType),
    #[error("`{tool}` was not found on PATH")]
    ToolNotFound { tool: String },
    #[error("`{command}` did not finish within {}s", timeout.as_secs())]
    ToolTimedOut { command: String, timeout: Duration },
    #[error("`{command}` exited with {status}: {stderr}")]
    ToolFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("could not parse `{command}` output: {source}")]
    Parse {
        command: String,
        source: serde_json::Error,
    },
    #[error("could not parse ecosystem tool output: {0}")]
    Malformed(#[from] NormalizeError),
    #[error("could not read {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },
    #[error("analysis task for module `{module}` crashed: {reason}")]
    Crashed { module: String, reason: String },
}

/// Settings shared by every analyzer in one run.
#[derive(Debug, Clone)]
pub struct AnalyzerContext {
    /// Project root; module paths are relative to it.
    pub root: PathBuf,
    /// Limit on each ecosystem tool invocation.
    pub timeout: Duration,
}

impl AnalyzerContext {
    pub fn module_dir(&self, module: &Module) -> PathBuf {
        self.root.join(&module.path)
    }
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    fn module(&self) -> &Module;

    /// Resolve the module's dependencies into direct imports and a graph.
    async fn analyze(&self) -> Result<Deps, AnalyzeError>;

    /// Check the ecosystem tool is installed; returns its version line.
    async fn check_tool(&self, ctx: &AnalyzerContext) -> Result<String, AnalyzeError> {
        let tool = self.module().ecosystem.tool();
        let out = run_tool(tool, &["--version"], &ctx.module_dir(self.module()), ctx.timeout).await?;
        Ok(out.lines().next().unwrap_or_default().trim().to_string())
    }
}

type Constructor = fn(Module, AnalyzerContext) -> Box<dyn Analyzer>;
type Selector = fn(&Module, &AnalyzerContext) -> Result<Box<dyn Analyzer>, AnalyzeError>;

/// One entry per supported ecosystem. Adding an ecosystem means adding a row.
static REGISTRY: &[(EcosystemType, Constructor)] = &[
    (EcosystemType::Pipenv, pipenv::PipenvAnalyzer::boxed),
    (EcosystemType::Npm, npm::NpmAnalyzer::boxed),
    (EcosystemType::Composer, composer::ComposerAnalyzer::boxed),
    (EcosystemType::Cargo, cargo::CargoAnalyzer::boxed),
];

/// Pick the analyzer registered for `module`'s ecosystem.
pub fn select(module: &Module, ctx: &AnalyzerContext) -> Result<Box<dyn Analyzer>, AnalyzeError> {
    REGISTRY
        .iter()
        .find(|(ecosystem, _)| *ecosystem == module.ecosystem)
        .map(|(_, construct)| construct(module.clone(), ctx.clone()))
        .ok_or(AnalyzeError::UnsupportedEcosystem(module.ecosystem))
}

pub fn is_supported(ecosystem: EcosystemType) -> bool {
    REGISTRY.iter().any(|(e, _)| *e == ecosystem)
}

/// The result of analyzing one module.
#[derive(Debug)]
pub struct ModuleOutcome {
    pub module: Module,
    pub result: Result<Deps, AnalyzeError>,
}

/// Analyze every module concurrently. A failing module does not affect the others.
pub async fn analyze_modules(modules: &[Module], ctx: &AnalyzerContext) -> Vec<ModuleOutcome> {
    analyze_with(select, modules, ctx).await
}

async fn analyze_with(select: Selector, modules: &[Module], ctx: &AnalyzerContext) -> Vec<ModuleOutcome> {
    let handles: Vec<_> = modules
        .iter()
        .map(|module| {
            let module = module.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                info!(module = %module.name, ecosystem = %module.ecosystem, "analyzing module");
                let result = match select(&module, &ctx) {
                    Ok(analyzer) => analyzer.analyze().await,
                    Err(e) => Err(e),
                };
                match &result {
                    Ok(deps) => debug!(
                        module = %module.name,
                        direct = deps.direct.len(),
                        packages = deps.transitive.len(),
                        "module analyzed"
                    ),
                    Err(e) => warn!(module = %module.name, error = %e, "skipping module"),
                }
                result
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .zip(modules)
        .map(|(joined, module)| ModuleOutcome {
            module: module.clone(),
            result: joined.unwrap_or_else(|e| {
                Err(AnalyzeError::Crashed {
                    module: module.name.clone(),
                    reason: e.to_string(),
                })
            }),
        })
        .collect()
}

/// A module and its tool check: the tool's version line, or why it can't run.
pub type ToolCheck = (Module, Result<String, AnalyzeError>);

/// Check every module's ecosystem tool concurrently.
pub async fn check_tools(modules: &[Module], ctx: &AnalyzerContext) -> Vec<ToolCheck> {
    join_all(modules.iter().map(|module| async move {
        let check = match select(module, ctx) {
            Ok(analyzer) => analyzer.check_tool(ctx).await,
            Err(e) => Err(e),
        };
        (module.clone(), check)
    }))
    .await
}

/// The first failed check, ignoring modules with no analyzer since analysis skips them too.
pub fn first_tool_failure(checks: Vec<ToolCheck>) -> Option<AnalyzeError> {
    checks
        .into_iter()
        .filter_map(|(_, check)| check.err())
        .find(|e| !matches!(e, AnalyzeError::UnsupportedEcosystem(_)))
}

/// Package-name patterns to leave out of a module's graph.
///
/// A trailing `*` marks a prefix entry: `orange*` matches `orange` and
/// `orange/blood`, but not `oranges`. Other entries match exactly.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    exact: Vec<String>,
    prefixes: Vec<String>,
}

impl IgnoreList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut list = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            match pattern.strip_suffix('*') {
                Some(prefix) => list.prefixes.push(prefix.trim_end_matches('/').to_string()),
                None => list.exact.push(pattern.to_string()),
            }
        }
        list
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.exact.iter().any(|e| e == name)
            || self.prefixes.iter().any(|prefix| {
                name.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
    }
}

/// Run an ecosystem tool in `dir` and return its stdout. Fails on a non-zero exit.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    dir: &Path,
    timeout: Duration,
) -> Result<String, AnalyzeError> {
    let (output, command) = exec(program, args, dir, timeout).await?;
    if !output.status.success() {
        return Err(AnalyzeError::ToolFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Like [`run_tool`], but accepts a non-zero exit as long as stdout is non-empty.
///
/// `npm ls` reports problems (extraneous or missing packages) through its exit
/// code while still printing the full tree.
pub async fn run_tool_lenient(
    program: &str,
    args: &[&str],
    dir: &Path,
    timeout: Duration,
) -> Result<String, AnalyzeError> {
    let (output, command) = exec(program, args, dir, timeout).await?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stdout.trim().is_empty() {
            return Err(AnalyzeError::ToolFailed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }
        warn!(command = %command, status = %output.status, stderr = %stderr, "tool reported problems");
    }
    Ok(stdout)
}

async fn exec(
    program: &str,
    args: &[&str],
    dir: &Path,
    timeout: Duration,
) -> Result<(std::process::Output, String), AnalyzeError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    if !dir.is_dir() {
        return Err(AnalyzeError::Read {
            path: dir.to_path_buf(),
            reason: "module directory does not exist".to_string(),
        });
    }

    debug!(command = %command, dir = %dir.display(), "running ecosystem tool");
    let child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Err(_) => Err(AnalyzeError::ToolTimedOut { command, timeout }),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(AnalyzeError::ToolNotFound {
            tool: program.to_string(),
        }),
        Ok(Err(source)) => Err(AnalyzeError::Spawn { command, source }),
        Ok(Ok(output)) => Ok((output, command)),
    }
}

/// Read a manifest file next to the module (e.g. `package.json`) as JSON.
pub(crate) fn read_manifest(path: &Path) -> Result<serde_json::Value, AnalyzeError> {
    let read_err = |reason: String| AnalyzeError::Read {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| read_err(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| read_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(ecosystem: EcosystemType) -> Module {
        Module {
            name: "fixture".to_string(),
            ecosystem,
            target: PathBuf::from("manifest"),
            path: PathBuf::from("."),
            ignore: Vec::new(),
        }
    }

    fn ctx() -> AnalyzerContext {
        AnalyzerContext {
            root: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_ignore_list() {
        let ignore = IgnoreList::new(&["apple", "orange*"]);

        assert!(ignore.is_ignored("apple"));
        assert!(ignore.is_ignored("orange"));
        assert!(ignore.is_ignored("orange/blood"));
        assert!(!ignore.is_ignored("apple/fuji"));
        assert!(!ignore.is_ignored("oranges"));
        assert!(!ignore.is_ignored("pear"));
    }

    #[test]
    fn test_ignore_list_scoped_prefix() {
        let ignore = IgnoreList::new(&["@internal/*"]);
        assert!(ignore.is_ignored("@internal/ui"));
        assert!(ignore.is_ignored("@internal"));
        assert!(!ignore.is_ignored("@internals/ui"));
        assert!(!IgnoreList::new::<&str>(&[]).is_ignored(""));
    }

    #[test]
    fn test_select_registered_ecosystems() {
        for ecosystem in [
            EcosystemType::Pipenv,
            EcosystemType::Npm,
            EcosystemType::Composer,
            EcosystemType::Cargo,
        ] {
            let analyzer = select(&module(ecosystem), &ctx()).unwrap();
            assert_eq!(analyzer.module().ecosystem, ecosystem);
            assert!(is_supported(ecosystem));
        }
    }

    #[test]
    fn test_select_unsupported_ecosystem() {
        for ecosystem in [EcosystemType::Maven, EcosystemType::Gradle, EcosystemType::Go] {
            assert!(matches!(
                select(&module(ecosystem), &ctx()),
                Err(AnalyzeError::UnsupportedEcosystem(e)) if e == ecosystem
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_tool_not_found() {
        let err = run_tool(
            "graphcheckr-no-such-tool",
            &["--version"],
            &std::env::temp_dir(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalyzeError::ToolNotFound { tool } if tool == "graphcheckr-no-such-tool"));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let err = run_tool("sh", &["-c", "true"], Path::new("/no/such/dir"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Read { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_timeout_kills_process() {
        let started = std::time::Instant::now();
        let err = run_tool("sleep", &["10"], &std::env::temp_dir(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::ToolTimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tool_failure_and_lenient_mode() {
        let dir = std::env::temp_dir();
        let strict = run_tool("sh", &["-c", "echo '{}'; exit 1"], &dir, Duration::from_secs(5)).await;
        assert!(matches!(strict, Err(AnalyzeError::ToolFailed { .. })));

        let lenient = run_tool_lenient("sh", &["-c", "echo '{}'; exit 1"], &dir, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(lenient.trim(), "{}");

        let empty = run_tool_lenient("sh", &["-c", "exit 1"], &dir, Duration::from_secs(5)).await;
        assert!(matches!(empty, Err(AnalyzeError::ToolFailed { .. })));
    }

    /// Succeeds for modules named `ok`; anything else acts as if its tool is missing.
    struct Stub(Module);

    #[async_trait]
    impl Analyzer for Stub {
        fn module(&self) -> &Module {
            &self.0
        }

        async fn analyze(&self) -> Result<Deps, AnalyzeError> {
            if self.0.name != "ok" {
                return Err(AnalyzeError::ToolNotFound {
                    tool: self.0.ecosystem.tool().to_string(),
                });
            }
            let roots = [crate::graph::DepTree::new("requests", "2.28.1")];
            Ok(crate::graph::normalize(self.0.ecosystem, &roots)?)
        }
    }

    fn stub(module: &Module, _: &AnalyzerContext) -> Result<Box<dyn Analyzer>, AnalyzeError> {
        Ok(Box::new(Stub(module.clone())))
    }

    #[tokio::test]
    async fn test_missing_tool_skips_only_its_module() {
        let named = |name: &str| Module {
            name: name.to_string(),
            ..module(EcosystemType::Pipenv)
        };
        let modules = vec![named("broken"), named("ok")];
        let outcomes = analyze_with(stub, &modules, &ctx()).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].module.name, "broken");
        assert!(matches!(&outcomes[0].result, Err(AnalyzeError::ToolNotFound { tool }) if tool == "pipenv"));
        assert_eq!(outcomes[1].module.name, "ok");
        assert_eq!(outcomes[1].result.as_ref().unwrap().transitive.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_checks_skip_unsupported_modules() {
        let checks = check_tools(&[module(EcosystemType::Go)], &ctx()).await;
        assert!(matches!(checks[0].1, Err(AnalyzeError::UnsupportedEcosystem(EcosystemType::Go))));
        assert!(first_tool_failure(checks).is_none());

        let checks = vec![
            (module(EcosystemType::Maven), Err(AnalyzeError::UnsupportedEcosystem(EcosystemType::Maven))),
            (module(EcosystemType::Npm), Ok("10.2.4".to_string())),
            (
                module(EcosystemType::Pipenv),
                Err(AnalyzeError::ToolNotFound {
                    tool: "pipenv".to_string(),
                }),
            ),
        ];
        assert!(matches!(first_tool_failure(checks), Some(AnalyzeError::ToolNotFound { .. })));
    }

    #[tokio::test]
    async fn test_unsupported_module_does_not_stop_batch() {
        let modules = vec![module(EcosystemType::Go), module(EcosystemType::Maven)];
        let outcomes = analyze_modules(&modules, &ctx()).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| matches!(o.result, Err(AnalyzeError::UnsupportedEcosystem(_)))));
    }
}
