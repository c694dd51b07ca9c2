use std::error::Error as _;
use std::path::Path;

use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::analyzer::{AnalyzeError, ModuleOutcome, ToolCheck};
use crate::api::Issue;
use crate::errors::{Error, ErrorKind};
use crate::locator::Locator;
use crate::models::Module;
use crate::verify::{Failure, VerificationResult};

use super::{merged_graph, BuildReport};

const ISSUE_TRACKER: &str = "https://github.com/graphcheckr/graphcheckr/issues";

fn header(title: &str, target: &str) {
    println!("\n {} v{}", "graphcheckr".bold(), env!("CARGO_PKG_VERSION"));
    println!(" {title}: {target}\n");
}

fn table(columns: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

/// Modules written by `init`.
pub fn render_modules(modules: &[Module], config_path: &Path) {
    let mut table = table(&["Module", "Type", "Manifest"]);
    for module in modules {
        table.add_row(vec![
            Cell::new(&module.name),
            Cell::new(module.ecosystem.to_string()),
            Cell::new(module.target.display().to_string()),
        ]);
    }
    println!("{table}");
    println!(
        " {} Wrote {} module(s) to {}",
        "✓".green(),
        modules.len(),
        config_path.display()
    );
}

/// One-line summary of an analysis run.
pub fn summary_line(outcomes: &[ModuleOutcome]) -> String {
    let analyzed = outcomes.iter().filter(|o| o.result.is_ok()).count();
    let failed = outcomes.len() - analyzed;
    format!(
        "Modules: {}  Analyzed: {}  Failed: {}  Packages: {}",
        outcomes.len(),
        analyzed.to_string().green(),
        failed.to_string().red(),
        merged_graph(outcomes).len(),
    )
}

pub fn render_analysis(outcomes: &[ModuleOutcome], root: &Path, quiet: bool) {
    if quiet {
        println!("{}", summary_line(outcomes));
        return;
    }
    header("Analyzing", &root.display().to_string());

    let mut table = table(&["Module", "Type", "Manifest", "Direct", "Packages", "Status"]);
    for outcome in outcomes {
        let module = &outcome.module;
        let (direct, packages, status) = match &outcome.result {
            Ok(deps) => (
                deps.direct.len().to_string(),
                deps.transitive.len().to_string(),
                Cell::new("✓ ok").fg(Color::Green),
            ),
            Err(AnalyzeError::UnsupportedEcosystem(_)) => (
                "-".to_string(),
                "-".to_string(),
                Cell::new("- unsupported").fg(Color::DarkGrey),
            ),
            Err(_) => ("-".to_string(), "-".to_string(), Cell::new("✗ failed").fg(Color::Red)),
        };
        table.add_row(vec![
            Cell::new(&module.name),
            Cell::new(module.ecosystem.to_string()),
            Cell::new(module.target.display().to_string()),
            Cell::new(direct).set_alignment(CellAlignment::Right),
            Cell::new(packages).set_alignment(CellAlignment::Right),
            status.set_alignment(CellAlignment::Center),
        ]);
    }
    println!("{table}");

    for outcome in outcomes {
        if let Err(e) = &outcome.result {
            eprintln!(" {} {}: {}", "[WARN]".yellow().bold(), outcome.module.name, e);
        }
    }
    println!("\n {}\n", summary_line(outcomes));
}

/// Tool checks run by `build`.
pub fn render_tool_checks(checks: &[ToolCheck]) {
    let mut table = table(&["Module", "Tool", "Version"]);
    for (module, check) in checks {
        let version = match check {
            Ok(version) => Cell::new(version).fg(Color::Green),
            Err(AnalyzeError::UnsupportedEcosystem(_)) => Cell::new("- unsupported, skipped").fg(Color::DarkGrey),
            Err(e) => Cell::new(format!("✗ {e}")).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&module.name),
            Cell::new(module.ecosystem.tool()),
            version,
        ]);
    }
    println!("{table}");
}

pub fn render_uploaded(locator: &str, quiet: bool) {
    if quiet {
        println!("{locator}");
        return;
    }
    println!(" {} Uploaded analysis as {}", "✓".green(), locator.bold());
    println!(" Run `graphcheckr test` to wait for the build and check for issues.\n");
}

fn issue_table(issues: &[Issue]) -> Table {
    let mut table = table(&["Id", "Type", "Dependency", "Status"]);
    for issue in issues {
        let status = if issue.resolved {
            Cell::new("resolved").fg(Color::DarkGrey)
        } else {
            Cell::new("open").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(issue.id),
            Cell::new(&issue.kind),
            Cell::new(&issue.revision_id),
            status,
        ]);
    }
    table
}

pub fn render_build_report(report: &BuildReport, quiet: bool) {
    if quiet {
        println!(
            "Build: {}  Issues: {}  Blocking: {}",
            report.status,
            report.issues.len(),
            report.blocking().to_string().red()
        );
        return;
    }
    header("Project", &report.locator);
    println!(" Latest build : {}", report.status.bold());
    if report.issues.is_empty() {
        println!(" {} No issues reported\n", "✓".green());
    } else {
        println!("{}\n", issue_table(&report.issues));
    }
}

pub fn render_verification(locator: &Locator, result: &VerificationResult, quiet: bool) {
    let line = match result {
        VerificationResult::Succeeded => format!("{} Build passed with no open issues", "✓".green()),
        VerificationResult::Failed(Failure::Build) => format!("{} The build failed", "✗".red()),
        VerificationResult::Failed(Failure::Policy(issues)) => {
            format!("{} {} open issue(s) found", "✗".red(), issues.len())
        }
        VerificationResult::TimedOut { last_status } => format!(
            "{} Timed out waiting for the build (last status: {})",
            "⚠".yellow(),
            last_status.map_or_else(|| "none".to_string(), |s| s.to_string())
        ),
    };
    if quiet {
        println!("{line}");
        return;
    }
    header("Testing", &locator.to_string());
    if let VerificationResult::Failed(Failure::Policy(issues)) = result {
        println!("{}", issue_table(issues));
    }
    println!(" {line}\n");
}

/// Full error text: message, cause chain, code, hint and, for internal
/// errors, where to report them.
pub fn error_report(err: &Error) -> String {
    let mut out = format!("{} {}\n", "ERROR:".red().bold(), err);
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("  caused by: {cause}\n"));
        source = cause.source();
    }
    out.push_str(&format!("\n  code: {}\n  hint: {}\n", err.code(), err.hint()));
    if err.kind() == ErrorKind::Internal {
        out.push_str(&format!(
            "\n{}\n  Please open an issue at {} with the output of the failing\n  command re-run with --debug.\n",
            "REPORTING A BUG".bold(),
            ISSUE_TRACKER
        ));
    }
    out
}

pub fn render_error(err: &Error) {
    eprint!("{}", error_report(err));
}
