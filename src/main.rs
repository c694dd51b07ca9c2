//! `graphcheckr`: resolve project dependency graphs and verify builds remotely.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]) and start logging.
//! 2. Load the config ([`config::load_config`]), then layer environment and flags over it.
//! 3. Discover or read the project's modules ([`detector`]).
//! 4. Analyze each module with its ecosystem's tool ([`analyzer`]), producing a
//!    normalized graph per module ([`graph`]).
//! 5. Upload the result, addressed by a [`locator`], through the [`api`] client.
//! 6. `test` polls the latest build until it settles ([`verify`]).
//! 7. Render the outcome ([`report`]) and exit with the code from [`errors::exit`].

mod analyzer;
mod api;
mod cli;
mod config;
mod detector;
mod errors;
mod graph;
mod locator;
mod models;
mod report;
mod verify;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use analyzer::{AnalyzerContext, ModuleOutcome};
use api::{ApiClient, UploadOptions, VerificationApi};
use cli::{Cli, Command, ProjectArgs, ReportFormat};
use config::{load_config, project_config_path, save_config, Config, ConfigError};
use errors::{exit, Error, Result};
use locator::Locator;
use models::Module;
use report::BuildReport;
use verify::PollSettings;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            report::terminal::render_error(&err);
            ExitCode::from(err.exit_code())
        }
    }
}

/// Logs go to stderr. `--debug` raises the default level; `RUST_LOG` wins over both.
fn init_tracing(debug: bool) {
    let default = if debug { "graphcheckr=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    match &cli.command {
        Command::Init { path, overwrite } => init(&cli, path, *overwrite),
        Command::Build { path } => build(&Session::load(&cli, path, None)?).await,
        Command::Analyze {
            path,
            output,
            title,
            project,
        } => {
            let session = Session::load(&cli, path, Some(project))?;
            analyze(&session, output.as_deref(), title.clone()).await
        }
        Command::Upload {
            file,
            path,
            title,
            project,
        } => {
            let session = Session::load(&cli, path, Some(project))?;
            let units = report::read_source_units(file)?;
            upload(&session, &units, title.clone()).await
        }
        Command::Report { path, format, project } => {
            show_report(&Session::load(&cli, path, Some(project))?, *format).await
        }
        Command::Test { path, timeout, project } => {
            test(&Session::load(&cli, path, Some(project))?, *timeout).await
        }
        Command::Update => {
            update();
            Ok(exit::SUCCESS)
        }
    }
}

/// A project root and its fully layered config.
struct Session {
    root: PathBuf,
    config: Config,
    /// Set by `--locator`; bypasses project settings.
    locator: Option<String>,
    quiet: bool,
}

impl Session {
    fn load(cli: &Cli, path: &Path, project: Option<&ProjectArgs>) -> Result<Self> {
        let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut config = load_config(&root, cli.config.as_deref())?;
        config.apply_env(|name| std::env::var(name).ok());
        if let Some(endpoint) = &cli.endpoint {
            config.api.endpoint = Some(endpoint.clone());
        }
        if let Some(project) = project {
            project.apply(&mut config.project);
        }
        Ok(Self {
            root,
            config,
            locator: project.and_then(|p| p.locator.clone()),
            quiet: cli.quiet,
        })
    }

    fn explicit_locator(&self) -> Result<Option<Locator>> {
        Ok(self.locator.as_deref().map(str::parse::<Locator>).transpose()?)
    }

    /// The project's locator, from `--locator` or built from the project settings.
    async fn locate(&self, api: &dyn VerificationApi) -> Result<Locator> {
        match self.explicit_locator()? {
            Some(locator) => Ok(locator),
            None => verify::resolve_locator(api, &self.config.project_settings(&self.root)?).await,
        }
    }

    fn client(&self) -> Result<ApiClient> {
        Ok(ApiClient::new(&self.config.api_settings()?)?)
    }

    /// Configured modules, or the discovered ones when none are configured.
    fn modules(&self) -> Result<Vec<Module>> {
        if !self.config.modules.is_empty() {
            return Ok(self.config.modules.clone());
        }
        let modules = detector::discover_modules(&self.root)?;
        debug!(count = modules.len(), "discovered modules");
        Ok(modules)
    }

    fn analyzer_context(&self) -> AnalyzerContext {
        AnalyzerContext {
            root: self.root.clone(),
            timeout: self.config.analyze_timeout(),
        }
    }
}

fn init(cli: &Cli, path: &Path, overwrite: bool) -> Result<u8> {
    let root = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let config_path = cli.config.clone().unwrap_or_else(|| project_config_path(&root));
    if config_path.exists() && !overwrite {
        return Err(ConfigError::AlreadyExists { path: config_path }.into());
    }

    // Keep settings from a config found elsewhere (e.g. the home directory), minus its modules.
    let config = load_config(&root, cli.config.as_deref())?.for_project(detector::discover_modules(&root)?);
    if config.modules.is_empty() {
        return Err(Error::NothingAnalyzed);
    }
    for module in config.modules.iter().filter(|m| !analyzer::is_supported(m.ecosystem)) {
        warn!(module = %module.name, ecosystem = %module.ecosystem, "no analyzer for this ecosystem yet; it will be skipped");
    }
    save_config(&config_path, &config)?;
    info!(path = %config_path.display(), modules = config.modules.len(), "wrote config");

    report::terminal::render_modules(&config.modules, &config_path);
    Ok(exit::SUCCESS)
}

async fn build(session: &Session) -> Result<u8> {
    let ctx = session.analyzer_context();
    let modules = session.modules()?;
    if modules.is_empty() {
        return Err(Error::NothingAnalyzed);
    }

    let checks = analyzer::check_tools(&modules, &ctx).await;
    report::terminal::render_tool_checks(&checks);
    match analyzer::first_tool_failure(checks) {
        Some(err) => Err(err.into()),
        None => Ok(exit::SUCCESS),
    }
}

async fn analyze_project(session: &Session) -> Result<Vec<ModuleOutcome>> {
    let modules = session.modules()?;
    let outcomes = analyzer::analyze_modules(&modules, &session.analyzer_context()).await;
    report::terminal::render_analysis(&outcomes, &session.root, session.quiet);
    if !outcomes.iter().any(|o| o.result.is_ok()) {
        return Err(Error::NothingAnalyzed);
    }
    Ok(outcomes)
}

async fn analyze(session: &Session, output: Option<&Path>, title: Option<String>) -> Result<u8> {
    let outcomes = analyze_project(session).await?;
    let units = report::source_units(&outcomes);
    match output {
        Some(path) => {
            report::write_json(&units, path)?;
            Ok(exit::SUCCESS)
        }
        None => upload(session, &units, title).await,
    }
}

async fn upload(session: &Session, units: &[api::SourceUnit], title: Option<String>) -> Result<u8> {
    let client = session.client()?;
    let locator = session.locate(&client).await?;
    let options = UploadOptions {
        title,
        branch: session.config.project.branch.clone(),
    };

    info!(locator = %locator, units = units.len(), "uploading analysis");
    let assigned = client.upload(&locator, &options, units).await?;
    report::terminal::render_uploaded(&assigned, session.quiet);
    Ok(exit::SUCCESS)
}

async fn show_report(session: &Session, format: ReportFormat) -> Result<u8> {
    let client = session.client()?;
    let locator = session.locate(&client).await?;

    let (status, issues) = tokio::try_join!(client.latest_build(&locator), client.issues(&locator))?;
    let build = BuildReport::new(locator.to_string(), status, issues);
    match format {
        ReportFormat::Terminal => report::terminal::render_build_report(&build, session.quiet),
        ReportFormat::Json => report::write_json(&build, Path::new(report::STDOUT))?,
    }
    Ok(exit::SUCCESS)
}

async fn test(session: &Session, timeout: Option<u64>) -> Result<u8> {
    let client = session.client()?;
    let settings = PollSettings {
        timeout: timeout.map_or_else(|| session.config.test_timeout(), Duration::from_secs),
        interval: session.config.poll_interval(),
    };

    let spinner = (!session.quiet)
        .then(|| -> anyhow::Result<ProgressBar> {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed}] {msg}")?);
            spinner.set_message("Waiting for the build to finish");
            spinner.enable_steady_tick(Duration::from_millis(120));
            Ok(spinner)
        })
        .transpose()
        .context("Failed to set up progress display")?;

    let outcome = match session.explicit_locator()? {
        Some(locator) => verify::poll(&client, &locator, settings)
            .await
            .map(|result| (locator, result)),
        None => {
            let project = session.config.project_settings(&session.root)?;
            verify::run(&client, &project, settings).await
        }
    };
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let (locator, result) = outcome?;
    report::terminal::render_verification(&locator, &result, session.quiet);
    Ok(result.exit_code())
}

fn update() {
    println!("graphcheckr {}", env!("CARGO_PKG_VERSION"));
    println!("To update, reinstall the latest release:");
    println!("    cargo install graphcheckr --force");
}
