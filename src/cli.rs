use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ProjectConfig;
use crate::locator::Fetcher;

#[derive(Parser, Debug)]
#[command(
    name = "graphcheckr",
    about = "Analyze project dependencies and check builds against the graphcheckr service",
    version
)]
pub struct Cli {
    /// Config file [default: ./.graphcheckr/config.toml, fallback ~/.config/graphcheckr/config.toml]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Service endpoint, for on-premises installs
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Log debug output to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Only print summary lines
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover modules and write .graphcheckr/config.toml
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Replace an existing config
        #[arg(long)]
        overwrite: bool,
    },

    /// Check that each module's ecosystem tool is installed
    Build {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Analyze every module and upload the result
    Analyze {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Save the analysis as JSON instead of uploading; without a value, print it
        #[arg(long, short, value_name = "FILE", num_args = 0..=1, default_missing_value = "-")]
        output: Option<PathBuf>,

        /// Title shown for this build
        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Upload an analysis saved with `analyze --output`
    Upload {
        /// Saved analysis
        #[arg(long, value_name = "FILE")]
        file: PathBuf,

        #[arg(default_value = ".")]
        path: PathBuf,

        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Show the latest build status and issues
    Report {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[arg(long, default_value = "terminal", value_name = "FORMAT")]
        format: ReportFormat,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Wait for the latest build and fail on open issues
    Test {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Give up after this many seconds [default: from config, 600]
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Print the installed version and how to update it
    Update,
}

/// Project identity overrides shared by the commands that talk to the service.
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Project name [default: from config, or the directory name]
    #[arg(long)]
    pub project: Option<String>,

    /// Revision being analyzed, e.g. a commit hash
    #[arg(long)]
    pub revision: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    #[arg(long, value_enum)]
    pub fetcher: Option<FetcherArg>,

    /// Address the build by this locator instead of the project settings
    #[arg(long, conflicts_with_all = ["project", "revision", "fetcher"])]
    pub locator: Option<String>,
}

impl ProjectArgs {
    /// Layer the flags over the `[project]` config section.
    pub fn apply(&self, project: &mut ProjectConfig) {
        if let Some(name) = &self.project {
            project.name = Some(name.clone());
        }
        if let Some(revision) = &self.revision {
            project.revision = Some(revision.clone());
        }
        if let Some(branch) = &self.branch {
            project.branch = Some(branch.clone());
        }
        if let Some(fetcher) = self.fetcher {
            project.fetcher = Some(fetcher.into());
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum FetcherArg {
    Custom,
    Git,
}

impl From<FetcherArg> for Fetcher {
    fn from(arg: FetcherArg) -> Self {
        match arg {
            FetcherArg::Custom => Fetcher::Custom,
            FetcherArg::Git => Fetcher::Git,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}
