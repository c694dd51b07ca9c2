//! Error taxonomy shared by every command.
//!
//! Each module raises its own `thiserror` enum; [`Error`] wraps them so the
//! shell can pick an exit code, a stable error code and a remediation hint
//! without knowing which subsystem failed.

use thiserror::Error;

use crate::analyzer::AnalyzeError;
use crate::api::ApiError;
use crate::config::{ConfigError, API_KEY_ENV};
use crate::locator::LocatorError;

/// Process exit codes.
pub mod exit {
    pub const SUCCESS: u8 = 0;
    /// The build failed or blocking issues were found.
    pub const POLICY_FAILURE: u8 = 1;
    /// The build did not finish before the timeout.
    pub const TIMED_OUT: u8 = 2;
    pub const CONFIGURATION: u8 = 3;
    pub const NETWORK: u8 = 4;
    pub const INTERNAL: u8 = 5;
    /// No module could be analyzed, or a module's tool check failed.
    pub const ANALYSIS: u8 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing credentials, bad endpoint, unreadable config. Not retryable.
    Configuration,
    /// One module's extraction failed; other modules are unaffected.
    Analysis,
    /// Transport or HTTP failure talking to the service.
    Network,
    Internal,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not look up the organization for this API key")]
    IdentityUnavailable(#[source] ApiError),
    #[error("no module could be analyzed")]
    NothingAnalyzed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Locator(_) => ErrorKind::Configuration,
            Error::Analyze(_) | Error::NothingAnalyzed => ErrorKind::Analysis,
            Error::Api(ApiError::Unauthorized { .. }) => ErrorKind::Configuration,
            Error::Api(_) | Error::IdentityUnavailable(_) => ErrorKind::Network,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Configuration => exit::CONFIGURATION,
            ErrorKind::Network => exit::NETWORK,
            ErrorKind::Analysis => exit::ANALYSIS,
            ErrorKind::Internal => exit::INTERNAL,
        }
    }

    /// Stable identifier, suitable for searching docs and issue trackers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(ConfigError::MissingApiKey) => "E_MISSING_API_KEY",
            Error::Config(ConfigError::InvalidEndpoint { .. }) => "E_INVALID_ENDPOINT",
            Error::Config(ConfigError::MissingRevision { .. }) => "E_MISSING_REVISION",
            Error::Config(ConfigError::AlreadyExists { .. }) => "E_CONFIG_EXISTS",
            Error::Config(_) => "E_CONFIG_FILE",
            Error::Locator(LocatorError::MissingOrganization) => "E_MISSING_ORGANIZATION",
            Error::Locator(_) => "E_BAD_LOCATOR",
            Error::Analyze(AnalyzeError::UnsupportedEcosystem(_)) => "E_UNSUPPORTED_ECOSYSTEM",
            Error::Analyze(AnalyzeError::ToolNotFound { .. }) => "E_TOOL_NOT_FOUND",
            Error::Analyze(AnalyzeError::ToolTimedOut { .. }) => "E_TOOL_TIMED_OUT",
            Error::Analyze(AnalyzeError::ToolFailed { .. }) => "E_TOOL_FAILED",
            Error::Analyze(_) => "E_PARSE",
            Error::Api(ApiError::Unauthorized { .. }) => "E_UNAUTHORIZED",
            Error::Api(_) => "E_NETWORK",
            Error::IdentityUnavailable(_) => "E_IDENTITY_UNAVAILABLE",
            Error::NothingAnalyzed => "E_NOTHING_ANALYZED",
            Error::Internal(_) => "E_INTERNAL",
        }
    }

    /// What the user can do about it.
    pub fn hint(&self) -> String {
        match self {
            Error::Config(ConfigError::MissingApiKey) => format!(
                "Set {API_KEY_ENV} in the environment or `key` under [api] in .graphcheckr/config.toml."
            ),
            Error::Config(ConfigError::InvalidEndpoint { .. }) => {
                "Pass a full http(s) URL to --endpoint, e.g. https://graphcheckr.example.com.".to_string()
            }
            Error::Config(ConfigError::MissingRevision { .. }) => {
                "Pass --revision or set `revision` under [project] in .graphcheckr/config.toml.".to_string()
            }
            Error::Config(ConfigError::AlreadyExists { .. }) => {
                "Pass --overwrite to replace the existing config.".to_string()
            }
            Error::Config(_) => "Check that the config file exists and is valid TOML.".to_string(),
            Error::Locator(LocatorError::MissingOrganization) => {
                "Custom projects are scoped to an organization; check that the API key belongs to one."
                    .to_string()
            }
            Error::Locator(_) => "Locators look like `custom+<org>%2F<project>$<revision>`.".to_string(),
            Error::Analyze(AnalyzeError::ToolNotFound { tool, .. }) => {
                format!("Install `{tool}` and make sure it is on PATH, or remove the module from the config.")
            }
            Error::Analyze(AnalyzeError::ToolTimedOut { .. }) => {
                "Raise `timeout_secs` under [analyze] in the config.".to_string()
            }
            Error::Analyze(AnalyzeError::UnsupportedEcosystem(_)) => {
                "Remove the module from the config or analyze it with another tool.".to_string()
            }
            Error::Analyze(_) => {
                "Run the ecosystem tool by hand in the module directory and check its output.".to_string()
            }
            Error::Api(ApiError::Unauthorized { .. }) => {
                "The API key was rejected; check that it is valid and has push access.".to_string()
            }
            Error::Api(_) | Error::IdentityUnavailable(_) => {
                "Check network access to the endpoint; transient failures were already retried.".to_string()
            }
            Error::NothingAnalyzed => {
                "Run `graphcheckr init` to discover modules, or list them under [[modules]].".to_string()
            }
            Error::Internal(_) => "This is a bug; re-run with --debug and include the output when reporting it."
                .to_string(),
        }
    }
}
