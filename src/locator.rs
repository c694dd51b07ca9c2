//! Canonical project identity: `fetcher+[orgId%2F]project$revision`.
//!
//! The encoded string is what every remote call is keyed on, so [`decode`]
//! must invert [`Locator`]'s `Display` exactly. Project and revision segments
//! percent-encode `%`, `/`, `$`, `?`, `#`, space and control characters; the
//! first literal `+` ends the fetcher and the first literal `$` ends the
//! project.

use std::str::FromStr;
use std::sync::OnceLock;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{EcosystemType, PackageId};

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'%')
    .add(b'/')
    .add(b'$')
    .add(b'?')
    .add(b'#');

const ORG_SEPARATOR: &str = "%2F";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LocatorError {
    #[error("custom locators need an organization id")]
    MissingOrganization,
    #[error("unknown fetcher `{0}`")]
    UnknownFetcher(String),
    #[error("malformed locator `{locator}`: {reason}")]
    Malformed { locator: String, reason: &'static str },
}

/// How the service identifies a project's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fetcher {
    /// Opaque project name scoped to an organization.
    Custom,
    /// Version-control URL.
    Git,
    /// A dependency published to an ecosystem's registry.
    Package(EcosystemType),
}

impl std::fmt::Display for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fetcher::Custom => f.write_str("custom"),
            Fetcher::Git => f.write_str("git"),
            Fetcher::Package(eco) => f.write_str(eco.key()),
        }
    }
}

impl FromStr for Fetcher {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(Fetcher::Custom),
            "git" => Ok(Fetcher::Git),
            other => other
                .parse::<EcosystemType>()
                .map(Fetcher::Package)
                .map_err(LocatorError::UnknownFetcher),
        }
    }
}

impl Serialize for Fetcher {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fetcher {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub fetcher: Fetcher,
    /// Present exactly when `fetcher` is [`Fetcher::Custom`].
    pub org_id: Option<u64>,
    pub project: String,
    pub revision: String,
}

impl Locator {
    /// Build a locator, normalizing VCS URLs in `project`.
    ///
    /// The organization id is only kept for custom locators, where it is required.
    pub fn new(
        fetcher: Fetcher,
        org_id: Option<u64>,
        project: &str,
        revision: impl Into<String>,
    ) -> Result<Self, LocatorError> {
        let (org_id, project) = match fetcher {
            Fetcher::Custom => {
                let org_id = org_id.ok_or(LocatorError::MissingOrganization)?;
                (Some(org_id), normalize_url(project).unwrap_or_else(|| project.to_string()))
            }
            Fetcher::Git => (None, normalize_git(project)),
            Fetcher::Package(_) => (None, project.to_string()),
        };

        Ok(Self {
            fetcher,
            org_id,
            project,
            revision: revision.into(),
        })
    }

    /// Locator of a resolved dependency.
    pub fn for_package(id: &PackageId) -> Self {
        Self {
            fetcher: Fetcher::Package(id.ecosystem),
            org_id: None,
            project: id.name.clone(),
            revision: id.revision.clone(),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+", self.fetcher)?;
        if let Some(org_id) = self.org_id {
            write!(f, "{}{}", org_id, ORG_SEPARATOR)?;
        }
        write!(
            f,
            "{}${}",
            utf8_percent_encode(&self.project, SEGMENT),
            utf8_percent_encode(&self.revision, SEGMENT)
        )
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

/// Encode a project identity into its locator string.
pub fn encode(
    fetcher: Fetcher,
    org_id: Option<u64>,
    project: &str,
    revision: &str,
) -> Result<String, LocatorError> {
    Ok(Locator::new(fetcher, org_id, project, revision)?.to_string())
}

/// Parse a locator string produced by [`encode`].
pub fn decode(locator: &str) -> Result<Locator, LocatorError> {
    let malformed = |reason| LocatorError::Malformed {
        locator: locator.to_string(),
        reason,
    };

    let (fetcher, rest) = locator.split_once('+').ok_or_else(|| malformed("missing `+`"))?;
    let fetcher: Fetcher = fetcher.parse()?;
    let (project, revision) = rest.split_once('$').ok_or_else(|| malformed("missing `$`"))?;

    let (org_id, project) = match fetcher {
        Fetcher::Custom => {
            let (org, project) = project
                .split_once(ORG_SEPARATOR)
                .ok_or(LocatorError::MissingOrganization)?;
            let org = org
                .parse::<u64>()
                .map_err(|_| malformed("organization id is not an integer"))?;
            (Some(org), project)
        }
        _ => (None, project),
    };

    Ok(Locator {
        fetcher,
        org_id,
        project: unescape(project).ok_or_else(|| malformed("project is not valid UTF-8"))?,
        revision: unescape(revision).ok_or_else(|| malformed("revision is not valid UTF-8"))?,
    })
}

fn unescape(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://(?:[^@/]*@)?(.+)$").expect("valid url regex")
    })
}

fn scp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:[^@/:]+@)?([^/:]+):(.+)$").expect("valid scp regex"))
}

/// `https://user:pw@host/org/repo.git` → `host/org/repo`. `None` if `project` has no scheme.
fn normalize_url(project: &str) -> Option<String> {
    let caps = url_re().captures(project)?;
    Some(strip_git_suffix(&caps[1]))
}

/// Reduce any HTTPS, SSH or scp-style VCS address to `host/path`.
fn normalize_git(project: &str) -> String {
    if let Some(normalized) = normalize_url(project) {
        return normalized;
    }
    if let Some(caps) = scp_re().captures(project) {
        return strip_git_suffix(&format!("{}/{}", &caps[1], &caps[2]));
    }
    project.to_string()
}

fn strip_git_suffix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}
