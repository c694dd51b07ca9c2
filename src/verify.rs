//! Waiting for the service to finish a build and judging the outcome.
//!
//! ```text
//! uploaded -> polling -> succeeded -> issues query -> Succeeded | Failed(policy)
//!                     -> failed                    -> Failed(build)
//!             (timeout elapsed in any state)       -> TimedOut
//! ```
//!
//! The whole wait, including the issues query, runs inside one
//! `tokio::time::timeout`, so an elapsed timeout drops the in-flight request
//! along with the interval timer.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::{ApiError, Issue, VerificationApi};
use crate::config::ProjectSettings;
use crate::errors::{exit, Error, Result};
use crate::locator::{Fetcher, Locator};
use crate::models::BuildStatus;

/// Why a verification failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The service could not complete the build.
    Build,
    /// The build finished with unresolved issues.
    Policy(Vec<Issue>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    Succeeded,
    Failed(Failure),
    /// The timeout elapsed first. Not a failure: the build may still pass.
    TimedOut { last_status: Option<BuildStatus> },
}

impl VerificationResult {
    pub fn exit_code(&self) -> u8 {
        match self {
            VerificationResult::Succeeded => exit::SUCCESS,
            VerificationResult::Failed(_) => exit::POLICY_FAILURE,
            VerificationResult::TimedOut { .. } => exit::TIMED_OUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Build the project's locator. Custom projects need the organization id,
/// which is looked up once; failing to get it is fatal.
pub async fn resolve_locator(api: &dyn VerificationApi, project: &ProjectSettings) -> Result<Locator> {
    let org_id = match project.fetcher {
        Fetcher::Custom => {
            let org_id = api.organization().await.map_err(Error::IdentityUnavailable)?;
            debug!(org_id, "resolved organization");
            Some(org_id)
        }
        _ => None,
    };
    Ok(Locator::new(project.fetcher, org_id, &project.name, project.revision.as_str())?)
}

/// Resolve the project's locator and wait for its latest build.
pub async fn run(
    api: &dyn VerificationApi,
    project: &ProjectSettings,
    settings: PollSettings,
) -> Result<(Locator, VerificationResult)> {
    let locator = resolve_locator(api, project).await?;
    let result = poll(api, &locator, settings).await?;
    Ok((locator, result))
}

/// Poll `locator`'s latest build until it is terminal or `settings.timeout` elapses.
pub async fn poll(api: &dyn VerificationApi, locator: &Locator, settings: PollSettings) -> Result<VerificationResult> {
    info!(locator = %locator, timeout_secs = settings.timeout.as_secs(), "waiting for build");
    let mut last_status = None;
    let outcome = tokio::time::timeout(
        settings.timeout,
        wait_for_build(api, locator, settings.interval, &mut last_status),
    )
    .await;

    match outcome {
        Ok(result) => Ok(result?),
        Err(_) => {
            warn!(locator = %locator, ?last_status, "timed out waiting for build");
            Ok(VerificationResult::TimedOut { last_status })
        }
    }
}

async fn wait_for_build(
    api: &dyn VerificationApi,
    locator: &Locator,
    interval: Duration,
    last_status: &mut Option<BuildStatus>,
) -> std::result::Result<VerificationResult, ApiError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let status = loop {
        ticker.tick().await;
        let status = api.latest_build(locator).await?;
        if *last_status != Some(status) {
            info!(%status, "build status");
        }
        *last_status = Some(status);
        if status.is_terminal() {
            break status;
        }
    };
    if status == BuildStatus::Failed {
        return Ok(VerificationResult::Failed(Failure::Build));
    }

    let blocking: Vec<Issue> = api
        .issues(locator)
        .await?
        .into_iter()
        .filter(Issue::is_blocking)
        .collect();
    if blocking.is_empty() {
        Ok(VerificationResult::Succeeded)
    } else {
        info!(count = blocking.len(), "build has unresolved issues");
        Ok(VerificationResult::Failed(Failure::Policy(blocking)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{SourceUnit, UploadOptions};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Replays build statuses in order, then repeats the last one.
    #[derive(Default)]
    struct Scripted {
        org: Option<u64>,
        statuses: Mutex<VecDeque<BuildStatus>>,
        issues: Vec<Issue>,
        hang: bool,
        status_calls: AtomicUsize,
        org_calls: AtomicUsize,
        dropped: Arc<AtomicBool>,
    }

    impl Scripted {
        fn statuses(statuses: &[BuildStatus]) -> Self {
            Self {
                org: Some(1000),
                statuses: Mutex::new(statuses.iter().copied().collect()),
                ..Self::default()
            }
        }

        fn with_issues(mut self, issues: Vec<Issue>) -> Self {
            self.issues = issues;
            self
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn unavailable() -> ApiError {
        ApiError::Status {
            url: "http://localhost/api/cli/organization".to_string(),
            status: 503,
            body: String::new(),
        }
    }

    #[async_trait]
    impl VerificationApi for Scripted {
        async fn organization(&self) -> std::result::Result<u64, ApiError> {
            self.org_calls.fetch_add(1, Ordering::SeqCst);
            self.org.ok_or_else(unavailable)
        }

        async fn latest_build(&self, _: &Locator) -> std::result::Result<BuildStatus, ApiError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                let _flag = DropFlag(self.dropped.clone());
                std::future::pending::<()>().await;
            }
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front()
            } else {
                statuses.front().copied()
            };
            Ok(status.unwrap_or(BuildStatus::Unknown))
        }

        async fn issues(&self, _: &Locator) -> std::result::Result<Vec<Issue>, ApiError> {
            Ok(self.issues.clone())
        }

        async fn upload(
            &self,
            _: &Locator,
            _: &UploadOptions,
            _: &[SourceUnit],
        ) -> std::result::Result<String, ApiError> {
            unreachable!("verification never uploads")
        }
    }

    fn project(fetcher: Fetcher, name: &str) -> ProjectSettings {
        ProjectSettings {
            fetcher,
            name: name.to_string(),
            revision: "1000".to_string(),
            branch: None,
        }
    }

    fn quick(timeout_ms: u64) -> PollSettings {
        PollSettings {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(5),
        }
    }

    fn issue(id: u64, resolved: bool) -> Issue {
        Issue {
            id,
            kind: "policy_flag".to_string(),
            revision_id: "npm+left-pad$1.3.0".to_string(),
            resolved,
        }
    }

    #[tokio::test]
    async fn test_succeeded_without_issues() {
        let api = Scripted::statuses(&[BuildStatus::Pending, BuildStatus::Running, BuildStatus::Succeeded]);

        let (locator, result) = run(&api, &project(Fetcher::Custom, "testRun"), quick(5_000))
            .await
            .unwrap();
        assert_eq!(locator.to_string(), "custom+1000%2FtestRun$1000");
        assert_eq!(result, VerificationResult::Succeeded);
        assert_eq!(result.exit_code(), exit::SUCCESS);
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(api.org_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_never_terminal_times_out() {
        let api = Scripted::statuses(&[BuildStatus::Running]);

        let (_, result) = run(&api, &project(Fetcher::Custom, "testRun"), quick(100)).await.unwrap();
        assert_eq!(
            result,
            VerificationResult::TimedOut {
                last_status: Some(BuildStatus::Running)
            }
        );
        assert_eq!(result.exit_code(), exit::TIMED_OUT);
        assert!(api.status_calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_timeout_drops_in_flight_request() {
        let api = Scripted {
            org: Some(1000),
            hang: true,
            ..Scripted::default()
        };

        let started = Instant::now();
        let (_, result) = run(&api, &project(Fetcher::Custom, "testRun"), quick(50)).await.unwrap();
        assert_eq!(result, VerificationResult::TimedOut { last_status: None });
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(api.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failed_build() {
        let api = Scripted::statuses(&[BuildStatus::Running, BuildStatus::Failed]).with_issues(vec![issue(1, false)]);

        let (_, result) = run(&api, &project(Fetcher::Custom, "testRun"), quick(5_000)).await.unwrap();
        assert_eq!(result, VerificationResult::Failed(Failure::Build));
        assert_eq!(result.exit_code(), exit::POLICY_FAILURE);
    }

    #[tokio::test]
    async fn test_unresolved_issues_fail() {
        let api = Scripted::statuses(&[BuildStatus::Succeeded]).with_issues(vec![issue(1, true), issue(2, false)]);

        let (_, result) = run(&api, &project(Fetcher::Custom, "testRun"), quick(5_000)).await.unwrap();
        assert_eq!(result, VerificationResult::Failed(Failure::Policy(vec![issue(2, false)])));
    }

    #[tokio::test]
    async fn test_resolved_issues_pass() {
        let api = Scripted::statuses(&[BuildStatus::Succeeded]).with_issues(vec![issue(1, true)]);

        let (_, result) = run(&api, &project(Fetcher::Custom, "testRun"), quick(5_000)).await.unwrap();
        assert_eq!(result, VerificationResult::Succeeded);
    }

    #[tokio::test]
    async fn test_organization_lookup_failure_is_fatal() {
        let api = Scripted {
            org: None,
            ..Scripted::statuses(&[BuildStatus::Succeeded])
        };

        let err = run(&api, &project(Fetcher::Custom, "testRun"), quick(5_000)).await.unwrap_err();
        assert!(matches!(err, Error::IdentityUnavailable(_)));
        assert_eq!(err.code(), "E_IDENTITY_UNAVAILABLE");
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_git_projects_skip_organization_lookup() {
        let api = Scripted {
            org: None,
            ..Scripted::statuses(&[BuildStatus::Succeeded])
        };

        let locator = resolve_locator(&api, &project(Fetcher::Git, "git@github.com:fossas/fossa-cli.git"))
            .await
            .unwrap();
        assert_eq!(locator.to_string(), "git+github.com%2Ffossas%2Ffossa-cli$1000");
        assert_eq!(api.org_calls.load(Ordering::SeqCst), 0);
    }
}
