//! Operator configuration, read once at startup from `GITCHANGE_*`
//! environment variables with serde-style defaults.

use std::time::Duration;

use gitchange_retry::Backoff;
use serde::{Deserialize, Serialize};

/// Which controller a tick runs under; also the `controller` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    GitCommit,
    PullRequest,
}

impl ControllerKind {
    pub fn label(&self) -> &'static str {
        match self {
            ControllerKind::GitCommit => "gitcommit",
            ControllerKind::PullRequest => "pullrequest",
        }
    }
}

/// Runtime knobs for both controllers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Tick deadline for `GitCommit` objects, seconds.
    pub commit_deadline_secs: u64,
    /// Tick deadline for `PullRequest` objects, seconds.
    pub pull_request_deadline_secs: u64,
    /// Poll interval for suspended objects, seconds.
    pub suspend_poll_secs: u64,
    /// Requeue delay after a retryable failure, seconds.
    pub error_requeue_secs: u64,
    /// Commit author name.
    pub author_name: String,
    /// Commit author email.
    pub author_email: String,
    /// Git binary the worker shells out to.
    pub git_bin: String,
    /// Evaluation budget per expression.
    pub expression_fuel: u64,
    /// Bind address for the metrics endpoint.
    pub metrics_addr: String,
    /// Backoff for transient git and forge failures inside a tick.
    pub backoff: Backoff,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            commit_deadline_secs: 120,
            pull_request_deadline_secs: 300,
            suspend_poll_secs: 300,
            error_requeue_secs: 60,
            author_name: "gitchange-operator".to_string(),
            author_email: "gitchange-operator@cluster.local".to_string(),
            git_bin: "git".to_string(),
            expression_fuel: gitchange_expr::DEFAULT_FUEL,
            metrics_addr: "0.0.0.0:8080".to_string(),
            backoff: Backoff::default(),
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            commit_deadline_secs: env_parse("GITCHANGE_COMMIT_DEADLINE_SECS", defaults.commit_deadline_secs),
            pull_request_deadline_secs: env_parse(
                "GITCHANGE_PULL_REQUEST_DEADLINE_SECS",
                defaults.pull_request_deadline_secs,
            ),
            suspend_poll_secs: env_parse("GITCHANGE_SUSPEND_POLL_SECS", defaults.suspend_poll_secs),
            error_requeue_secs: env_parse("GITCHANGE_ERROR_REQUEUE_SECS", defaults.error_requeue_secs),
            author_name: env_string("GITCHANGE_AUTHOR_NAME", &defaults.author_name),
            author_email: env_string("GITCHANGE_AUTHOR_EMAIL", &defaults.author_email),
            git_bin: env_string("GITCHANGE_GIT_BIN", &defaults.git_bin),
            expression_fuel: env_parse("GITCHANGE_EXPRESSION_FUEL", defaults.expression_fuel),
            metrics_addr: env_string("GITCHANGE_METRICS_ADDR", &defaults.metrics_addr),
            backoff: defaults.backoff,
        }
    }

    /// The deadline a tick of the given kind runs under.
    pub fn tick_deadline(&self, kind: ControllerKind) -> Duration {
        match kind {
            ControllerKind::GitCommit => Duration::from_secs(self.commit_deadline_secs),
            ControllerKind::PullRequest => Duration::from_secs(self.pull_request_deadline_secs),
        }
    }

    pub fn suspend_poll(&self) -> Duration {
        Duration::from_secs(self.suspend_poll_secs)
    }

    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
