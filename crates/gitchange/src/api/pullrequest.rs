//! The `PullRequest` custom resource: push a head branch and open a PR.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    EncryptionSpec, ExecutionRecord, FileSpec, Phase, ResourceRef, RestApiSpec, validate_common,
};
use crate::Error;

/// Desired state: a head branch built from assembled content plus an open
/// pull request against the base branch.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    kind = "PullRequest",
    group = "git.galos.one",
    version = "v1",
    namespaced,
    status = "PullRequestStatus",
    shortname = "pr",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"PR", "type":"string", "jsonPath":".status.pullRequestURL"}, {"name":"Next Run", "type":"string", "jsonPath":".status.nextScheduledTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestSpec {
    /// HTTPS URL of the remote repository.
    pub repository: String,
    /// Branch the pull request targets.
    pub base_branch: String,
    /// Branch the changes are pushed to; owned by the operator.
    pub head_branch: String,
    /// Pull request title.
    pub title: String,
    /// Pull request body.
    #[serde(default)]
    pub body: Option<String>,
    /// Commit message for the head branch commit.
    pub commit_message: String,
    /// Name of the opaque secret carrying `token` or `username`/`password`.
    pub auth_secret_ref: String,
    /// Specific key inside the auth secret to use as the token.
    #[serde(default)]
    pub auth_secret_key: Option<String>,
    /// Literal files.
    #[serde(default)]
    pub files: Vec<FileSpec>,
    /// Cluster objects extracted into files.
    #[serde(default)]
    pub resource_refs: Vec<ResourceRef>,
    /// REST endpoints turned into files.
    #[serde(default, rename = "restAPIs")]
    pub rest_apis: Vec<RestApiSpec>,
    /// Optional file encryption applied before staging.
    #[serde(default)]
    pub encryption: Option<EncryptionSpec>,
    /// Cron expression for repeated execution; absent means one-shot.
    #[serde(default)]
    pub schedule: Option<String>,
    /// When true, nothing executes and `nextScheduledTime` is cleared.
    #[serde(default)]
    pub suspend: bool,
    /// Minutes after completion at which a one-shot object is deleted.
    /// Ignored when `schedule` is set.
    #[serde(default)]
    pub ttl_minutes: Option<u32>,
    /// Bound on `status.executionHistory`; defaults to 10.
    #[serde(default)]
    pub max_execution_history: Option<u32>,
}

/// Observed state of a `PullRequest`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: Option<Phase>,
    /// Machine-readable failure reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
    /// SHA of the head branch commit from the last execution.
    #[serde(default, rename = "commitSHA")]
    pub commit_sha: Option<String>,
    /// Number of the open pull request.
    #[serde(default)]
    pub pull_request_number: Option<u64>,
    /// URL of the open pull request.
    #[serde(default, rename = "pullRequestURL")]
    pub pull_request_url: Option<String>,
    /// When the last successful execution finished (RFC 3339).
    #[serde(default)]
    pub last_sync: Option<String>,
    /// When the last scheduled execution started (RFC 3339).
    #[serde(default)]
    pub last_scheduled_time: Option<String>,
    /// The next fire time; null while suspended.
    #[serde(default)]
    pub next_scheduled_time: Option<String>,
    /// Bounded history of scheduled executions, newest last.
    #[serde(default)]
    pub execution_history: Vec<ExecutionRecord>,
    /// Generation most recently acted upon.
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl PullRequestSpec {
    /// Admission-level validation mirrored at reconcile time.
    pub fn validate(&self) -> Result<(), Error> {
        if self.base_branch.trim().is_empty() {
            return Err(Error::Validation("baseBranch must not be empty".into()));
        }
        if self.head_branch.trim().is_empty() {
            return Err(Error::Validation("headBranch must not be empty".into()));
        }
        if self.head_branch == self.base_branch {
            return Err(Error::BranchConflict(format!(
                "headBranch and baseBranch are both {:?}",
                self.head_branch
            )));
        }
        if self.title.trim().is_empty() {
            return Err(Error::Validation("title must not be empty".into()));
        }
        validate_common(
            &self.repository,
            &self.commit_message,
            &self.auth_secret_ref,
            &self.files,
            &self.resource_refs,
            &self.rest_apis,
            self.schedule.as_deref(),
            self.ttl_minutes,
            self.max_execution_history,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PullRequestSpec {
        serde_json::from_value(serde_json::json!({
            "repository": "https://github.com/acme/config",
            "baseBranch": "main",
            "headBranch": "gitchange/update",
            "title": "Automated update",
            "commitMessage": "update",
            "authSecretRef": "git-credentials"
        }))
        .unwrap()
    }

    #[test]
    fn minimal_spec_is_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn identical_head_and_base_is_a_branch_conflict() {
        let mut spec = minimal();
        spec.head_branch = "main".into();
        let err = spec.validate().unwrap_err();
        assert_eq!(err.reason(), "BranchConflict");
        assert!(!err.retryable());
    }

    #[test]
    fn empty_title_is_rejected() {
        let mut spec = minimal();
        spec.title = "".into();
        let err = spec.validate().unwrap_err();
        assert_eq!(err.reason(), "ValidationError");
    }

    #[test]
    fn schedule_is_validated() {
        let mut spec = minimal();
        spec.schedule = Some("@weekly".into());
        assert!(spec.validate().is_ok());
        spec.schedule = Some("@fortnightly".into());
        assert_eq!(spec.validate().unwrap_err().reason(), "ScheduleInvalid");
    }

    #[test]
    fn status_keeps_pr_bookkeeping_fields() {
        let status = PullRequestStatus {
            pull_request_number: Some(12),
            pull_request_url: Some("https://github.com/acme/config/pull/12".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["pullRequestNumber"], 12);
        assert_eq!(
            json["pullRequestURL"],
            "https://github.com/acme/config/pull/12"
        );
    }
}
