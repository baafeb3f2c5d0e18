//! The `GitCommit` custom resource: push a commit directly to a branch.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    EncryptionSpec, ExecutionRecord, FileSpec, Phase, ResourceRef, RestApiSpec, validate_common,
};
use crate::Error;

/// Desired state: a commit on `branch` of `repository` assembled from
/// literal files, extracted cluster objects, and REST responses.
///
/// ```yaml
/// apiVersion: git.galos.one/v1
/// kind: GitCommit
/// metadata:
///   name: publish-config
/// spec:
///   repository: https://github.com/acme/config
///   branch: main
///   commitMessage: "chore: publish cluster config"
///   authSecretRef: git-credentials
///   files:
///     - path: generated/readme.txt
///       content: managed by the gitchange operator
/// ```
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    kind = "GitCommit",
    group = "git.galos.one",
    version = "v1",
    namespaced,
    status = "GitCommitStatus",
    shortname = "gc",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}, {"name":"SHA", "type":"string", "jsonPath":".status.commitSHA"}, {"name":"Next Run", "type":"string", "jsonPath":".status.nextScheduledTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GitCommitSpec {
    /// HTTPS URL of the remote repository.
    pub repository: String,
    /// Target branch; created off the default branch when missing.
    pub branch: String,
    /// Commit message.
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

/// Observed state of a `GitCommit`.
///
/// Fields are always serialized so merge patches can clear them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitCommitStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: Option<Phase>,
    /// Machine-readable failure reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable detail.
    #[serde(default)]
    pub message: Option<String>,
    /// SHA of the commit produced (or confirmed) by the last execution.
    #[serde(default, rename = "commitSHA")]
    pub commit_sha: Option<String>,
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

impl GitCommitSpec {
    /// Admission-level validation mirrored at reconcile time.
    pub fn validate(&self) -> Result<(), Error> {
        if self.branch.trim().is_empty() {
            return Err(Error::Validation("branch must not be empty".into()));
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
