//! Custom resource definitions for the `git.galos.one/v1` API group.

mod common;
mod gitcommit;
mod pullrequest;

pub use common::{
    EncryptionSpec, ExecutionRecord, ExtractionStrategy, FieldRef, FileSpec, HISTORY_DEFAULT,
    HISTORY_MAX, HISTORY_MIN, Phase, RecipientSpec, RecipientType, ResourceRef, RestApiSpec,
    SecretKeyRef, StrategyType, TTL_MINUTES_MAX, TTL_MINUTES_MIN, WriteMode, history_limit,
};
pub use gitcommit::{GitCommit, GitCommitSpec, GitCommitStatus};
pub use pullrequest::{PullRequest, PullRequestSpec, PullRequestStatus};
