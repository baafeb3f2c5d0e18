use gitchange_encrypt::EncryptError;
use gitchange_expr::ExprError;
use thiserror::Error;

use crate::forge::ForgeError;

/// Everything a reconciliation tick can fail with.
///
/// Each variant maps to a machine-readable reason written into the object's
/// status and a retry classification: terminal errors wait for a spec change,
/// retryable ones requeue with backoff.
#[derive(Debug, Error)]
pub enum Error {
    /// Schema-level validation failure (empty required field, unsafe path).
    #[error("validation failed: {0}")]
    Validation(String),
    /// The schedule expression does not parse or can never fire.
    #[error("invalid schedule: {0}")]
    ScheduleInvalid(String),
    /// `headBranch` equals `baseBranch`.
    #[error("branch conflict: {0}")]
    BranchConflict(String),
    /// The auth secret is missing, unreadable, or lacks usable keys.
    #[error("auth secret resolution failed: {0}")]
    AuthResolution(String),
    /// Expression compilation or evaluation failed.
    #[error(transparent)]
    Expr(#[from] ExprError),
    /// A REST response body was not valid JSON.
    #[error("response is not valid JSON: {0}")]
    JsonParse(String),
    /// A `single-field` extraction referenced an absent key.
    #[error("field {0:?} not found in referenced object")]
    FieldNotFound(String),
    /// The encryption codec rejected its input.
    #[error(transparent)]
    Encrypt(#[from] EncryptError),
    /// The scratch clone could not be created.
    #[error("git clone failed: {0}")]
    GitClone(String),
    /// Pushing ran out of retries inside the tick deadline.
    #[error("git push failed: {0}")]
    GitPush(String),
    /// Any other git subprocess failure.
    #[error("git operation failed: {0}")]
    Git(String),
    /// REST request transport failure.
    #[error("http request failed: {0}")]
    Http(String),
    /// Forge API failure.
    #[error(transparent)]
    Forge(#[from] ForgeError),
    /// The tick deadline elapsed with work still in flight.
    #[error("tick deadline exceeded")]
    DeadlineExceeded,
    /// Kubernetes API failure (object fetch, status patch).
    #[error(transparent)]
    Kube(#[from] kube::Error),
    /// Anything that does not fit the taxonomy above.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// The reason string recorded in the object's status.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::ScheduleInvalid(_) => "ScheduleInvalid",
            Error::BranchConflict(_) => "BranchConflict",
            Error::AuthResolution(_) => "AuthResolutionFailed",
            Error::Expr(ExprError::Compile(_)) => "CompileError",
            Error::Expr(ExprError::Eval(_)) => "EvalError",
            Error::Expr(ExprError::TypeMismatch { .. }) => "ExprTypeMismatch",
            Error::JsonParse(_) => "JSONParseError",
            Error::FieldNotFound(_) => "FieldNotFound",
            Error::Encrypt(EncryptError::IncompatibleRecipients) => "IncompatibleRecipients",
            Error::Encrypt(_) => "EncryptionFailed",
            Error::GitClone(_) => "GitCloneFailed",
            Error::GitPush(_) => "GitPushFailed",
            Error::Git(_) => "GitOperationFailed",
            Error::Http(_) => "UpstreamError",
            Error::Forge(ForgeError::AuthFailed(_)) => "AuthFailed",
            Error::Forge(ForgeError::RateLimited { .. }) => "RateLimited",
            Error::Forge(ForgeError::Upstream(_)) => "UpstreamError",
            Error::DeadlineExceeded => "DeadlineExceeded",
            Error::Kube(_) => "KubeAPIError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Whether the tick should requeue with backoff rather than wait for a
    /// spec change.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Error::AuthResolution(_)
                | Error::GitClone(_)
                | Error::GitPush(_)
                | Error::Git(_)
                | Error::Http(_)
                | Error::Forge(_)
                | Error::DeadlineExceeded
                | Error::Kube(_)
                | Error::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_match_the_status_contract() {
        assert_eq!(Error::Validation("x".into()).reason(), "ValidationError");
        assert_eq!(Error::AuthResolution("x".into()).reason(), "AuthResolutionFailed");
        assert_eq!(
            Error::Expr(ExprError::Compile("x".into())).reason(),
            "CompileError"
        );
        assert_eq!(
            Error::Expr(ExprError::TypeMismatch {
                expected: "a".into(),
                found: "b".into()
            })
            .reason(),
            "ExprTypeMismatch"
        );
        assert_eq!(Error::JsonParse("x".into()).reason(), "JSONParseError");
        assert_eq!(
            Error::Encrypt(EncryptError::IncompatibleRecipients).reason(),
            "IncompatibleRecipients"
        );
        assert_eq!(Error::GitPush("x".into()).reason(), "GitPushFailed");
        assert_eq!(Error::DeadlineExceeded.reason(), "DeadlineExceeded");
    }

    #[test]
    fn terminal_errors_do_not_retry() {
        assert!(!Error::Validation("x".into()).retryable());
        assert!(!Error::ScheduleInvalid("x".into()).retryable());
        assert!(!Error::BranchConflict("x".into()).retryable());
        assert!(!Error::FieldNotFound("x".into()).retryable());
        assert!(!Error::JsonParse("x".into()).retryable());
        assert!(!Error::Encrypt(EncryptError::IncompatibleRecipients).retryable());
    }

    #[test]
    fn transient_errors_retry() {
        assert!(Error::AuthResolution("x".into()).retryable());
        assert!(Error::GitClone("x".into()).retryable());
        assert!(Error::GitPush("x".into()).retryable());
        assert!(Error::DeadlineExceeded.retryable());
        assert!(
            Error::Forge(ForgeError::RateLimited {
                retry_after: Some(1)
            })
            .retryable()
        );
    }
}
