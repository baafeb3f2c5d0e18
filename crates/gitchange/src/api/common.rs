//! Types shared between the `GitCommit` and `PullRequest` kinds.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A literal file carried inline in the spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    /// Repository-relative path.
    pub path: String,
    /// File content, written as-is.
    pub content: String,
}

/// How produced content meets a file that already exists at the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum WriteMode {
    /// Replace the previous content.
    #[default]
    Overwrite,
    /// Append after the previous content, separated by a single newline when
    /// the previous content does not already end with one.
    Append,
}

/// A reference to an arbitrary cluster object whose content becomes files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// `apiVersion` of the referenced object (for example `v1` or
    /// `apps/v1`).
    pub api_version: String,
    /// Kind of the referenced object.
    pub kind: String,
    /// Name of the referenced object.
    pub name: String,
    /// Namespace of the referenced object; defaults to the owning object's
    /// namespace.
    #[serde(default)]
    pub namespace: Option<String>,
    /// How the object is turned into files.
    pub strategy: ExtractionStrategy,
}

/// Extraction strategy for a [`ResourceRef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionStrategy {
    /// Which extraction runs.
    pub r#type: StrategyType,
    /// Output path: the file for `dump`, the directory for `fields` and
    /// `single-field`.
    pub path: String,
    /// Write mode applied to the produced files.
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Key selection, required for `single-field`.
    #[serde(default)]
    pub field_ref: Option<FieldRef>,
}

/// The three extraction strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyType {
    /// Serialize the whole object as YAML.
    Dump,
    /// One file per entry of the object's data maps.
    Fields,
    /// A single entry of the object's data maps.
    SingleField,
}

/// Selects one key of the referenced object's data maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    /// Key to read.
    pub key: String,
    /// File name to emit; defaults to the key.
    #[serde(default)]
    pub file_name: Option<String>,
}

/// A REST endpoint whose JSON payload becomes a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RestApiSpec {
    /// Entry name, used in logs.
    pub name: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request URL.
    pub url: String,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Option<String>,
    /// Boolean expression gating output; empty means always.
    #[serde(default)]
    pub condition: String,
    /// Expression extracting data from the response; empty extracts nothing.
    #[serde(default)]
    pub data_expression: String,
    /// Expression shaping the written content; empty passes the extracted
    /// data through.
    #[serde(default)]
    pub output_format: String,
    /// Repository-relative path the output is written to.
    pub output_path: String,
    /// Write mode for the output file.
    #[serde(default)]
    pub write_mode: WriteMode,
    /// Prefix the output with an RFC 3339 timestamp and a comma (empty
    /// output format only).
    #[serde(default)]
    pub include_timestamp: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Encryption settings for committed files.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionSpec {
    /// Whether files are encrypted before staging.
    #[serde(default)]
    pub enabled: bool,
    /// Who can read the encrypted files.
    #[serde(default)]
    pub recipients: Vec<RecipientSpec>,
    /// Extension appended to encrypted files; defaults to `.age`.
    #[serde(default)]
    pub file_extension: Option<String>,
}

/// One encryption recipient, inline or resolved from a secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecipientSpec {
    /// Recipient class.
    pub r#type: RecipientType,
    /// Literal recipient string (X25519 recipient, SSH public key line, or
    /// passphrase). Wins over `secretRef` when both are set.
    #[serde(default)]
    pub value: Option<String>,
    /// Secret holding the recipient string.
    #[serde(default)]
    pub secret_ref: Option<SecretKeyRef>,
}

/// Recipient classes supported by the encryption codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RecipientType {
    Age,
    Ssh,
    Passphrase,
}

/// A `(secret name, key)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Lifecycle phase of a desired-state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    Pending,
    Running,
    Committed,
    Created,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Committed => "Committed",
            Phase::Created => "Created",
            Phase::Failed => "Failed",
        }
    }
}

/// Outcome of one scheduled execution, kept in the bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// When the execution ran (RFC 3339).
    pub execution_time: String,
    /// Terminal phase of the execution.
    pub phase: Phase,
    /// Commit SHA or error summary.
    #[serde(default)]
    pub message: Option<String>,
    /// Pull request number (PullRequest kind only).
    #[serde(default)]
    pub pull_request_number: Option<u64>,
    /// Pull request URL (PullRequest kind only).
    #[serde(default, rename = "pullRequestURL")]
    pub pull_request_url: Option<String>,
}

/// Bounds on `ttlMinutes`.
pub const TTL_MINUTES_MIN: u32 = 1;
pub const TTL_MINUTES_MAX: u32 = 43_200;
/// Bounds and default for `maxExecutionHistory`.
pub const HISTORY_MIN: u32 = 1;
pub const HISTORY_MAX: u32 = 100;
pub const HISTORY_DEFAULT: u32 = 10;

/// Validation shared by both kinds; returns the offending reason.
pub(crate) fn validate_common(
    repository: &str,
    commit_message: &str,
    auth_secret_ref: &str,
    files: &[FileSpec],
    resource_refs: &[ResourceRef],
    rest_apis: &[RestApiSpec],
    schedule: Option<&str>,
    ttl_minutes: Option<u32>,
    max_execution_history: Option<u32>,
) -> Result<(), crate::Error> {
    use crate::content::ensure_safe_path;

    if repository.trim().is_empty() {
        return Err(crate::Error::Validation("repository must not be empty".into()));
    }
    if commit_message.trim().is_empty() {
        return Err(crate::Error::Validation(
            "commitMessage must not be empty".into(),
        ));
    }
    if auth_secret_ref.trim().is_empty() {
        return Err(crate::Error::Validation(
            "authSecretRef must not be empty".into(),
        ));
    }

    for file in files {
        ensure_safe_path(&file.path)?;
    }
    for r in resource_refs {
        ensure_safe_path(&r.strategy.path)?;
        if r.strategy.r#type == StrategyType::SingleField && r.strategy.field_ref.is_none() {
            return Err(crate::Error::Validation(format!(
                "resourceRef {:?} uses single-field without a fieldRef",
                r.name
            )));
        }
        if let Some(field_ref) = &r.strategy.field_ref {
            if let Some(file_name) = &field_ref.file_name {
                ensure_safe_path(file_name)?;
            }
        }
    }
    for entry in rest_apis {
        ensure_safe_path(&entry.output_path)?;
        if entry.url.trim().is_empty() {
            return Err(crate::Error::Validation(format!(
                "restAPI {:?} has an empty url",
                entry.name
            )));
        }
    }

    if let Some(expr) = schedule {
        gitchange_cron::validate(expr)
            .map_err(|e| crate::Error::ScheduleInvalid(e.to_string()))?;
    } else if let Some(ttl) = ttl_minutes {
        if !(TTL_MINUTES_MIN..=TTL_MINUTES_MAX).contains(&ttl) {
            return Err(crate::Error::Validation(format!(
                "ttlMinutes must be within {TTL_MINUTES_MIN}..={TTL_MINUTES_MAX}, got {ttl}"
            )));
        }
    }

    if let Some(limit) = max_execution_history {
        if !(HISTORY_MIN..=HISTORY_MAX).contains(&limit) {
            return Err(crate::Error::Validation(format!(
                "maxExecutionHistory must be within {HISTORY_MIN}..={HISTORY_MAX}, got {limit}"
            )));
        }
    }

    Ok(())
}

/// Effective history bound for an object.
pub fn history_limit(max_execution_history: Option<u32>) -> usize {
    max_execution_history
        .unwrap_or(HISTORY_DEFAULT)
        .clamp(HISTORY_MIN, HISTORY_MAX) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&WriteMode::Overwrite).unwrap(),
            "\"overwrite\""
        );
        assert_eq!(
            serde_json::to_string(&WriteMode::Append).unwrap(),
            "\"append\""
        );
    }

    #[test]
    fn strategy_type_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&StrategyType::SingleField).unwrap(),
            "\"single-field\""
        );
        let parsed: StrategyType = serde_json::from_str("\"dump\"").unwrap();
        assert_eq!(parsed, StrategyType::Dump);
    }

    #[test]
    fn rest_api_defaults() {
        let entry: RestApiSpec = serde_json::from_str(
            r#"{"name": "metrics", "url": "http://example/api", "outputPath": "out.txt"}"#,
        )
        .unwrap();
        assert_eq!(entry.method, "GET");
        assert_eq!(entry.write_mode, WriteMode::Overwrite);
        assert!(!entry.include_timestamp);
        assert!(entry.condition.is_empty());
    }

    #[test]
    fn execution_record_uses_camel_case_and_url_spelling() {
        let record = ExecutionRecord {
            execution_time: "2026-01-01T00:00:00Z".into(),
            phase: Phase::Created,
            message: None,
            pull_request_number: Some(7),
            pull_request_url: Some("https://example/pr/7".into()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["executionTime"], "2026-01-01T00:00:00Z");
        assert_eq!(json["phase"], "Created");
        assert_eq!(json["pullRequestNumber"], 7);
        assert_eq!(json["pullRequestURL"], "https://example/pr/7");
    }

    #[test]
    fn history_limit_defaults_and_clamps() {
        assert_eq!(history_limit(None), 10);
        assert_eq!(history_limit(Some(3)), 3);
        assert_eq!(history_limit(Some(0)), 1);
        assert_eq!(history_limit(Some(500)), 100);
    }
}
