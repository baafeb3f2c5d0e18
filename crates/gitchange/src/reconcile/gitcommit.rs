//! The `GitCommit` control loop.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use kube::ResourceExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;

use super::{
    Context, Gate, TtlDecision, advance_schedule, push_history, requeue_until, rfc3339,
    schedule_gate, ttl_decision,
};
use crate::Error;
use crate::api::{ExecutionRecord, GitCommit, GitCommitStatus, Phase};
use crate::config::ControllerKind;
use crate::content;
use crate::git::{CommitOutcome, GitAuthor, GitWorker};
use crate::resource_refs;
use crate::rest;
use crate::secrets;

/// One reconciliation tick.
pub async fn reconcile(object: Arc<GitCommit>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = object.name_any();
    let namespace = object.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<GitCommit> = Api::namespaced(ctx.client.clone(), &namespace);
    let now = Utc::now();
    let mut status = object.status.clone().unwrap_or_default();

    if let Err(err) = object.spec.validate() {
        tracing::warn!(%namespace, %name, error = %err, "gitcommit rejected");
        fail(&mut status, &err);
        patch_status(&api, &name, &status).await?;
        return Ok(Action::await_change());
    }

    let creation = object
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|t| t.0)
        .unwrap_or(now);
    let gate = match schedule_gate(
        object.spec.schedule.as_deref(),
        object.spec.suspend,
        status.last_scheduled_time.as_deref(),
        creation,
        now,
    ) {
        Ok(gate) => gate,
        Err(err) => {
            fail(&mut status, &err);
            patch_status(&api, &name, &status).await?;
            return Ok(Action::await_change());
        }
    };

    match gate {
        Gate::Suspended => {
            if status.next_scheduled_time.is_some() {
                status.next_scheduled_time = None;
                patch_status(&api, &name, &status).await?;
            }
            return Ok(Action::requeue(ctx.config.suspend_poll()));
        }
        Gate::NotDue { next } => {
            let next_str = rfc3339(next);
            let needs_patch = status.next_scheduled_time.as_deref() != Some(next_str.as_str())
                || !matches!(status.phase, Some(Phase::Pending));
            if needs_patch {
                // A finished scheduled execution parks at Pending until the
                // next fire.
                status.phase = Some(Phase::Pending);
                status.reason = None;
                status.message = None;
                status.next_scheduled_time = Some(next_str);
                patch_status(&api, &name, &status).await?;
            }
            return Ok(requeue_until(now, next));
        }
        Gate::Due => {}
    }

    let generation = object.metadata.generation;
    if object.spec.schedule.is_none()
        && matches!(status.phase, Some(Phase::Committed))
        && status.observed_generation == generation
    {
        // Already done for this spec; only the TTL sweep remains.
        return sweep_ttl(&api, &name, &object, status.last_sync.as_deref()).await;
    }

    status.phase = Some(Phase::Pending);
    status.reason = None;
    status.message = None;
    status.observed_generation = generation;
    patch_status(&api, &name, &status).await?;

    status.phase = Some(Phase::Running);
    patch_status(&api, &name, &status).await?;
    tracing::info!(%namespace, %name, "gitcommit tick running");

    let tick_budget = ctx.config.tick_deadline(ControllerKind::GitCommit);
    let deadline = Instant::now() + tick_budget;
    let result = match tokio::time::timeout(
        tick_budget,
        execute(&object, &ctx, &namespace, now.timestamp(), deadline),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded),
    };

    let completed = Utc::now();
    match result {
        Ok(outcome) => {
            tracing::info!(%namespace, %name, sha = %outcome.sha, changed = outcome.changed, "gitcommit tick committed");
            status.phase = Some(Phase::Committed);
            status.reason = None;
            status.message = Some(if outcome.changed {
                format!("committed {}", outcome.sha)
            } else {
                format!("no changes; branch already at {}", outcome.sha)
            });
            status.commit_sha = Some(outcome.sha.clone());
            status.last_sync = Some(rfc3339(completed));

            if let Some(expr) = object.spec.schedule.as_deref() {
                let record = ExecutionRecord {
                    execution_time: rfc3339(completed),
                    phase: Phase::Committed,
                    message: Some(outcome.sha),
                    pull_request_number: None,
                    pull_request_url: None,
                };
                let action = record_scheduled(&mut status, expr, record, &object, completed)?;
                patch_status(&api, &name, &status).await?;
                return Ok(action);
            }

            patch_status(&api, &name, &status).await?;
            sweep_ttl(&api, &name, &object, status.last_sync.as_deref()).await
        }
        Err(err) => {
            tracing::warn!(%namespace, %name, error = %err, reason = err.reason(), "gitcommit tick failed");
            fail(&mut status, &err);

            if let Some(expr) = object.spec.schedule.as_deref() {
                let record = ExecutionRecord {
                    execution_time: rfc3339(completed),
                    phase: Phase::Failed,
                    message: Some(err.to_string()),
                    pull_request_number: None,
                    pull_request_url: None,
                };
                let action = record_scheduled(&mut status, expr, record, &object, completed)?;
                patch_status(&api, &name, &status).await?;
                return Ok(action);
            }

            patch_status(&api, &name, &status).await?;
            if err.retryable() {
                Ok(Action::requeue(ctx.config.error_requeue()))
            } else {
                Ok(Action::await_change())
            }
        }
    }
}

/// Requeue policy for errors escaping [`reconcile`] itself (status patch
/// failures and the like).
pub fn error_policy(_object: Arc<GitCommit>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::warn!(error = %error, "gitcommit reconcile errored outside the tick");
    Action::requeue(ctx.config.error_requeue())
}

/// Resolve, extract, assemble, commit.
async fn execute(
    object: &GitCommit,
    ctx: &Context,
    namespace: &str,
    now: i64,
    deadline: Instant,
) -> Result<CommitOutcome, Error> {
    let spec = &object.spec;

    let credentials = secrets::resolve_auth(
        &ctx.client,
        namespace,
        &spec.auth_secret_ref,
        spec.auth_secret_key.as_deref(),
    )
    .await?;

    let mut extracted = Vec::new();
    for resource_ref in &spec.resource_refs {
        extracted.extend(resource_refs::fetch_and_extract(&ctx.client, namespace, resource_ref).await?);
    }

    let rest_files = rest::run_entries(
        &ctx.http,
        ControllerKind::GitCommit,
        &spec.rest_apis,
        now,
        ctx.config.expression_fuel,
    )
    .await?;

    let files = content::assemble(&spec.files, extracted, rest_files)?;

    let author = GitAuthor {
        name: ctx.config.author_name.clone(),
        email: ctx.config.author_email.clone(),
    };
    let mut worker = GitWorker::new(
        &spec.repository,
        &credentials,
        &author,
        &spec.commit_message,
        &ctx.config.backoff,
        deadline,
    )
    .with_program(&ctx.config.git_bin);
    if let Some(encryption) = &spec.encryption {
        if encryption.enabled {
            let recipients = secrets::resolve_recipients(&ctx.client, namespace, encryption).await?;
            let cfg = gitchange_encrypt::EncryptionConfig {
                enabled: true,
                file_extension: encryption.file_extension.clone(),
            };
            worker = worker.with_encryption(cfg, recipients);
        }
    }

    worker.commit_to_branch(&spec.branch, &files).await
}

fn fail(status: &mut GitCommitStatus, err: &Error) {
    status.phase = Some(Phase::Failed);
    status.reason = Some(err.reason().to_string());
    status.message = Some(err.to_string());
}

/// Book-keeping after a scheduled execution: history, `lastScheduledTime`,
/// `nextScheduledTime`, and the requeue at the next fire.
fn record_scheduled(
    status: &mut GitCommitStatus,
    expr: &str,
    record: ExecutionRecord,
    object: &GitCommit,
    completed: chrono::DateTime<Utc>,
) -> Result<Action, Error> {
    push_history(
        &mut status.execution_history,
        record,
        crate::api::history_limit(object.spec.max_execution_history),
    );
    let (last, next) = advance_schedule(expr, completed)?;
    status.last_scheduled_time = Some(last);
    status.next_scheduled_time = Some(rfc3339(next));
    Ok(requeue_until(completed, next))
}

async fn sweep_ttl(
    api: &Api<GitCommit>,
    name: &str,
    object: &GitCommit,
    completed_at: Option<&str>,
) -> Result<Action, Error> {
    match ttl_decision(
        object.spec.ttl_minutes,
        object.spec.schedule.as_deref(),
        completed_at,
        Utc::now(),
    ) {
        TtlDecision::DeleteNow => {
            tracing::info!(%name, "gitcommit ttl expired, deleting");
            api.delete(name, &Default::default()).await?;
            Ok(Action::await_change())
        }
        TtlDecision::RecheckIn(wait) => Ok(Action::requeue(wait)),
        TtlDecision::Keep => Ok(Action::await_change()),
    }
}

async fn patch_status(
    api: &Api<GitCommit>,
    name: &str,
    status: &GitCommitStatus,
) -> Result<(), Error> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
