//! The `PullRequest` control loop.
//!
//! Identical skeleton to the `GitCommit` loop, ending in the forge call and
//! pull-request bookkeeping: terminal success phase is `Created`, execution
//! records carry the PR number and URL.

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
use crate::api::{ExecutionRecord, Phase, PullRequest, PullRequestStatus};
use crate::config::ControllerKind;
use crate::content;
use crate::forge::{CreatePullRequest, PullRequestHandle, create_with_retry};
use crate::git::{CommitOutcome, GitAuthor, GitWorker};
use crate::resource_refs;
use crate::rest;
use crate::secrets;

/// One reconciliation tick.
pub async fn reconcile(object: Arc<PullRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = object.name_any();
    let namespace = object.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<PullRequest> = Api::namespaced(ctx.client.clone(), &namespace);
    let now = Utc::now();
    let mut status = object.status.clone().unwrap_or_default();

    if let Err(err) = object.spec.validate() {
        tracing::warn!(%namespace, %name, error = %err, "pullrequest rejected");
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
        && matches!(status.phase, Some(Phase::Created))
        && status.observed_generation == generation
    {
        return sweep_ttl(&api, &name, &object, status.last_sync.as_deref()).await;
    }

    status.phase = Some(Phase::Pending);
    status.reason = None;
    status.message = None;
    status.observed_generation = generation;
    patch_status(&api, &name, &status).await?;

    status.phase = Some(Phase::Running);
    patch_status(&api, &name, &status).await?;
    tracing::info!(%namespace, %name, "pullrequest tick running");

    let tick_budget = ctx.config.tick_deadline(ControllerKind::PullRequest);
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
        Ok((outcome, handle)) => {
            tracing::info!(
                %namespace, %name,
                sha = %outcome.sha,
                pr = handle.number,
                "pullrequest tick created"
            );
            status.phase = Some(Phase::Created);
            status.reason = None;
            status.message = Some(format!("pull request #{} open", handle.number));
            status.commit_sha = Some(outcome.sha);
            status.pull_request_number = Some(handle.number);
            status.pull_request_url = Some(handle.url.clone());
            status.last_sync = Some(rfc3339(completed));

            if let Some(expr) = object.spec.schedule.as_deref() {
                let record = ExecutionRecord {
                    execution_time: rfc3339(completed),
                    phase: Phase::Created,
                    message: status.commit_sha.clone(),
                    pull_request_number: Some(handle.number),
                    pull_request_url: Some(handle.url),
                };
                let action = record_scheduled(&mut status, expr, record, &object, completed)?;
                patch_status(&api, &name, &status).await?;
                return Ok(action);
            }

            patch_status(&api, &name, &status).await?;
            sweep_ttl(&api, &name, &object, status.last_sync.as_deref()).await
        }
        Err(err) => {
            tracing::warn!(%namespace, %name, error = %err, reason = err.reason(), "pullrequest tick failed");
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

/// Requeue policy for errors escaping [`reconcile`] itself.
pub fn error_policy(_object: Arc<PullRequest>, error: &Error, ctx: Arc<Context>) -> Action {
    tracing::warn!(error = %error, "pullrequest reconcile errored outside the tick");
    Action::requeue(ctx.config.error_requeue())
}

/// Resolve, extract, assemble, push the head branch, open the pull request.
async fn execute(
    object: &PullRequest,
    ctx: &Context,
    namespace: &str,
    now: i64,
    deadline: Instant,
) -> Result<(CommitOutcome, PullRequestHandle), Error> {
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
        ControllerKind::PullRequest,
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

    let outcome = worker
        .push_head_branch(&spec.base_branch, &spec.head_branch, &files)
        .await?;

    let token = credentials
        .forge_token()
        .ok_or_else(|| Error::AuthResolution("auth secret has no token for the forge API".into()))?
        .to_string();
    let request = CreatePullRequest {
        repository: &spec.repository,
        base: &spec.base_branch,
        head: &spec.head_branch,
        title: &spec.title,
        body: spec.body.as_deref().unwrap_or_default(),
        token: &token,
    };
    let handle = create_with_retry(&ctx.forge, &request, &ctx.config.backoff, deadline).await?;

    Ok((outcome, handle))
}

fn fail(status: &mut PullRequestStatus, err: &Error) {
    status.phase = Some(Phase::Failed);
    status.reason = Some(err.reason().to_string());
    status.message = Some(err.to_string());
}

fn record_scheduled(
    status: &mut PullRequestStatus,
    expr: &str,
    record: ExecutionRecord,
    object: &PullRequest,
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
    api: &Api<PullRequest>,
    name: &str,
    object: &PullRequest,
    completed_at: Option<&str>,
) -> Result<Action, Error> {
    match ttl_decision(
        object.spec.ttl_minutes,
        object.spec.schedule.as_deref(),
        completed_at,
        Utc::now(),
    ) {
        TtlDecision::DeleteNow => {
            tracing::info!(%name, "pullrequest ttl expired, deleting");
            api.delete(name, &Default::default()).await?;
            Ok(Action::await_change())
        }
        TtlDecision::RecheckIn(wait) => Ok(Action::requeue(wait)),
        TtlDecision::Keep => Ok(Action::await_change()),
    }
}

async fn patch_status(
    api: &Api<PullRequest>,
    name: &str,
    status: &PullRequestStatus,
) -> Result<(), Error> {
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}
