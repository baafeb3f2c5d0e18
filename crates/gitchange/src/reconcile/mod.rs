//! Reconciliation: the control loops turning desired Git changes into
//! commits and pull requests.
//!
//! Both kinds share the same tick skeleton: validate, gate on suspension and
//! schedule, resolve credentials, assemble content, run the git worker (and
//! the forge for pull requests), then write status. The runtime serializes
//! ticks per object, so nothing here locks.

mod gitcommit;
mod pullrequest;

pub use gitcommit::{error_policy as gitcommit_error_policy, reconcile as reconcile_gitcommit};
pub use pullrequest::{
    error_policy as pullrequest_error_policy, reconcile as reconcile_pullrequest,
};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use gitchange_cron::Schedule;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::Client;

use crate::Error;
use crate::api::{ExecutionRecord, GitCommit, PullRequest};
use crate::config::OperatorConfig;
use crate::forge::GithubForge;

/// Shared state handed to every tick.
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub http: reqwest::Client,
    pub forge: GithubForge,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        let http = reqwest::Client::new();
        let forge = GithubForge::new(http.clone());
        Self {
            client,
            config,
            http,
            forge,
        }
    }
}

/// Run both controllers until shutdown.
pub async fn run(ctx: Arc<Context>) {
    let commits = Controller::new(
        Api::<GitCommit>::all(ctx.client.clone()),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(reconcile_gitcommit, gitcommit_error_policy, ctx.clone())
    .for_each(|result| async move {
        match result {
            Ok((object, _)) => tracing::debug!(object = %object.name, "gitcommit reconciled"),
            Err(e) => tracing::warn!(error = %e, "gitcommit reconcile error"),
        }
    });

    let pull_requests = Controller::new(
        Api::<PullRequest>::all(ctx.client.clone()),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(reconcile_pullrequest, pullrequest_error_policy, ctx.clone())
    .for_each(|result| async move {
        match result {
            Ok((object, _)) => tracing::debug!(object = %object.name, "pullrequest reconciled"),
            Err(e) => tracing::warn!(error = %e, "pullrequest reconcile error"),
        }
    });

    tokio::join!(commits, pull_requests);
}

/// Outcome of the suspension/schedule gate at the top of every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Suspended: clear `nextScheduledTime`, poll again later.
    Suspended,
    /// Scheduled but not yet due; `next` is the pending fire time.
    NotDue { next: DateTime<Utc> },
    /// Execute now.
    Due,
}

/// Decide whether this tick executes.
///
/// A scheduled object is due when `now` reached the first fire time after
/// `lastScheduledTime` (or after creation, before the first execution).
pub(crate) fn schedule_gate(
    schedule: Option<&str>,
    suspend: bool,
    last_scheduled_time: Option<&str>,
    creation: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Gate, Error> {
    if suspend {
        return Ok(Gate::Suspended);
    }
    let Some(expr) = schedule else {
        return Ok(Gate::Due);
    };
    let schedule = Schedule::parse(expr).map_err(|e| Error::ScheduleInvalid(e.to_string()))?;
    let base = match last_scheduled_time {
        Some(raw) => parse_rfc3339(raw)?,
        None => creation,
    };
    let next = schedule
        .next_after(base)
        .ok_or_else(|| Error::ScheduleInvalid("schedule never fires again".to_string()))?;
    if now >= next {
        Ok(Gate::Due)
    } else {
        Ok(Gate::NotDue { next })
    }
}

/// Advance a schedule after an execution: returns the new
/// `(lastScheduledTime, next fire time)` pair.
pub(crate) fn advance_schedule(
    expr: &str,
    now: DateTime<Utc>,
) -> Result<(String, DateTime<Utc>), Error> {
    let schedule = Schedule::parse(expr).map_err(|e| Error::ScheduleInvalid(e.to_string()))?;
    let next = schedule
        .next_after(now)
        .ok_or_else(|| Error::ScheduleInvalid("schedule never fires again".to_string()))?;
    Ok((rfc3339(now), next))
}

/// Append a record, evicting the oldest entries beyond `limit`.
pub(crate) fn push_history(
    history: &mut Vec<ExecutionRecord>,
    record: ExecutionRecord,
    limit: usize,
) {
    history.push(record);
    let excess = history.len().saturating_sub(limit);
    if excess > 0 {
        history.drain(..excess);
    }
}

/// What the TTL sweep does with a completed one-shot object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TtlDecision {
    Keep,
    DeleteNow,
    RecheckIn(Duration),
}

/// TTL applies to completed one-shot objects only; a schedule disables it.
pub(crate) fn ttl_decision(
    ttl_minutes: Option<u32>,
    schedule: Option<&str>,
    completed_at: Option<&str>,
    now: DateTime<Utc>,
) -> TtlDecision {
    if schedule.is_some() {
        return TtlDecision::Keep;
    }
    let (Some(minutes), Some(completed_raw)) = (ttl_minutes, completed_at) else {
        return TtlDecision::Keep;
    };
    let Ok(completed) = DateTime::parse_from_rfc3339(completed_raw) else {
        return TtlDecision::Keep;
    };
    let expiry = completed.with_timezone(&Utc) + chrono::Duration::minutes(i64::from(minutes));
    if now >= expiry {
        TtlDecision::DeleteNow
    } else {
        TtlDecision::RecheckIn(
            (expiry - now)
                .to_std()
                .unwrap_or_else(|_| Duration::from_secs(1)),
        )
    }
}

/// Requeue at `at`, never sooner than one second out.
pub(crate) fn requeue_until(now: DateTime<Utc>, at: DateTime<Utc>) -> Action {
    let wait = (at - now)
        .to_std()
        .unwrap_or_else(|_| Duration::from_secs(0))
        .max(Duration::from_secs(1));
    Action::requeue(wait)
}

pub(crate) fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp {raw:?} in status: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Phase;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn suspension_short_circuits_everything() {
        let gate = schedule_gate(Some("* * * * *"), true, None, at(9, 0), at(12, 0)).unwrap();
        assert_eq!(gate, Gate::Suspended);
        let gate = schedule_gate(None, true, None, at(9, 0), at(12, 0)).unwrap();
        assert_eq!(gate, Gate::Suspended);
    }

    #[test]
    fn one_shot_objects_are_always_due() {
        let gate = schedule_gate(None, false, None, at(9, 0), at(9, 0)).unwrap();
        assert_eq!(gate, Gate::Due);
    }

    #[test]
    fn first_scheduled_fire_counts_from_creation() {
        // Created 09:00, hourly schedule: due from 10:00.
        let gate = schedule_gate(Some("0 * * * *"), false, None, at(9, 0), at(9, 30)).unwrap();
        assert_eq!(gate, Gate::NotDue { next: at(10, 0) });

        let gate = schedule_gate(Some("0 * * * *"), false, None, at(9, 0), at(10, 0)).unwrap();
        assert_eq!(gate, Gate::Due);
    }

    #[test]
    fn subsequent_fires_count_from_last_scheduled_time() {
        let last = rfc3339(at(10, 0));
        let gate =
            schedule_gate(Some("0 * * * *"), false, Some(&last), at(9, 0), at(10, 30)).unwrap();
        assert_eq!(gate, Gate::NotDue { next: at(11, 0) });
    }

    #[test]
    fn bad_schedule_is_schedule_invalid() {
        let err = schedule_gate(Some("whenever"), false, None, at(9, 0), at(9, 0)).unwrap_err();
        assert_eq!(err.reason(), "ScheduleInvalid");
    }

    #[test]
    fn advance_schedule_moves_strictly_forward() {
        let (last, next) = advance_schedule("0 * * * *", at(10, 0)).unwrap();
        assert_eq!(last, "2026-03-10T10:00:00Z");
        assert_eq!(next, at(11, 0));
        assert!(next > at(10, 0));
    }

    #[test]
    fn history_evicts_oldest_first() {
        let record = |n: u64| ExecutionRecord {
            execution_time: format!("t{n}"),
            phase: Phase::Committed,
            message: None,
            pull_request_number: Some(n),
            pull_request_url: None,
        };
        let mut history = Vec::new();
        for n in 0..5 {
            push_history(&mut history, record(n), 3);
        }
        assert_eq!(history.len(), 3);
        let kept: Vec<u64> = history
            .iter()
            .filter_map(|r| r.pull_request_number)
            .collect();
        assert_eq!(kept, [2, 3, 4]);
    }

    #[test]
    fn ttl_is_ignored_under_a_schedule() {
        let completed = rfc3339(at(9, 0));
        let decision = ttl_decision(Some(1), Some("0 2 * * *"), Some(&completed), at(12, 0));
        assert_eq!(decision, TtlDecision::Keep);
    }

    #[test]
    fn ttl_deletes_after_expiry() {
        let completed = rfc3339(at(9, 0));
        assert_eq!(
            ttl_decision(Some(30), None, Some(&completed), at(9, 31)),
            TtlDecision::DeleteNow
        );
        match ttl_decision(Some(30), None, Some(&completed), at(9, 10)) {
            TtlDecision::RecheckIn(wait) => {
                assert_eq!(wait, Duration::from_secs(20 * 60));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn ttl_without_completion_keeps_the_object() {
        assert_eq!(ttl_decision(Some(30), None, None, at(9, 0)), TtlDecision::Keep);
    }

    #[test]
    fn requeue_never_sooner_than_a_second() {
        // Target in the past still yields a positive requeue.
        let action = requeue_until(at(10, 0), at(9, 0));
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
    }
}
