//! # gitchange
//!
//! Core library behind the gitchange operator: a cluster-resident control
//! loop that turns declarative Git-change objects into real commits and pull
//! requests.
//!
//! Two custom resources in the `git.galos.one/v1` group drive it:
//!
//! - **GitCommit** pushes a commit directly to a branch.
//! - **PullRequest** pushes a head branch and opens a pull request.
//!
//! Both assemble their file content from three sources, in order: literal
//! `files`, cluster objects referenced through `resourceRefs` (dumped as
//! YAML, exploded per data key, or reduced to a single field), and
//! `restAPIs` entries whose JSON responses pass through an expression
//! pipeline (condition, data extraction, output format). Optional age
//! encryption runs over every file before it is staged.
//!
//! ## Tick pipeline
//!
//! 1. [`api`] validation mirrors admission and rejects bad specs outright.
//! 2. The schedule gate ([`reconcile`]) handles `suspend`, cron schedules
//!    (`gitchange-cron`), and the TTL sweep for one-shot objects.
//! 3. [`secrets`] resolves the auth secret (token, or username/password).
//! 4. [`resource_refs`] and [`rest`] produce file entries; [`content`]
//!    merges them with the literal files under the write-mode rules.
//! 5. [`git`] clones shallowly into a tick-local scratch directory,
//!    applies and optionally encrypts the files, commits, and pushes with
//!    backoff (`gitchange-retry`).
//! 6. For pull requests, [`forge`] opens (or idempotently finds) the PR.
//!
//! The reconcilers are the only status writers. Every tick runs under a
//! deadline and the runtime serializes ticks per object.
//!
//! ## Modules
//!
//! - [`api`] — CRD types, validation, status structures
//! - [`config`] — operator runtime knobs from the environment
//! - [`content`] — content assembly and path safety
//! - [`resource_refs`] — dynamic-object extraction strategies
//! - [`rest`] — REST integrations and their metric contract
//! - [`git`] — the git worker
//! - [`forge`] — pull-request creation seam and GitHub client
//! - [`secrets`] — credential and recipient resolution
//! - [`metrics`] — process-global registry and the serving router
//! - [`reconcile`] — the two control loops

pub mod api;
pub mod config;
pub mod content;
mod error;
pub mod forge;
pub mod git;
pub mod metrics;
pub mod reconcile;
pub mod resource_refs;
pub mod rest;
pub mod secrets;

pub use config::{ControllerKind, OperatorConfig};
pub use error::Error;
