//! Git worker behavior against real local remotes.
//!
//! Each test seeds a bare repository in a scratch directory and points the
//! worker at it by path, so the full clone/commit/push path runs without any
//! network.

use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use gitchange::api::WriteMode;
use gitchange::content::FileEntry;
use gitchange::git::{GitAuthor, GitWorker};
use gitchange::secrets::GitCredentials;
use gitchange_encrypt::{EncryptionConfig, Identity, Recipient, decrypt};
use gitchange_retry::Backoff;
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn try_show(root: &Path, remote: &str, rev_path: &str) -> Option<Vec<u8>> {
    let output = Command::new("git")
        .args(["--git-dir", remote, "show", rev_path])
        .current_dir(root)
        .output()
        .expect("run git show");
    output.status.success().then_some(output.stdout)
}

fn show(root: &Path, remote: &str, rev_path: &str) -> Vec<u8> {
    try_show(root, remote, rev_path)
        .unwrap_or_else(|| panic!("{rev_path} not found in {remote}"))
}

/// Bare remote seeded with `README.md` and `notes.txt` on `main`.
fn seed_remote(root: &Path) -> String {
    let seed = root.join("seed");
    std::fs::create_dir(&seed).expect("mkdir seed");
    git(root, &["init", "-b", "main", "seed"]);
    std::fs::write(seed.join("README.md"), "seed\n").expect("write README");
    std::fs::write(seed.join("notes.txt"), "one\n").expect("write notes");
    git(&seed, &["add", "-A"]);
    git(
        &seed,
        &[
            "-c",
            "user.name=seed",
            "-c",
            "user.email=seed@local",
            "commit",
            "-m",
            "seed",
        ],
    );
    git(root, &["clone", "--bare", "seed", "origin.git"]);
    root.join("origin.git").to_str().expect("utf8 path").to_string()
}

struct Fixture {
    root: TempDir,
    remote: String,
    credentials: GitCredentials,
    author: GitAuthor,
    backoff: Backoff,
}

impl Fixture {
    fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let remote = seed_remote(root.path());
        Self {
            root,
            remote,
            credentials: GitCredentials::default(),
            author: GitAuthor {
                name: "gitchange-operator".into(),
                email: "gitchange-operator@cluster.local".into(),
            },
            backoff: Backoff {
                max_attempts: 2,
                base_delay_ms: 1,
                max_delay_ms: 1,
                jitter: 0.0,
            },
        }
    }

    fn worker(&self) -> GitWorker<'_> {
        GitWorker::new(
            &self.remote,
            &self.credentials,
            &self.author,
            "automated change",
            &self.backoff,
            Instant::now() + Duration::from_secs(120),
        )
    }

    fn entry(&self, path: &str, content: &str, mode: WriteMode) -> FileEntry {
        FileEntry::new(path, content.as_bytes().to_vec(), mode)
    }
}

#[tokio::test]
async fn commits_literal_files_to_an_existing_branch() {
    let fx = Fixture::new();
    let files = [fx.entry("a.txt", "hi", WriteMode::Overwrite)];

    let outcome = fx.worker().commit_to_branch("main", &files).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.sha.len(), 40);
    assert!(outcome.sha.chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(show(fx.root.path(), &fx.remote, "main:a.txt"), b"hi");
    // The clone-based commit keeps unrelated remote content.
    assert_eq!(show(fx.root.path(), &fx.remote, "main:README.md"), b"seed\n");
}

#[tokio::test]
async fn identical_content_is_a_no_op_with_the_existing_sha() {
    let fx = Fixture::new();
    let files = [fx.entry("a.txt", "hi", WriteMode::Overwrite)];

    let first = fx.worker().commit_to_branch("main", &files).await.unwrap();
    assert!(first.changed);

    let second = fx.worker().commit_to_branch("main", &files).await.unwrap();
    assert!(!second.changed);
    assert_eq!(second.sha, first.sha);
}

#[tokio::test]
async fn missing_branch_is_created_off_the_default_head() {
    let fx = Fixture::new();
    let files = [fx.entry("exported.yaml", "x: 1\n", WriteMode::Overwrite)];

    let outcome = fx
        .worker()
        .commit_to_branch("exports", &files)
        .await
        .unwrap();
    assert!(outcome.changed);

    assert_eq!(
        show(fx.root.path(), &fx.remote, "exports:exported.yaml"),
        b"x: 1\n"
    );
    // Branched off main, so the seed content is part of the tree.
    assert_eq!(
        show(fx.root.path(), &fx.remote, "exports:README.md"),
        b"seed\n"
    );
}

#[tokio::test]
async fn append_mode_appends_to_the_remote_file() {
    let fx = Fixture::new();
    let files = [fx.entry("notes.txt", "two", WriteMode::Append)];

    let outcome = fx.worker().commit_to_branch("main", &files).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(show(fx.root.path(), &fx.remote, "main:notes.txt"), b"one\ntwo");
}

#[tokio::test]
async fn append_inserts_a_separator_when_the_remote_lacks_a_newline() {
    let fx = Fixture::new();
    let first = [fx.entry("log.txt", "alpha", WriteMode::Overwrite)];
    fx.worker().commit_to_branch("main", &first).await.unwrap();

    let second = [fx.entry("log.txt", "beta", WriteMode::Append)];
    fx.worker().commit_to_branch("main", &second).await.unwrap();
    assert_eq!(
        show(fx.root.path(), &fx.remote, "main:log.txt"),
        b"alpha\nbeta"
    );
}

#[tokio::test]
async fn encryption_replaces_the_file_with_its_age_counterpart() {
    let fx = Fixture::new();
    let files = [fx.entry("a.txt", "hi", WriteMode::Overwrite)];

    let worker = fx.worker().with_encryption(
        EncryptionConfig {
            enabled: true,
            file_extension: None,
        },
        vec![Recipient::Passphrase("sesame".into())],
    );
    let outcome = worker.commit_to_branch("main", &files).await.unwrap();
    assert!(outcome.changed);

    assert!(try_show(fx.root.path(), &fx.remote, "main:a.txt").is_none());
    let cipher = show(fx.root.path(), &fx.remote, "main:a.txt.age");
    assert_ne!(cipher, b"hi");
    let plain = decrypt(&cipher, &[Identity::Passphrase("sesame".into())]).unwrap();
    assert_eq!(plain, b"hi");
}

#[tokio::test]
async fn head_branch_is_created_from_the_base() {
    let fx = Fixture::new();
    let files = [fx.entry("generated.txt", "v1", WriteMode::Overwrite)];

    let outcome = fx
        .worker()
        .push_head_branch("main", "auto/update", &files)
        .await
        .unwrap();
    assert!(outcome.changed);

    assert_eq!(
        show(fx.root.path(), &fx.remote, "auto/update:generated.txt"),
        b"v1"
    );
    assert_eq!(
        show(fx.root.path(), &fx.remote, "auto/update:README.md"),
        b"seed\n"
    );
    // The base branch itself is untouched.
    assert!(try_show(fx.root.path(), &fx.remote, "main:generated.txt").is_none());
}

#[tokio::test]
async fn existing_head_branch_is_reused_and_updated() {
    let fx = Fixture::new();

    let first = [fx.entry("generated.txt", "v1", WriteMode::Overwrite)];
    fx.worker()
        .push_head_branch("main", "auto/update", &first)
        .await
        .unwrap();

    let second = [fx.entry("generated.txt", "v2", WriteMode::Overwrite)];
    let outcome = fx
        .worker()
        .push_head_branch("main", "auto/update", &second)
        .await
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(
        show(fx.root.path(), &fx.remote, "auto/update:generated.txt"),
        b"v2"
    );
}

#[tokio::test]
async fn diverged_head_branch_is_overwritten_from_the_new_base() {
    let fx = Fixture::new();

    let first = [fx.entry("generated.txt", "v1", WriteMode::Overwrite)];
    fx.worker()
        .push_head_branch("main", "auto/update", &first)
        .await
        .unwrap();

    // Advance main out from under the head branch.
    let other = fx.root.path().join("other");
    git(
        fx.root.path(),
        &["clone", "--branch", "main", &fx.remote, "other"],
    );
    std::fs::write(other.join("mainline.txt"), "mainline\n").expect("write");
    git(&other, &["add", "-A"]);
    git(
        &other,
        &[
            "-c",
            "user.name=dev",
            "-c",
            "user.email=dev@local",
            "commit",
            "-m",
            "mainline work",
        ],
    );
    git(&other, &["push", "origin", "main"]);

    let second = [fx.entry("generated.txt", "v2", WriteMode::Overwrite)];
    let outcome = fx
        .worker()
        .push_head_branch("main", "auto/update", &second)
        .await
        .unwrap();
    assert!(outcome.changed);

    // The head now descends from the new base and carries the new content.
    assert_eq!(
        show(fx.root.path(), &fx.remote, "auto/update:generated.txt"),
        b"v2"
    );
    assert_eq!(
        show(fx.root.path(), &fx.remote, "auto/update:mainline.txt"),
        b"mainline\n"
    );
}

#[tokio::test]
async fn missing_base_branch_fails_the_clone() {
    let fx = Fixture::new();
    let files = [fx.entry("a.txt", "x", WriteMode::Overwrite)];

    let err = fx
        .worker()
        .push_head_branch("nope", "auto/update", &files)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "GitCloneFailed");
}

#[tokio::test]
async fn unreachable_remote_is_a_clone_failure() {
    let root = TempDir::new().expect("tempdir");
    let remote = root.path().join("does-not-exist.git").display().to_string();
    let credentials = GitCredentials::default();
    let author = GitAuthor {
        name: "a".into(),
        email: "a@b".into(),
    };
    let backoff = Backoff {
        max_attempts: 1,
        base_delay_ms: 1,
        max_delay_ms: 1,
        jitter: 0.0,
    };
    let worker = GitWorker::new(
        &remote,
        &credentials,
        &author,
        "msg",
        &backoff,
        Instant::now() + Duration::from_secs(10),
    );
    let err = worker
        .commit_to_branch("main", &[FileEntry::new("a", "b", WriteMode::Overwrite)])
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "GitCloneFailed");
}
