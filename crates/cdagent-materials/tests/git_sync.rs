//! End-to-end Git sync against local repositories built with the `git` binary.

use std::path::Path;
use std::process::Command;

use cdagent_materials::{GitMaterial, Material, RevisionContext};
use cdagent_session::{BuildSession, ConsoleSink, JobResult};

fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit_all(repo_dir: &Path, message: &str) -> String {
    run_git(repo_dir, &["add", "-A"]);
    run_git(repo_dir, &["commit", "-m", message]);
    run_git(repo_dir, &["rev-parse", "HEAD"])
}

/// Upstream repository with two commits on `master`:
/// 1. `a.txt`, `b.txt`
/// 2. `b.txt`, `c.txt` (a.txt removed)
struct Upstream {
    dir: tempfile::TempDir,
    first: String,
    second: String,
}

fn make_upstream() -> Upstream {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path();
    run_git(path, &["init"]);
    run_git(path, &["symbolic-ref", "HEAD", "refs/heads/master"]);
    run_git(path, &["config", "user.name", "test-user"]);
    run_git(path, &["config", "user.email", "test@example.com"]);

    std::fs::write(path.join("a.txt"), "a\n").unwrap();
    std::fs::write(path.join("b.txt"), "b\n").unwrap();
    let first = commit_all(path, "first");

    std::fs::remove_file(path.join("a.txt")).unwrap();
    std::fs::write(path.join("c.txt"), "c\n").unwrap();
    let second = commit_all(path, "second");

    Upstream { dir, first, second }
}

fn material(upstream: &Upstream) -> Material {
    Material::Git(GitMaterial::new(upstream.dir.path().display().to_string()))
}

async fn update_to(material: &Material, working_dir: &Path, revision: &str) -> ConsoleSink {
    let tree = cdagent_materials::update_to(material, working_dir, &RevisionContext::new(revision))
        .expect("material should be valid");
    let session = BuildSession::new(ConsoleSink::new());
    let result = session.build(tree).await;
    assert_eq!(
        result,
        JobResult::Passed,
        "sync failed, console:\n{}",
        session.console().output()
    );
    session.console().clone()
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Test: first sync clones and checks out the requested commit
#[tokio::test]
async fn test_clone_to_revision() {
    let upstream = make_upstream();
    let work = tempfile::tempdir().unwrap();
    let dest = work.path().join("pipeline");

    let console = update_to(&material(&upstream), &dest, &upstream.first).await;

    assert_eq!(entries(&dest), vec![".git", "a.txt", "b.txt"]);
    assert_eq!(run_git(&dest, &["rev-parse", "HEAD"]), upstream.first);
    let output = console.output();
    assert!(output.contains(&format!(
        "[cdagent] Start updating {} at revision {}",
        dest.display(),
        upstream.first
    )));
    assert!(output.contains("setting environment variable 'GIT_TERMINAL_PROMPT' to value '0'"));
    assert!(output.ends_with("[cdagent] Done.\n"));
}

/// Test: re-sync reuses the checkout and removes stray files
#[tokio::test]
async fn test_resync_removes_stray_files() {
    let upstream = make_upstream();
    let work = tempfile::tempdir().unwrap();
    let dest = work.path().to_path_buf();
    let material = material(&upstream);

    update_to(&material, &dest, &upstream.first).await;
    std::fs::write(dest.join("stray.txt"), "stray").unwrap();
    std::fs::create_dir(dest.join("build")).unwrap();
    std::fs::write(dest.join("build/out.o"), "o").unwrap();
    std::fs::write(dest.join("b.txt"), "locally modified\n").unwrap();

    let console = update_to(&material, &dest, &upstream.first).await;

    assert!(console.output().contains("[cdagent] Reusing existing checkout"));
    assert_eq!(entries(&dest), vec![".git", "a.txt", "b.txt"]);
    assert_eq!(std::fs::read_to_string(dest.join("b.txt")).unwrap(), "b\n");
}

/// Test: moving between revisions tracks added and removed files
#[tokio::test]
async fn test_sync_between_revisions() {
    let upstream = make_upstream();
    let work = tempfile::tempdir().unwrap();
    let material = material(&upstream);

    update_to(&material, work.path(), &upstream.first).await;
    update_to(&material, work.path(), &upstream.second).await;
    assert_eq!(entries(work.path()), vec![".git", "b.txt", "c.txt"]);

    update_to(&material, work.path(), &upstream.first).await;
    assert_eq!(entries(work.path()), vec![".git", "a.txt", "b.txt"]);
}

/// Test: a checkout of a different repository is replaced
#[tokio::test]
async fn test_reclones_when_origin_differs() {
    let one = make_upstream();
    let two = make_upstream();
    let work = tempfile::tempdir().unwrap();

    update_to(&material(&one), work.path(), &one.second).await;
    let console = update_to(&material(&two), work.path(), &two.first).await;

    assert!(!console.output().contains("Reusing existing checkout"));
    assert_eq!(
        run_git(work.path(), &["config", "--get", "remote.origin.url"]),
        two.dir.path().display().to_string()
    );
    assert_eq!(run_git(work.path(), &["rev-parse", "HEAD"]), two.first);
}

/// Test: a custom folder keeps the working directory top level to one entry
#[tokio::test]
async fn test_custom_folder() {
    let upstream = make_upstream();
    let work = tempfile::tempdir().unwrap();
    let material = material(&upstream).with_folder("src");

    update_to(&material, work.path(), &upstream.second).await;

    assert_eq!(entries(work.path()), vec!["src"]);
    assert_eq!(entries(&work.path().join("src")), vec![".git", "b.txt", "c.txt"]);
}
