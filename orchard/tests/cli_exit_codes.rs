//! CLI tests for local commands.
//!
//! Spawns the orchard binary inside a scratch repository and checks output and
//! exit codes. Nothing here talks to the code host.

use std::path::Path;
use std::process::{Command, Output};

use orchard::exit_codes;
use orchard::io::config::{OrchardConfig, write_config};
use orchard::io::init::OrchardPaths;
use orchard::test_support::TestRepo;

fn orchard(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_orchard"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("run orchard")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Repository configured with pool state and slots under scratch directories.
fn configured_repo(pool_size: usize, state: &Path) -> TestRepo {
    let repo = TestRepo::new().expect("repo");
    let config = OrchardConfig {
        pool_size,
        state_dir: Some(state.to_path_buf()),
        workspaces_dir: Some(repo.workspaces()),
        ..OrchardConfig::default()
    };
    write_config(&OrchardPaths::new(repo.path()).config_path, &config).expect("write config");
    repo
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let repo = TestRepo::new().expect("repo");

    let first = orchard(&repo.path(), &["init", "--pool-size", "2"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    let config = std::fs::read_to_string(repo.path().join(".orchard/config.toml")).expect("config");
    assert!(config.contains("pool_size = 2"));

    let second = orchard(&repo.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));

    let forced = orchard(&repo.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn slot_list_shows_every_configured_slot() {
    let state = tempfile::tempdir().expect("tempdir");
    let repo = configured_repo(3, state.path());

    let output = orchard(&repo.path(), &["slot", "list"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        stdout(&output),
        "orchard-slot-01\t-\norchard-slot-02\t-\norchard-slot-03\t-\n"
    );
}

#[test]
fn assign_creates_worktrees_until_the_pool_is_full() {
    let state = tempfile::tempdir().expect("tempdir");
    let repo = configured_repo(1, state.path());

    let assigned = orchard(&repo.path(), &["slot", "assign", "feature-a"]);
    assert_eq!(assigned.status.code(), Some(exit_codes::OK));
    assert!(stdout(&assigned).starts_with("orchard-slot-01\t"));
    assert!(repo.workspaces().join("repo/orchard-slot-01/.git").exists());
    assert!(state.path().join("repo/pool.json").exists());

    let again = orchard(&repo.path(), &["slot", "assign", "feature-a"]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));

    let full = orchard(&repo.path(), &["slot", "assign", "feature-b"]);
    assert_eq!(full.status.code(), Some(exit_codes::CAPACITY));
    let stderr = String::from_utf8_lossy(&full.stderr);
    assert!(stderr.contains("feature-a"));
    assert!(stderr.contains("hint:"));
}

#[test]
fn dirty_slot_blocks_forced_eviction() {
    let state = tempfile::tempdir().expect("tempdir");
    let repo = configured_repo(1, state.path());
    orchard(&repo.path(), &["slot", "assign", "feature-a"]);
    std::fs::write(repo.workspaces().join("repo/orchard-slot-01/wip.txt"), "wip").expect("write");

    let output = orchard(&repo.path(), &["slot", "assign", "feature-b", "--force"]);

    assert_eq!(output.status.code(), Some(exit_codes::PRECONDITION));
}

#[test]
fn unassign_unknown_slot_is_not_found() {
    let state = tempfile::tempdir().expect("tempdir");
    let repo = configured_repo(2, state.path());

    let output = orchard(&repo.path(), &["slot", "unassign", "orchard-slot-07"]);

    assert_eq!(output.status.code(), Some(exit_codes::NOT_FOUND));
}

#[test]
fn branch_parent_is_trunk_without_stacking() {
    let state = tempfile::tempdir().expect("tempdir");
    let repo = configured_repo(2, state.path());
    repo.git(&["checkout", "-q", "-b", "feature-a"]).expect("checkout");

    let output = orchard(&repo.path(), &["branch", "parent"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output), "main\n");
}
