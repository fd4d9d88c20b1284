//! Test-only fakes and builders.
//!
//! Every external collaborator has an in-memory stand-in here so orchestration
//! can be driven without `git`, `gh`, or `gt`. Fakes use interior mutability
//! because the traits take `&self`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::core::metadata::{OBJECTIVE_ROADMAP, render_block};
use crate::core::pool::PoolState;
use crate::core::roadmap::{NodeStatus, ROADMAP_SCHEMA_VERSION, Roadmap, RoadmapNode};
use crate::core::types::RecordState;
use crate::error::OrchardError;
use crate::io::dispatch::{Dispatcher, RunReference};
use crate::io::git::{BranchPublisher, WorkspaceProvider};
use crate::io::github::{Comment, LabelSpec, NewRecord, Record, RecordKind, RecordProvider};
use crate::io::graphite::StackProvider;
use crate::io::pool_store::PoolStore;

/// Deterministic roadmap step.
pub fn step(id: &str, status: NodeStatus, depends_on: &[&str]) -> RoadmapNode {
    RoadmapNode {
        id: id.to_string(),
        description: format!("Step {id}"),
        status,
        plan: None,
        pr: None,
        depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
    }
}

pub fn roadmap(nodes: Vec<RoadmapNode>) -> Roadmap {
    Roadmap {
        schema_version: ROADMAP_SCHEMA_VERSION.to_string(),
        phases: Vec::new(),
        nodes,
    }
}

/// Objective body with prose around an embedded roadmap block.
pub fn objective_body(map: &Roadmap) -> String {
    let block = render_block(OBJECTIVE_ROADMAP, map).expect("render roadmap");
    format!("# Objective\n\nShip the thing.\n\n{block}\n\n## Notes\n\nKeep going.\n")
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

#[derive(Default)]
struct RecordsState {
    records: BTreeMap<u64, Record>,
    comments: BTreeMap<u64, Vec<Comment>>,
    labels: BTreeSet<String>,
    body_writes: BTreeMap<u64, usize>,
    next_comment_id: u64,
    ticks: i64,
}

impl RecordsState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        epoch() + Duration::seconds(self.ticks)
    }

    fn insert(&mut self, kind: RecordKind, record: &NewRecord) -> Record {
        let number = self.records.keys().next_back().copied().unwrap_or(0) + 1;
        let now = self.tick();
        let created = Record {
            number,
            kind,
            title: record.title.clone(),
            body: record.body.clone(),
            state: RecordState::Open,
            url: format!("https://github.com/acme/widgets/issues/{number}"),
            labels: record.labels.clone(),
            assignees: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.records.insert(number, created.clone());
        created
    }

    fn record_mut(&mut self, number: u64) -> Result<&mut Record> {
        self.records
            .get_mut(&number)
            .ok_or_else(|| anyhow!("no record #{number}"))
    }
}

/// In-memory issue/PR host.
#[derive(Default)]
pub struct FakeRecords {
    state: RefCell<RecordsState>,
    draft_prs: RefCell<Vec<(u64, String, String)>>,
}

impl FakeRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a plain issue; returns its number.
    pub fn insert_issue(&self, title: &str, body: &str) -> u64 {
        let record = NewRecord {
            title: title.to_string(),
            body: body.to_string(),
            labels: Vec::new(),
        };
        self.state.borrow_mut().insert(RecordKind::Issue, &record).number
    }

    pub fn record(&self, number: u64) -> Option<Record> {
        self.state.borrow().records.get(&number).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.borrow().records.len()
    }

    /// Number of `update_body` calls for `number`.
    pub fn body_writes(&self, number: u64) -> usize {
        self.state.borrow().body_writes.get(&number).copied().unwrap_or(0)
    }

    /// Change a body without counting it as an orchard write (a concurrent editor).
    pub fn edit_body(&self, number: u64, body: &str) {
        if let Some(record) = self.state.borrow_mut().records.get_mut(&number) {
            record.body = body.to_string();
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.state.borrow().labels.iter().cloned().collect()
    }

    pub fn comments(&self, number: u64) -> Vec<Comment> {
        self.state
            .borrow()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    /// `(number, head, base)` for each draft PR opened.
    pub fn draft_prs(&self) -> Vec<(u64, String, String)> {
        self.draft_prs.borrow().clone()
    }
}

impl RecordProvider for FakeRecords {
    fn create_issue(&self, record: &NewRecord) -> Result<Record> {
        Ok(self.state.borrow_mut().insert(RecordKind::Issue, record))
    }

    fn create_draft_pr(&self, record: &NewRecord, head: &str, base: &str) -> Result<Record> {
        let created = self.state.borrow_mut().insert(RecordKind::PullRequest, record);
        self.draft_prs
            .borrow_mut()
            .push((created.number, head.to_string(), base.to_string()));
        Ok(created)
    }

    fn get_record(&self, number: u64) -> Result<Option<Record>> {
        Ok(self.record(number))
    }

    fn update_body(&self, number: u64, body: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let record = state.record_mut(number)?;
        record.body = body.to_string();
        record.updated_at = now;
        *state.body_writes.entry(number).or_default() += 1;
        Ok(())
    }

    fn update_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        self.state.borrow_mut().record_mut(number)?.labels = labels.to_vec();
        Ok(())
    }

    fn set_state(&self, number: u64, state: RecordState) -> Result<()> {
        self.state.borrow_mut().record_mut(number)?.state = state;
        Ok(())
    }

    fn label_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().labels.contains(name))
    }

    fn create_label(&self, label: &LabelSpec) -> Result<()> {
        self.state.borrow_mut().labels.insert(label.name.clone());
        Ok(())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<Comment> {
        let mut state = self.state.borrow_mut();
        state.record_mut(number)?;
        state.next_comment_id += 1;
        let comment = Comment {
            id: state.next_comment_id,
            body: body.to_string(),
            created_at: state.tick(),
        };
        state.comments.entry(number).or_default().push(comment.clone());
        Ok(comment)
    }

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        Ok(self.comments(number))
    }
}

#[derive(Default)]
struct WorkspaceState {
    /// Worktree path -> checked-out branch.
    worktrees: BTreeMap<PathBuf, String>,
    dirty: BTreeSet<PathBuf>,
    branches: BTreeSet<String>,
    calls: Vec<String>,
}

/// In-memory worktrees; every mutating call is logged.
pub struct FakeWorkspaces {
    state: RefCell<WorkspaceState>,
}

impl FakeWorkspaces {
    pub fn new(trunk: &str) -> Self {
        let state = WorkspaceState {
            branches: BTreeSet::from([trunk.to_string()]),
            ..WorkspaceState::default()
        };
        Self {
            state: RefCell::new(state),
        }
    }

    pub fn set_dirty(&self, path: &Path, dirty: bool) {
        let mut state = self.state.borrow_mut();
        if dirty {
            state.dirty.insert(path.to_path_buf());
        } else {
            state.dirty.remove(path);
        }
    }

    pub fn branch_at(&self, path: &Path) -> Option<String> {
        self.state.borrow().worktrees.get(path).cloned()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.state.borrow().branches.contains(branch)
    }

    /// Mutating calls in order, e.g. `add orchard-slot-01 feature-a main`.
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    fn slot_label(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

impl WorkspaceProvider for FakeWorkspaces {
    fn workspace_exists(&self, path: &Path) -> bool {
        self.state.borrow().worktrees.contains_key(path)
    }

    fn add_workspace(&self, path: &Path, branch: &str, parent: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.worktrees.contains_key(path) {
            bail!("worktree {} already exists", path.display());
        }
        state.branches.insert(branch.to_string());
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        state
            .calls
            .push(format!("add {} {branch} {parent}", Self::slot_label(path)));
        Ok(())
    }

    fn create_branch(&self, path: &Path, branch: &str, start_point: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.branches.insert(branch.to_string()) {
            bail!("branch {branch} already exists");
        }
        state
            .calls
            .push(format!("branch {} {branch} {start_point}", Self::slot_label(path)));
        Ok(())
    }

    fn checkout_branch(&self, path: &Path, branch: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.branches.contains(branch) {
            bail!("unknown branch {branch}");
        }
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        state
            .calls
            .push(format!("checkout {} {branch}", Self::slot_label(path)));
        Ok(())
    }

    fn remove_workspace(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.worktrees.remove(path);
        state.calls.push(format!("remove {}", Self::slot_label(path)));
        Ok(())
    }

    fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        Ok(self.state.borrow().dirty.contains(path))
    }

    fn local_branches(&self) -> Result<Vec<String>> {
        Ok(self.state.borrow().branches.iter().cloned().collect())
    }

    fn current_branch_at(&self, path: &Path) -> Result<String> {
        self.branch_at(path)
            .ok_or_else(|| anyhow!("no worktree at {}", path.display()))
    }
}

/// Stack tool fake with a fixed tracked set.
#[derive(Default)]
pub struct FakeStack {
    tracked: RefCell<BTreeSet<String>>,
    tracked_calls: RefCell<Vec<(String, String)>>,
    fail_next_track: Cell<bool>,
}

impl FakeStack {
    pub fn tracking(branches: &[&str]) -> Self {
        Self {
            tracked: RefCell::new(branches.iter().map(|b| b.to_string()).collect()),
            tracked_calls: RefCell::new(Vec::new()),
            fail_next_track: Cell::new(false),
        }
    }

    /// Like [`FakeStack::tracking`], but the first `track_branch` call fails.
    pub fn failing_first_track(branches: &[&str]) -> Self {
        let stack = Self::tracking(branches);
        stack.fail_next_track.set(true);
        stack
    }

    /// `(branch, parent)` for each successful `track_branch` call.
    pub fn track_calls(&self) -> Vec<(String, String)> {
        self.tracked_calls.borrow().clone()
    }
}

impl StackProvider for FakeStack {
    fn is_branch_tracked(&self, branch: &str) -> Result<bool> {
        Ok(self.tracked.borrow().contains(branch))
    }

    fn track_branch(&self, branch: &str, parent: &str) -> Result<()> {
        if self.fail_next_track.replace(false) {
            bail!("gt track failed for {branch}");
        }
        self.tracked.borrow_mut().insert(branch.to_string());
        self.tracked_calls
            .borrow_mut()
            .push((branch.to_string(), parent.to_string()));
        Ok(())
    }
}

/// One recorded dispatcher call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub instruction: String,
    pub inputs: BTreeMap<String, String>,
}

/// Dispatcher that records triggers and can be told to fail for one step.
#[derive(Default)]
pub struct RecordingDispatcher {
    triggers: RefCell<Vec<Trigger>>,
    fail_for_node: Option<String>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(node_id: &str) -> Self {
        Self {
            triggers: RefCell::new(Vec::new()),
            fail_for_node: Some(node_id.to_string()),
        }
    }

    pub fn triggers(&self) -> Vec<Trigger> {
        self.triggers.borrow().clone()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn trigger(&self, instruction: &str, inputs: &BTreeMap<String, String>) -> Result<RunReference> {
        let node = inputs.get("node_id").cloned().unwrap_or_default();
        if self.fail_for_node.as_deref() == Some(node.as_str()) {
            bail!("workflow dispatch rejected for step {node}");
        }
        let mut triggers = self.triggers.borrow_mut();
        triggers.push(Trigger {
            instruction: instruction.to_string(),
            inputs: inputs.clone(),
        });
        Ok(RunReference {
            workflow: "orchard-implement.yml".to_string(),
            url: Some(format!(
                "https://github.com/acme/widgets/actions/runs/{}",
                triggers.len()
            )),
        })
    }
}

/// Pool store with the same revision check as the JSON store.
#[derive(Default)]
pub struct MemoryPoolStore {
    state: RefCell<Option<PoolState>>,
    saves: Cell<usize>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PoolState) -> Self {
        Self {
            state: RefCell::new(Some(state)),
            saves: Cell::new(0),
        }
    }

    pub fn current(&self) -> Option<PoolState> {
        self.state.borrow().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.get()
    }
}

impl PoolStore for MemoryPoolStore {
    fn load(&self) -> Result<Option<PoolState>> {
        Ok(self.current())
    }

    fn save(&self, state: &mut PoolState) -> Result<()> {
        let stored = self.state.borrow().as_ref().map(|s| s.revision).unwrap_or(0);
        if stored != state.revision {
            return Err(OrchardError::Conflict("pool state".to_string()).into());
        }
        state.revision += 1;
        *self.state.borrow_mut() = Some(state.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

/// Records published plan branches as `(branch, base, message)`.
#[derive(Default)]
pub struct FakePublisher {
    published: RefCell<Vec<(String, String, String)>>,
}

impl FakePublisher {
    pub fn published(&self) -> Vec<(String, String, String)> {
        self.published.borrow().clone()
    }
}

impl BranchPublisher for FakePublisher {
    fn publish_empty_branch(&self, branch: &str, base: &str, message: &str) -> Result<()> {
        self.published
            .borrow_mut()
            .push((branch.to_string(), base.to_string(), message.to_string()));
        Ok(())
    }
}

/// A real git repository on `main` with one commit, plus a sibling
/// directory for slot worktrees.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let repo = Self { dir };
        std::fs::create_dir_all(repo.path())?;
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "orchard@example.com"])?;
        repo.git(&["config", "user.name", "Orchard Tests"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        std::fs::write(repo.path().join("README.md"), "# widgets\n")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-q", "-m", "initial"])?;
        Ok(repo)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join("repo")
    }

    pub fn workspaces(&self) -> PathBuf {
        self.dir.path().join("workspaces")
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
