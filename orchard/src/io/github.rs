//! Code-host record adapter over the `gh` CLI.
//!
//! Plans and objectives live in issues and pull requests. Every call goes
//! through `gh api` with JSON request bodies on stdin, so orchard never handles
//! tokens itself.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::types::RecordState;
use crate::io::process::Tool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Issue,
    PullRequest,
}

/// An issue or pull request as orchard sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub number: u64,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    pub state: RecordState,
    pub url: String,
    pub labels: Vec<String>,
    pub assignees: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    pub name: String,
    pub color: String,
    pub description: String,
}

/// Tracking-record operations used by plan and roadmap stores.
pub trait RecordProvider {
    fn create_issue(&self, record: &NewRecord) -> Result<Record>;
    /// Open a draft pull request from `head` into `base`.
    fn create_draft_pr(&self, record: &NewRecord, head: &str, base: &str) -> Result<Record>;
    /// `None` when the record does not exist.
    fn get_record(&self, number: u64) -> Result<Option<Record>>;
    fn update_body(&self, number: u64, body: &str) -> Result<()>;
    /// Replace the full label set.
    fn update_labels(&self, number: u64, labels: &[String]) -> Result<()>;
    fn set_state(&self, number: u64, state: RecordState) -> Result<()>;
    fn label_exists(&self, name: &str) -> Result<bool>;
    fn create_label(&self, label: &LabelSpec) -> Result<()>;
    fn add_comment(&self, number: u64, body: &str) -> Result<Comment>;
    /// All comments, oldest first as returned by the host.
    fn list_comments(&self, number: u64) -> Result<Vec<Comment>>;
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    html_url: String,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    assignees: Vec<ApiUser>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    pull_request: Option<Value>,
    /// Present on pull request payloads from the pulls endpoint.
    #[serde(default)]
    head: Option<Value>,
}

impl ApiIssue {
    fn into_record(self) -> Record {
        let kind = if self.pull_request.is_some() || self.head.is_some() {
            RecordKind::PullRequest
        } else {
            RecordKind::Issue
        };
        let state = if self.state.eq_ignore_ascii_case("closed") {
            RecordState::Closed
        } else {
            RecordState::Open
        };
        Record {
            number: self.number,
            kind,
            title: self.title,
            body: self.body.unwrap_or_default(),
            state,
            url: self.html_url,
            labels: self.labels.into_iter().map(|l| l.name).collect(),
            assignees: self.assignees.into_iter().map(|u| u.login).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiComment {
    id: u64,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ApiComment> for Comment {
    fn from(c: ApiComment) -> Self {
        Self {
            id: c.id,
            body: c.body.unwrap_or_default(),
            created_at: c.created_at,
        }
    }
}

/// `RecordProvider` backed by `gh api`.
#[derive(Debug, Clone)]
pub struct GhCli {
    gh: Tool,
    repo: String,
}

impl GhCli {
    /// `repo` is `owner/name`.
    pub fn new(gh: Tool, repo: impl Into<String>) -> Self {
        Self {
            gh,
            repo: repo.into(),
        }
    }

    /// Resolve `owner/name` for the repository in the tool's working directory.
    pub fn detect(gh: Tool) -> Result<Self> {
        let out = gh
            .run_checked(
                &["repo", "view", "--json", "nameWithOwner", "-q", ".nameWithOwner"],
                None,
            )
            .context("resolve repository with gh")?;
        let repo = out.trim().to_string();
        if repo.is_empty() {
            return Err(anyhow!("gh repo view returned no repository"));
        }
        debug!(repo = %repo, "resolved repository");
        Ok(Self::new(gh, repo))
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    fn endpoint(&self, path: &str) -> String {
        format!("repos/{}/{}", self.repo, path)
    }

    /// Call `gh api`; `Ok(None)` on HTTP 404.
    fn api(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Option<String>> {
        let endpoint = self.endpoint(path);
        let mut args = vec!["api", "-X", method, endpoint.as_str()];
        let payload = body.map(serde_json::to_vec).transpose()?;
        if payload.is_some() {
            args.extend(["--input", "-"]);
        }
        let output = self.gh.run(&args, payload.as_deref())?;
        if output.timed_out {
            return Err(anyhow!("gh api {method} {endpoint} timed out"));
        }
        if !output.status.success() {
            let stderr = output.stderr_text();
            if is_not_found(&stderr) {
                debug!(endpoint = %endpoint, "gh api returned 404");
                return Ok(None);
            }
            return Err(anyhow!("gh api {method} {endpoint} failed: {stderr}"));
        }
        Ok(Some(output.stdout_text()))
    }

    fn api_required(&self, method: &str, path: &str, body: Option<&Value>) -> Result<String> {
        self.api(method, path, body)?
            .ok_or_else(|| anyhow!("gh api {method} {path}: not found"))
    }
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("HTTP 404") || stderr.contains("Not Found")
}

fn parse_record(raw: &str) -> Result<Record> {
    let issue: ApiIssue = serde_json::from_str(raw).context("parse gh record")?;
    Ok(issue.into_record())
}

/// `gh api --paginate` concatenates one JSON array per page.
fn parse_paginated<T: serde::de::DeserializeOwned>(raw: &str) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for page in serde_json::Deserializer::from_str(raw).into_iter::<Vec<T>>() {
        items.extend(page.context("parse gh page")?);
    }
    Ok(items)
}

/// Percent-encode a single URL path segment.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl RecordProvider for GhCli {
    #[instrument(skip_all)]
    fn create_issue(&self, record: &NewRecord) -> Result<Record> {
        let body = json!({
            "title": record.title,
            "body": record.body,
            "labels": record.labels,
        });
        let raw = self.api_required("POST", "issues", Some(&body))?;
        parse_record(&raw)
    }

    #[instrument(skip_all, fields(head, base))]
    fn create_draft_pr(&self, record: &NewRecord, head: &str, base: &str) -> Result<Record> {
        let body = json!({
            "title": record.title,
            "body": record.body,
            "head": head,
            "base": base,
            "draft": true,
        });
        let raw = self.api_required("POST", "pulls", Some(&body))?;
        let mut created = parse_record(&raw)?;
        if !record.labels.is_empty() {
            self.update_labels(created.number, &record.labels)?;
            created.labels = record.labels.clone();
        }
        Ok(created)
    }

    fn get_record(&self, number: u64) -> Result<Option<Record>> {
        self.api("GET", &format!("issues/{number}"), None)?
            .map(|raw| parse_record(&raw))
            .transpose()
    }

    fn update_body(&self, number: u64, body: &str) -> Result<()> {
        self.api_required("PATCH", &format!("issues/{number}"), Some(&json!({ "body": body })))?;
        Ok(())
    }

    fn update_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        self.api_required(
            "PUT",
            &format!("issues/{number}/labels"),
            Some(&json!({ "labels": labels })),
        )?;
        Ok(())
    }

    fn set_state(&self, number: u64, state: RecordState) -> Result<()> {
        let state = match state {
            RecordState::Open => "open",
            RecordState::Closed => "closed",
        };
        self.api_required("PATCH", &format!("issues/{number}"), Some(&json!({ "state": state })))?;
        Ok(())
    }

    fn label_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .api("GET", &format!("labels/{}", encode_segment(name)), None)?
            .is_some())
    }

    fn create_label(&self, label: &LabelSpec) -> Result<()> {
        let body = json!({
            "name": label.name,
            "color": label.color,
            "description": label.description,
        });
        self.api_required("POST", "labels", Some(&body))?;
        Ok(())
    }

    fn add_comment(&self, number: u64, body: &str) -> Result<Comment> {
        let raw = self.api_required(
            "POST",
            &format!("issues/{number}/comments"),
            Some(&json!({ "body": body })),
        )?;
        let comment: ApiComment = serde_json::from_str(&raw).context("parse gh comment")?;
        Ok(comment.into())
    }

    fn list_comments(&self, number: u64) -> Result<Vec<Comment>> {
        let endpoint = self.endpoint(&format!("issues/{number}/comments?per_page=100"));
        let raw = self
            .gh
            .run_checked(&["api", "--paginate", &endpoint], None)?;
        let comments: Vec<ApiComment> = parse_paginated(&raw)?;
        Ok(comments.into_iter().map(Comment::from).collect())
    }
}
