//! Test-only helpers: deterministic host data, an in-memory host, and a
//! scripted text generator.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::{Result, anyhow};

use crate::core::types::{ChangedFile, Comment, Issue, PullRequest};
use crate::io::generator::{GenerationRequest, TextGenerator};
use crate::io::host::{FileWrite, HostError, HostResult, NewPullRequest, RepoHost};

/// Comments with sequential ids, in the given order.
pub fn comments(bodies: &[&str]) -> Vec<Comment> {
    bodies
        .iter()
        .enumerate()
        .map(|(idx, body)| Comment {
            id: idx as u64 + 1,
            body: (*body).to_string(),
        })
        .collect()
}

/// Create a deterministic open issue.
pub fn issue(number: u64) -> Issue {
    Issue {
        number,
        id: 100 + number,
        title: format!("issue {number} title"),
        body: format!("issue {number} body"),
        open: true,
    }
}

/// Create a deterministic open pull request with the given body.
pub fn pull_request(number: u64, body: &str) -> PullRequest {
    PullRequest {
        number,
        title: format!("pull request {number}"),
        body: body.to_string(),
        html_url: format!("https://github.test/acme/widgets/pull/{number}"),
        head_ref: "feature/x".to_string(),
        base_ref: "main".to_string(),
        open: true,
    }
}

#[derive(Debug, Clone)]
struct Blob {
    content: String,
    sha: String,
}

#[derive(Debug, Default)]
struct FakeState {
    issues: Vec<Issue>,
    pull_requests: Vec<PullRequest>,
    comments: BTreeMap<u64, Vec<Comment>>,
    branches: BTreeMap<String, String>,
    /// Keyed by (branch, path).
    blobs: BTreeMap<(String, String), Blob>,
    failing: BTreeSet<&'static str>,
    failing_comments: BTreeSet<u64>,
    writes: Vec<FileWrite>,
    created_comments: Vec<(u64, String)>,
    created_branches: Vec<(String, String)>,
    created_pull_requests: Vec<NewPullRequest>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self, operation: &'static str) -> HostResult<()> {
        if self.failing.contains(operation) {
            return Err(HostError::Api {
                operation: operation.to_string(),
                status: 502,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory [`RepoHost`] that applies writes to its own state and records
/// them.
///
/// A pull request's changed files are the files stored on its head branch.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: RefCell<FakeState>,
}

impl FakeHost {
    /// Host with a `main` branch and nothing else.
    pub fn new() -> Self {
        let host = Self::default();
        host.add_branch("main", "base-sha");
        host
    }

    pub fn add_issue(&self, issue: Issue) {
        self.state.borrow_mut().issues.push(issue);
    }

    pub fn add_pull_request(&self, pull_request: PullRequest) {
        self.state.borrow_mut().pull_requests.push(pull_request);
    }

    /// Close a pull request the way a reviewer would, outside the service.
    pub fn close_pull_request(&self, number: u64) {
        let mut state = self.state.borrow_mut();
        for pr in state.pull_requests.iter_mut().filter(|pr| pr.number == number) {
            pr.open = false;
        }
    }

    /// Seed a comment without recording it as a write.
    pub fn add_comment(&self, number: u64, body: &str) {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.comments.entry(number).or_default().push(Comment {
            id,
            body: body.to_string(),
        });
    }

    pub fn add_branch(&self, name: &str, sha: &str) {
        self.state
            .borrow_mut()
            .branches
            .insert(name.to_string(), sha.to_string());
    }

    pub fn remove_branch(&self, name: &str) {
        self.state.borrow_mut().branches.remove(name);
    }

    /// Seed a file on a branch and return its blob hash.
    pub fn add_file(&self, branch: &str, path: &str, content: &str) -> String {
        let mut state = self.state.borrow_mut();
        let sha = format!("blob-{}", state.next_id());
        state.blobs.insert(
            (branch.to_string(), path.to_string()),
            Blob {
                content: content.to_string(),
                sha: sha.clone(),
            },
        );
        sha
    }

    /// Make every call of `operation` fail with a server error.
    pub fn fail(&self, operation: &'static str) {
        self.state.borrow_mut().failing.insert(operation);
    }

    /// Make comment listing fail for one issue or pull request.
    pub fn fail_comments_for(&self, number: u64) {
        self.state.borrow_mut().failing_comments.insert(number);
    }

    pub fn comments(&self, number: u64) -> Vec<Comment> {
        self.state
            .borrow()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.state
            .borrow()
            .blobs
            .get(&(branch.to_string(), path.to_string()))
            .map(|blob| blob.content.clone())
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.state.borrow().pull_requests.clone()
    }

    pub fn writes(&self) -> Vec<FileWrite> {
        self.state.borrow().writes.clone()
    }

    pub fn created_comments(&self) -> Vec<(u64, String)> {
        self.state.borrow().created_comments.clone()
    }

    pub fn created_branches(&self) -> Vec<(String, String)> {
        self.state.borrow().created_branches.clone()
    }

    pub fn created_pull_requests(&self) -> Vec<NewPullRequest> {
        self.state.borrow().created_pull_requests.clone()
    }
}

impl RepoHost for FakeHost {
    fn list_open_issues(&self) -> HostResult<Vec<Issue>> {
        let state = self.state.borrow();
        state.check("list issues")?;
        Ok(state.issues.iter().filter(|i| i.open).cloned().collect())
    }

    fn list_open_pull_requests(&self) -> HostResult<Vec<PullRequest>> {
        let state = self.state.borrow();
        state.check("list pull requests")?;
        Ok(state
            .pull_requests
            .iter()
            .filter(|pr| pr.open)
            .cloned()
            .collect())
    }

    fn list_issue_comments(&self, number: u64) -> HostResult<Vec<Comment>> {
        let state = self.state.borrow();
        state.check("list issue comments")?;
        if state.failing_comments.contains(&number) {
            return Err(HostError::Api {
                operation: "list issue comments".to_string(),
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        Ok(state.comments.get(&number).cloned().unwrap_or_default())
    }

    fn create_issue_comment(&self, number: u64, body: &str) -> HostResult<Comment> {
        let mut state = self.state.borrow_mut();
        state.check("create issue comment")?;
        let comment = Comment {
            id: state.next_id(),
            body: body.to_string(),
        };
        state
            .comments
            .entry(number)
            .or_default()
            .push(comment.clone());
        state.created_comments.push((number, body.to_string()));
        Ok(comment)
    }

    fn branch_head(&self, branch: &str) -> HostResult<String> {
        let state = self.state.borrow();
        state.check("get branch")?;
        state
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| HostError::NotFound {
                operation: "get branch".to_string(),
            })
    }

    fn create_branch(&self, branch: &str, sha: &str) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        state.check("create branch")?;
        if state.branches.contains_key(branch) {
            return Err(HostError::Api {
                operation: "create branch".to_string(),
                status: 422,
                message: "Reference already exists".to_string(),
            });
        }
        state.branches.insert(branch.to_string(), sha.to_string());
        state
            .created_branches
            .push((branch.to_string(), sha.to_string()));
        Ok(())
    }

    fn list_pull_request_files(&self, number: u64) -> HostResult<Vec<ChangedFile>> {
        let state = self.state.borrow();
        state.check("list pull request files")?;
        let pull_request = state
            .pull_requests
            .iter()
            .find(|pr| pr.number == number)
            .ok_or_else(|| HostError::NotFound {
                operation: "list pull request files".to_string(),
            })?;
        Ok(state
            .blobs
            .iter()
            .filter(|((branch, _), _)| *branch == pull_request.head_ref)
            .map(|((_, path), blob)| ChangedFile {
                path: path.clone(),
                sha: blob.sha.clone(),
            })
            .collect())
    }

    fn file_content(&self, path: &str, git_ref: &str) -> HostResult<String> {
        let state = self.state.borrow();
        state.check("get file content")?;
        state
            .blobs
            .get(&(git_ref.to_string(), path.to_string()))
            .map(|blob| blob.content.clone())
            .ok_or_else(|| HostError::NotFound {
                operation: "get file content".to_string(),
            })
    }

    fn write_file(&self, write: &FileWrite) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        state.check("write file")?;
        let key = (write.branch.clone(), write.path.clone());
        let current = state.blobs.get(&key).map(|blob| blob.sha.clone());
        if current != write.sha {
            return Err(HostError::Conflict {
                operation: "write file".to_string(),
                message: format!("{} does not match {:?}", write.path, write.sha),
            });
        }
        let sha = format!("blob-{}", state.next_id());
        state.blobs.insert(
            key,
            Blob {
                content: write.content.clone(),
                sha,
            },
        );
        state.writes.push(write.clone());
        Ok(())
    }

    fn create_pull_request(&self, request: &NewPullRequest) -> HostResult<PullRequest> {
        let mut state = self.state.borrow_mut();
        state.check("create pull request")?;
        let converted = request
            .issue
            .and_then(|n| state.issues.iter().position(|i| i.number == n && i.open))
            .map(|index| state.issues.remove(index));
        let (number, title) = match converted {
            Some(issue) => (issue.number, issue.title),
            None => {
                let number = state
                    .issues
                    .iter()
                    .map(|i| i.number)
                    .chain(state.pull_requests.iter().map(|pr| pr.number))
                    .max()
                    .unwrap_or(0)
                    + 1;
                (number, request.title.clone())
            }
        };
        let created = PullRequest {
            number,
            title,
            body: request.body.clone(),
            html_url: format!("https://github.test/acme/widgets/pull/{number}"),
            head_ref: request.head.clone(),
            base_ref: request.base.clone(),
            open: true,
        };
        state.pull_requests.push(created.clone());
        state.created_pull_requests.push(request.clone());
        Ok(created)
    }
}

/// Generator that replays canned answers in order and records every request.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    answers: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: RefCell::new(answers.iter().map(|a| Ok((*a).to_string())).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn push_answer(&self, answer: &str) {
        self.answers.borrow_mut().push_back(Ok(answer.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        self.answers
            .borrow_mut()
            .push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.borrow().clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.answers.borrow_mut().pop_front() {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted answer left")),
        }
    }
}
