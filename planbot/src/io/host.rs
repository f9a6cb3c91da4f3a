//! Repository host abstraction.
//!
//! The [`RepoHost`] trait decouples the workflow from the actual host backend
//! (currently GitHub). Tests use an in-memory host that records every write.

use crate::core::types::{ChangedFile, Comment, Issue, PullRequest};

/// Failure reported by the repository host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The addressed object does not exist (e.g. a renamed base branch).
    #[error("{operation}: not found")]
    NotFound { operation: String },
    /// The write was rejected because the object changed since it was read.
    #[error("{operation}: conflict: {message}")]
    Conflict { operation: String, message: String },
    #[error("{operation}: status {status}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },
    #[error("{operation}: request failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{operation}: unexpected response: {message}")]
    Decode { operation: String, message: String },
}

impl HostError {
    /// True for failures that will not clear up without the host state changing.
    pub fn is_precondition(&self) -> bool {
        matches!(self, HostError::NotFound { .. } | HostError::Conflict { .. })
    }
}

pub type HostResult<T> = Result<T, HostError>;

/// File write on a branch. `sha` is the blob hash being replaced, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub branch: String,
    pub message: String,
    /// Plain text; the host implementation applies any transport encoding.
    pub content: String,
    pub sha: Option<String>,
}

/// Pull request to open. With `issue` set, the host converts that issue into
/// the pull request, so it keeps the issue's number and thread and closing the
/// pull request also closes the issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub issue: Option<u64>,
}

/// Operations the workflow needs from a repository host.
pub trait RepoHost {
    /// Open issues, excluding pull requests.
    fn list_open_issues(&self) -> HostResult<Vec<Issue>>;
    fn list_open_pull_requests(&self) -> HostResult<Vec<PullRequest>>;
    /// Issue-level comments of an issue or pull request, oldest first.
    fn list_issue_comments(&self, number: u64) -> HostResult<Vec<Comment>>;
    fn create_issue_comment(&self, number: u64, body: &str) -> HostResult<Comment>;
    /// Commit SHA at the tip of `branch`.
    fn branch_head(&self, branch: &str) -> HostResult<String>;
    fn create_branch(&self, branch: &str, sha: &str) -> HostResult<()>;
    fn list_pull_request_files(&self, number: u64) -> HostResult<Vec<ChangedFile>>;
    /// Decoded text of `path` at `git_ref`.
    fn file_content(&self, path: &str, git_ref: &str) -> HostResult<String>;
    /// Create or update a file. Updates must carry the current blob hash.
    fn write_file(&self, write: &FileWrite) -> HostResult<()>;
    fn create_pull_request(&self, request: &NewPullRequest) -> HostResult<PullRequest>;
}
