//! Shared deterministic types for the workflow core.
//!
//! Host data is decoded into these types at the boundary. Nothing here carries
//! state across polls; every value is rebuilt from host data on each pass.

use serde::{Deserialize, Serialize};

/// Role of a comment in an issue thread, derived from its body prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Comment,
    RefactorRequest,
    PlanResponse,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Comment => "comment",
            Role::RefactorRequest => "refactor_request",
            Role::PlanResponse => "plan_response",
        }
    }
}

/// One classified entry of a comment thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Comment as read from the host. Vector order is creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
}

/// Open or closed issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    /// Host-wide id, distinct from the per-repository number.
    pub id: u64,
    pub title: String,
    pub body: String,
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub html_url: String,
    pub head_ref: String,
    pub base_ref: String,
    pub open: bool,
}

/// A file touched by a pull request, with the blob hash of its head version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub sha: String,
}

/// Whether an issue needs a new planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNeed {
    /// A plan already answers the thread.
    Satisfied,
    /// No plan has been produced for the thread yet.
    Initial,
    /// The latest comment asks for rework; carries that comment's body.
    Refactor { feedback: String },
}

impl PlanNeed {
    pub fn is_needed(&self) -> bool {
        !matches!(self, PlanNeed::Satisfied)
    }

    pub fn feedback(&self) -> Option<&str> {
        match self {
            PlanNeed::Refactor { feedback } => Some(feedback.as_str()),
            _ => None,
        }
    }
}

/// Inputs for a plan generation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTask {
    pub issue: Issue,
    pub feedback: Option<String>,
    pub history: Vec<Message>,
}

/// Inputs for a refactor pass on an open pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefactorTask {
    pub pull_request: PullRequest,
    pub issue_number: u64,
    pub plan: String,
    /// Every refactor-prefixed comment on the pull request, joined by newlines.
    pub feedback: String,
}

/// Side effect the decider asks the executor to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Plan(PlanTask),
    OpenPullRequest { issue: Issue, plan: String },
    Refactor(RefactorTask),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Plan(_) => "plan",
            Action::OpenPullRequest { .. } => "open_pull_request",
            Action::Refactor(_) => "refactor",
        }
    }

    /// Issue or pull request number the action targets.
    pub fn target(&self) -> u64 {
        match self {
            Action::Plan(task) => task.issue.number,
            Action::OpenPullRequest { issue, .. } => issue.number,
            Action::Refactor(task) => task.pull_request.number,
        }
    }
}

/// Why no action was decided for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// The issue already has an open pull request.
    PullRequestOpen,
    /// A plan was posted and no approval or rework request followed.
    AwaitingHuman,
    /// The pull request's latest comment is not a refactor request.
    NoRefactorPending,
}

/// Outcome of deciding one issue or pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Act(Action),
    Idle(IdleReason),
}

impl Decision {
    pub fn action(&self) -> Option<&Action> {
        match self {
            Decision::Act(action) => Some(action),
            Decision::Idle(_) => None,
        }
    }

    pub fn into_action(self) -> Option<Action> {
        match self {
            Decision::Act(action) => Some(action),
            Decision::Idle(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecisionError {
    #[error("issue #{issue} was approved but has no plan comment")]
    MissingPlan { issue: u64 },
}
