//! Comment marker protocol.
//!
//! Workflow state lives in comment text prefixes on the host. Detection is
//! case-insensitive; production always uses the exact configured spelling.
//! Everything past this module works on [`Role`] instead of raw prefixes.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Role;

/// Plan marker used when the config does not name one.
pub const DEFAULT_PLAN_MARKER: &str = "[coding agent]";
/// Prefix of a human (or agent) request for rework.
pub const REFACTOR_PREFIX: &str = "refactor";
/// Prefix of a human approval of the latest plan.
pub const APPROVE_PREFIX: &str = "approve";

/// Header of the pull request comment posted after a refactor.
pub const REFACTOR_REPLY_HEADER: &str = "Refactored code based on the provided feedback:";

const PULL_REQUEST_HEADER: &str = "Automated PR for Issue #";
const PULL_REQUEST_PLAN_LABEL: &str = "Plan:";

static LINKED_ISSUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Automated PR for Issue #(\d+)").unwrap());

/// Configured marker set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    plan: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self::new(DEFAULT_PLAN_MARKER)
    }
}

impl Markers {
    pub fn new(plan: impl Into<String>) -> Self {
        Self { plan: plan.into() }
    }

    pub fn plan_marker(&self) -> &str {
        &self.plan
    }

    /// Decode a comment body into its role.
    ///
    /// A refactor prefix takes precedence over the plan marker.
    pub fn role_of(&self, body: &str) -> Role {
        if is_refactor_request(body) {
            Role::RefactorRequest
        } else if starts_with_ignore_case(body, &self.plan) {
            Role::PlanResponse
        } else {
            Role::Comment
        }
    }

    /// Body of the comment that records a generated plan.
    pub fn plan_comment(&self, plan: &str) -> String {
        format!("{}\n{}", self.plan, plan)
    }
}

/// The service's own refactor reply also starts with "refactor"; it is never
/// read back as a request.
pub fn is_refactor_request(body: &str) -> bool {
    starts_with_ignore_case(body, REFACTOR_PREFIX) && !body.starts_with(REFACTOR_REPLY_HEADER)
}

pub fn is_approval(body: &str) -> bool {
    starts_with_ignore_case(body, APPROVE_PREFIX)
}

/// Body of a pull request opened from an approved plan.
pub fn pull_request_body(issue_number: u64, plan: &str) -> String {
    format!("{PULL_REQUEST_HEADER}{issue_number}\n\n{PULL_REQUEST_PLAN_LABEL}\n{plan}\n")
}

/// Pull request comment recording a refactor.
pub fn refactor_reply(answer: &str) -> String {
    format!("{REFACTOR_REPLY_HEADER}\n\n{answer}")
}

/// Issue number recorded in an automated pull request body.
pub fn linked_issue(body: &str) -> Option<u64> {
    LINKED_ISSUE_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Plan text embedded in an automated pull request body.
pub fn plan_from_pull_request_body(body: &str) -> Option<&str> {
    linked_issue(body)?;
    let (_, plan) = body.split_once(&format!("\n{PULL_REQUEST_PLAN_LABEL}\n"))?;
    let plan = plan.trim();
    (!plan.is_empty()).then_some(plan)
}

fn starts_with_ignore_case(body: &str, prefix: &str) -> bool {
    body.to_lowercase().starts_with(&prefix.to_lowercase())
}
