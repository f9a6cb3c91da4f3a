//! Transition decider for issues and open pull requests.
//!
//! Decisions are recomputed from host data on every poll. Each call yields at
//! most one action for the item it is given.

use crate::core::classifier::{
    classify, collect_refactor_feedback, is_approved, latest_plan, refactor_pending,
};
use crate::core::marker::{Markers, linked_issue, plan_from_pull_request_body};
use crate::core::types::{
    Action, Comment, Decision, DecisionError, IdleReason, Issue, PlanTask, PullRequest,
    RefactorTask,
};

/// Decide the next step for an issue.
///
/// Order of checks: an open pull request parks the issue, then a pending plan
/// need, then a human approval of the latest plan.
pub fn decide_issue(
    markers: &Markers,
    issue: &Issue,
    comments: &[Comment],
    has_open_pull_request: bool,
) -> Result<Decision, DecisionError> {
    if has_open_pull_request {
        return Ok(Decision::Idle(IdleReason::PullRequestOpen));
    }

    let classification = classify(markers, comments);
    if classification.plan_need.is_needed() {
        return Ok(Decision::Act(Action::Plan(PlanTask {
            issue: issue.clone(),
            feedback: classification.plan_need.feedback().map(str::to_string),
            history: classification.history,
        })));
    }

    if is_approved(comments) {
        let plan = latest_plan(&classification.history)
            .ok_or(DecisionError::MissingPlan {
                issue: issue.number,
            })?
            .to_string();
        return Ok(Decision::Act(Action::OpenPullRequest {
            issue: issue.clone(),
            plan,
        }));
    }

    Ok(Decision::Idle(IdleReason::AwaitingHuman))
}

/// Issue number a pull request belongs to.
///
/// Automated pull requests record it in their body. Otherwise the pull request
/// number is used, since an issue converted into a pull request keeps it.
pub fn pull_request_issue(pull_request: &PullRequest) -> u64 {
    linked_issue(&pull_request.body).unwrap_or(pull_request.number)
}

/// Decide the next step for an open pull request.
///
/// `issue_comments` is the thread of the issue returned by
/// [`pull_request_issue`]; its latest plan is preferred over the plan embedded
/// in the pull request body.
pub fn decide_pull_request(
    markers: &Markers,
    pull_request: &PullRequest,
    comments: &[Comment],
    issue_comments: &[Comment],
) -> Result<Decision, DecisionError> {
    if !refactor_pending(comments) {
        return Ok(Decision::Idle(IdleReason::NoRefactorPending));
    }

    let issue_number = pull_request_issue(pull_request);
    let history = classify(markers, issue_comments).history;
    let plan = latest_plan(&history)
        .or_else(|| plan_from_pull_request_body(&pull_request.body))
        .ok_or(DecisionError::MissingPlan {
            issue: issue_number,
        })?
        .to_string();

    Ok(Decision::Act(Action::Refactor(RefactorTask {
        pull_request: pull_request.clone(),
        issue_number,
        plan,
        feedback: collect_refactor_feedback(comments),
    })))
}

/// Issue numbers that already have an open pull request.
pub fn issues_with_open_pull_requests(pull_requests: &[PullRequest]) -> Vec<u64> {
    let mut numbers: Vec<u64> = pull_requests
        .iter()
        .filter(|pr| pr.open)
        .map(pull_request_issue)
        .collect();
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}
