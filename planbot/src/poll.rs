//! The service loop: fetch, decide, execute, sleep.
//!
//! Every pass rebuilds its view of the repository from the host. Listing
//! failures abort the pass and propagate; failures scoped to one issue or pull
//! request only skip that item.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::decider::{
    decide_issue, decide_pull_request, issues_with_open_pull_requests, pull_request_issue,
};
use crate::core::marker::Markers;
use crate::core::types::{Action, Decision, DecisionError, IdleReason, Issue, PullRequest};
use crate::io::executor::{ActionError, ActionExecutor, ActionOutcome};
use crate::io::generator::TextGenerator;
use crate::io::host::{HostError, RepoHost};

/// An action that did not complete, with the item it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub kind: &'static str,
    pub target: u64,
    pub error: ActionError,
}

/// Summary of one poll pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub issues_seen: usize,
    pub pull_requests_seen: usize,
    /// Items whose comments could not be read or whose decision failed.
    pub items_skipped: usize,
    /// Issues with a plan that nobody has approved or pushed back on yet.
    pub awaiting_human: usize,
    /// Every action decided this pass, executed or not.
    pub actions: Vec<Action>,
    pub outcomes: Vec<ActionOutcome>,
    pub failures: Vec<ActionFailure>,
}

/// Loop options for [`run_forever`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub interval: Duration,
    /// Stop after this many passes. `None` runs until an error.
    pub max_polls: Option<u32>,
    /// Decide but do not execute.
    pub dry_run: bool,
}

/// Reason an item is left out of this pass.
#[derive(Debug, thiserror::Error)]
enum Skip {
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    Decision(#[from] DecisionError),
}

fn decide_for_issue<H: RepoHost + ?Sized>(
    host: &H,
    markers: &Markers,
    issue: &Issue,
    has_open_pull_request: bool,
) -> Result<Decision, Skip> {
    let comments = host.list_issue_comments(issue.number)?;
    Ok(decide_issue(markers, issue, &comments, has_open_pull_request)?)
}

fn decide_for_pull_request<H: RepoHost + ?Sized>(
    host: &H,
    markers: &Markers,
    pull_request: &PullRequest,
) -> Result<Decision, Skip> {
    let comments = host.list_issue_comments(pull_request.number)?;
    let issue_number = pull_request_issue(pull_request);
    let issue_comments = if issue_number == pull_request.number {
        comments.clone()
    } else {
        host.list_issue_comments(issue_number)?
    };
    Ok(decide_pull_request(
        markers,
        pull_request,
        &comments,
        &issue_comments,
    )?)
}

/// Decisions for every open issue and pull request of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decisions {
    pub actions: Vec<Action>,
    pub skipped: usize,
    pub awaiting_human: usize,
}

/// Decide every open issue and pull request.
pub fn decide_all<H: RepoHost + ?Sized>(
    host: &H,
    markers: &Markers,
    issues: &[Issue],
    pull_requests: &[PullRequest],
) -> Decisions {
    let linked = issues_with_open_pull_requests(pull_requests);
    let mut decisions = Decisions::default();

    for issue in issues {
        let has_open_pull_request = linked.binary_search(&issue.number).is_ok();
        match decide_for_issue(host, markers, issue, has_open_pull_request) {
            Ok(Decision::Act(action)) => decisions.actions.push(action),
            Ok(Decision::Idle(reason)) => {
                if reason == IdleReason::AwaitingHuman {
                    decisions.awaiting_human += 1;
                }
                debug!(issue = issue.number, ?reason, "issue idle");
            }
            Err(err) => {
                warn!(issue = issue.number, err = %err, "skipping issue");
                decisions.skipped += 1;
            }
        }
    }

    for pull_request in pull_requests {
        match decide_for_pull_request(host, markers, pull_request) {
            Ok(Decision::Act(action)) => decisions.actions.push(action),
            Ok(Decision::Idle(reason)) => {
                debug!(pull_request = pull_request.number, ?reason, "pull request idle");
            }
            Err(err) => {
                warn!(pull_request = pull_request.number, err = %err, "skipping pull request");
                decisions.skipped += 1;
            }
        }
    }

    decisions
}

/// Run one pass over the repository.
#[instrument(skip_all, fields(dry_run = dry_run))]
pub fn poll_once<H: RepoHost + ?Sized, G: TextGenerator + ?Sized>(
    executor: &ActionExecutor<'_, H, G>,
    dry_run: bool,
) -> Result<PollReport> {
    let host = executor.host();
    let issues = host.list_open_issues().context("list open issues")?;
    let pull_requests = host
        .list_open_pull_requests()
        .context("list open pull requests")?;

    let Decisions {
        actions,
        skipped,
        awaiting_human,
    } = decide_all(host, executor.markers(), &issues, &pull_requests);
    let mut report = PollReport {
        issues_seen: issues.len(),
        pull_requests_seen: pull_requests.len(),
        items_skipped: skipped,
        awaiting_human,
        ..PollReport::default()
    };

    if !dry_run {
        for action in &actions {
            match executor.execute(action) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(error) => {
                    warn!(
                        kind = action.kind(),
                        target = action.target(),
                        err = %error,
                        "action failed"
                    );
                    report.failures.push(ActionFailure {
                        kind: action.kind(),
                        target: action.target(),
                        error,
                    });
                }
            }
        }
    }
    report.actions = actions;

    let preconditions = report
        .failures
        .iter()
        .filter(|failure| failure.error.is_precondition())
        .count();
    info!(
        issues = report.issues_seen,
        pull_requests = report.pull_requests_seen,
        decided = report.actions.len(),
        succeeded = report.outcomes.len(),
        precondition_failures = preconditions,
        transient_failures = report.failures.len() - preconditions,
        skipped = report.items_skipped,
        awaiting_human = report.awaiting_human,
        "poll pass finished"
    );
    Ok(report)
}

/// Poll until `max_polls` passes have run or a pass fails.
///
/// A failed pass ends the loop with its error; the process supervisor is
/// expected to restart the service, which then reconciles from host state.
pub fn run_forever<H: RepoHost + ?Sized, G: TextGenerator + ?Sized, F: FnMut(&PollReport)>(
    executor: &ActionExecutor<'_, H, G>,
    options: RunOptions,
    mut on_pass: F,
) -> Result<u32> {
    let mut passes = 0u32;
    loop {
        let report = poll_once(executor, options.dry_run)
            .with_context(|| format!("poll pass {}", passes + 1))?;
        passes += 1;
        on_pass(&report);
        if options.max_polls.is_some_and(|max| passes >= max) {
            return Ok(passes);
        }
        thread::sleep(options.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::prompt::PromptBuilder;
    use crate::test_support::{FakeHost, ScriptedGenerator, issue, pull_request};

    fn executor<'a>(
        host: &'a FakeHost,
        generator: &'a ScriptedGenerator,
    ) -> ActionExecutor<'a, FakeHost, ScriptedGenerator> {
        ActionExecutor::new(
            host,
            generator,
            Markers::default(),
            PromptBuilder::new(20_000, ""),
            "main",
        )
    }

    fn once() -> RunOptions {
        RunOptions {
            interval: Duration::ZERO,
            max_polls: Some(1),
            dry_run: false,
        }
    }

    #[test]
    fn listing_failure_aborts_the_pass() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        host.fail("list pull requests");
        let generator = ScriptedGenerator::new(&["plan"]);

        let err = poll_once(&executor(&host, &generator), false).unwrap_err();
        assert!(format!("{err:#}").contains("list open pull requests"));
        assert!(host.created_comments().is_empty());
    }

    #[test]
    fn comment_failure_skips_only_that_issue() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        host.add_issue(issue(2));
        host.fail_comments_for(1);
        let generator = ScriptedGenerator::new(&["plan for two"]);

        let report = poll_once(&executor(&host, &generator), false).expect("poll");
        assert_eq!(report.items_skipped, 1);
        assert_eq!(
            host.created_comments(),
            vec![(2, "[coding agent]\nplan for two".to_string())]
        );
    }

    #[test]
    fn failed_action_does_not_stop_other_actions() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        host.add_issue(issue(2));
        let generator = ScriptedGenerator::default();
        generator.push_error("upstream 500");
        generator.push_answer("plan for two");

        let report = poll_once(&executor(&host, &generator), false).expect("poll");
        assert_eq!(report.actions.len(), 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].target, 1);
        assert!(!report.failures[0].error.is_precondition());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(host.comments(2).len(), 1);
    }

    #[test]
    fn dry_run_decides_without_side_effects() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        let generator = ScriptedGenerator::default();

        let report = poll_once(&executor(&host, &generator), true).expect("poll");
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].kind(), "plan");
        assert!(report.outcomes.is_empty());
        assert!(host.created_comments().is_empty());
        assert!(generator.requests().is_empty());
    }

    #[test]
    fn planned_issue_waits_for_a_human() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        host.add_comment(1, "[coding agent]\nplan");
        let generator = ScriptedGenerator::default();

        let report = poll_once(&executor(&host, &generator), false).expect("poll");
        assert!(report.actions.is_empty());
        assert_eq!(report.awaiting_human, 1);
    }

    #[test]
    fn issue_with_open_pull_request_is_left_alone() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        host.add_comment(1, "[coding agent]\nplan");
        host.add_comment(1, "approve");
        host.add_pull_request(pull_request(5, "Automated PR for Issue #1\n\nPlan:\nplan\n"));
        let generator = ScriptedGenerator::default();

        let report = poll_once(&executor(&host, &generator), false).expect("poll");
        assert!(report.actions.is_empty());
        assert_eq!(report.awaiting_human, 0);
        assert!(host.created_pull_requests().is_empty());
    }

    #[test]
    fn refactor_uses_linked_issue_plan_and_all_feedback() {
        let host = FakeHost::new();
        host.add_issue(issue(1));
        host.add_comment(1, "[coding agent]\nissue plan");
        host.add_comment(1, "approve");
        host.add_pull_request(pull_request(5, "Automated PR for Issue #1\n\nPlan:\nold plan\n"));
        host.add_file("feature/x", "plan_101.md", "old plan");
        for body in ["refactor: rename var", "looks good", "refactor: add tests"] {
            host.add_comment(5, body);
        }
        let generator = ScriptedGenerator::new(&["```\nnew plan\n```"]);

        let report = poll_once(&executor(&host, &generator), false).expect("poll");
        assert_eq!(report.outcomes.len(), 1);
        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("issue plan"));
        assert!(prompt.contains("refactor: rename var\nrefactor: add tests"));
        assert_eq!(host.file("feature/x", "plan_101.md").as_deref(), Some("new plan\n"));
    }

    #[test]
    fn run_forever_stops_after_max_polls() {
        let host = FakeHost::new();
        let generator = ScriptedGenerator::default();
        let mut seen = 0;
        let options = RunOptions {
            max_polls: Some(3),
            ..once()
        };

        let passes = run_forever(&executor(&host, &generator), options, |_| seen += 1).expect("run");
        assert_eq!(passes, 3);
        assert_eq!(seen, 3);
    }

    #[test]
    fn run_forever_propagates_pass_errors() {
        let host = FakeHost::new();
        host.fail("list issues");
        let generator = ScriptedGenerator::default();

        let err = run_forever(&executor(&host, &generator), once(), |_| {}).unwrap_err();
        assert!(format!("{err:#}").contains("poll pass 1"));
    }
}
