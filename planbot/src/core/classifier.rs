//! Deterministic classification of comment threads.

use crate::core::marker::{Markers, is_approval, is_refactor_request};
use crate::core::types::{Comment, Message, PlanNeed, Role};

/// Classified view of one comment thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub plan_need: PlanNeed,
    /// Every comment in creation order, mapped to its role.
    pub history: Vec<Message>,
}

/// Classify a thread and decide whether it needs a new planning pass.
///
/// Only the last message can trigger a refactor pass. A refactor request that
/// was followed by any other comment is superseded: the most recent intent wins.
pub fn classify(markers: &Markers, comments: &[Comment]) -> Classification {
    let history: Vec<Message> = comments
        .iter()
        .map(|comment| Message::new(markers.role_of(&comment.body), comment.body.clone()))
        .collect();

    let plan_need = match history.last() {
        None => PlanNeed::Initial,
        Some(last) => match last.role {
            Role::RefactorRequest => PlanNeed::Refactor {
                feedback: last.content.clone(),
            },
            Role::PlanResponse => PlanNeed::Satisfied,
            Role::Comment => {
                if history.iter().any(|msg| msg.role == Role::PlanResponse) {
                    PlanNeed::Satisfied
                } else {
                    PlanNeed::Initial
                }
            }
        },
    };

    Classification { plan_need, history }
}

/// Body of the most recent plan comment, if any.
pub fn latest_plan(history: &[Message]) -> Option<&str> {
    history
        .iter()
        .rev()
        .find(|msg| msg.role == Role::PlanResponse)
        .map(|msg| msg.content.as_str())
}

/// True when the latest comment of an issue is an approval.
pub fn is_approved(comments: &[Comment]) -> bool {
    comments
        .last()
        .is_some_and(|comment| is_approval(&comment.body))
}

/// True when the latest comment of a pull request asks for a refactor.
pub fn refactor_pending(comments: &[Comment]) -> bool {
    comments
        .last()
        .is_some_and(|comment| is_refactor_request(&comment.body))
}

/// Join every refactor-prefixed comment, oldest first.
pub fn collect_refactor_feedback(comments: &[Comment]) -> String {
    comments
        .iter()
        .filter(|comment| is_refactor_request(&comment.body))
        .map(|comment| comment.body.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
