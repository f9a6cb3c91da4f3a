//! Prompt rendering for the plan and refactor tasks.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::types::{Issue, Message, PlanTask, RefactorTask};
use crate::io::generator::AgentRole;

const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const REFACTOR_TEMPLATE: &str = include_str!("prompts/refactor.md");
const PLANNER_PERSONA: &str = include_str!("prompts/planner_persona.md");
const CODER_PERSONA: &str = include_str!("prompts/coder_persona.md");

/// Sections dropped, in order, when a prompt exceeds its budget.
const DROP_ORDER: [&str; 3] = ["history", "preferences", "feedback"];

static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
});

/// Break section markers inside issue, comment, or file text so they stay
/// content and cannot re-split the prompt.
fn inert(text: &str) -> String {
    SECTION_RE
        .replace_all(text, "<! -- section:$1 $2 -->")
        .into_owned()
}

/// System prompt for an agent role.
pub fn persona(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => PLANNER_PERSONA.trim(),
        AgentRole::Coder => CODER_PERSONA.trim(),
    }
}

/// Render history as `ROLE: content` lines.
pub fn render_history(history: &[Message]) -> Vec<String> {
    history
        .iter()
        .map(|msg| format!("{}: {}", msg.role.as_str().to_uppercase(), inert(&msg.content)))
        .collect()
}

/// Current content of the file a refactor rewrites.
#[derive(Debug, Clone, Serialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("plan", PLAN_TEMPLATE)
            .context("load plan template")?;
        env.add_template("refactor", REFACTOR_TEMPLATE)
            .context("load refactor template")?;
        Ok(Self { env })
    }

    fn render_plan(&self, task: &PlanTask, preferences: Option<&str>) -> Result<String> {
        let template = self.env.get_template("plan")?;
        let history = render_history(&task.history);
        let issue = Issue {
            title: inert(&task.issue.title),
            body: inert(&task.issue.body),
            ..task.issue.clone()
        };
        let feedback = task
            .feedback
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(inert);
        let rendered = template.render(context! {
            issue => issue,
            feedback => feedback,
            history => (!history.is_empty()).then_some(history),
            preferences => preferences,
        })?;
        Ok(rendered)
    }

    fn render_refactor(
        &self,
        task: &RefactorTask,
        file: Option<&FileSnapshot>,
        preferences: Option<&str>,
    ) -> Result<String> {
        let template = self.env.get_template("refactor")?;
        let file = file.map(|f| FileSnapshot {
            path: f.path.clone(),
            content: inert(&f.content),
        });
        let rendered = template.render(context! {
            pull_request => &task.pull_request,
            issue_number => task.issue_number,
            plan => inert(task.plan.trim()),
            feedback => inert(task.feedback.trim()),
            file => file,
            preferences => preferences,
        })?;
        Ok(rendered)
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: shorten the largest remaining section.
    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let marker = "\n[truncated]";
    let mut keep = largest.content.len().saturating_sub(excess + marker.len());
    while !largest.content.is_char_boundary(keep) {
        keep -= 1;
    }
    let before_len = largest.content.len();
    largest.content.truncate(keep);
    largest.content.push_str(marker);
    debug!(
        section = %largest.key,
        before_len,
        after_len = largest.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
    preferences: String,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize, preferences: impl Into<String>) -> Self {
        Self {
            budget_bytes,
            preferences: preferences.into(),
        }
    }

    fn preferences(&self) -> Option<&str> {
        Some(self.preferences.trim()).filter(|s| !s.is_empty())
    }

    fn finish(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }

    pub fn build_plan(&self, task: &PlanTask) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_plan(task, self.preferences())
            .context("render plan prompt")?;
        Ok(self.finish(&rendered))
    }

    pub fn build_refactor(&self, task: &RefactorTask, file: Option<&FileSnapshot>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_refactor(task, file, self.preferences())
            .context("render refactor prompt")?;
        Ok(self.finish(&rendered))
    }
}
