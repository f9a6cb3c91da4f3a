//! Action executor: turns decided actions into host side effects.
//!
//! The executor does no deduplication of its own. Each successful action
//! changes host state so that the next decision pass no longer selects it.

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::core::extract::extract_code;
use crate::core::marker::{Markers, pull_request_body, refactor_reply};
use crate::core::types::{Action, Issue, PlanTask, RefactorTask};
use crate::io::generator::{AgentRole, GenerationRequest, TextGenerator};
use crate::io::host::{FileWrite, HostError, NewPullRequest, RepoHost};
use crate::io::prompt::{FileSnapshot, PromptBuilder, persona};

/// Why an action did not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The host is not in a state the action can work from. Retrying is
    /// pointless until someone changes it.
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// Network, API, or generation failure. The next poll retries naturally.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ActionError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, ActionError::Precondition(_))
    }
}

impl From<HostError> for ActionError {
    fn from(err: HostError) -> Self {
        if err.is_precondition() {
            ActionError::Precondition(err.to_string())
        } else {
            ActionError::Transient(err.to_string())
        }
    }
}

/// Completed side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    PlanPosted { issue: u64, comment_id: u64 },
    PullRequestOpened {
        issue: u64,
        pull_request: u64,
        branch: String,
    },
    Refactored { pull_request: u64, path: String },
}

/// Plan artifact committed to a new pull request branch.
pub fn plan_file_name(issue: &Issue) -> String {
    format!("plan_{}.md", issue.id)
}

/// Branch for a pull request opened from an issue plan. The random suffix
/// keeps names unique when an issue is reopened.
pub fn feature_branch_name(issue: &Issue, rng: &mut impl Rng) -> String {
    format!(
        "feature/issue-{}-{}-{}",
        issue.number,
        issue.id,
        rng.gen_range(1000..=9999)
    )
}

pub struct ActionExecutor<'a, H: RepoHost + ?Sized, G: TextGenerator + ?Sized> {
    host: &'a H,
    generator: &'a G,
    markers: Markers,
    prompts: PromptBuilder,
    base_branch: String,
}

impl<'a, H: RepoHost + ?Sized, G: TextGenerator + ?Sized> ActionExecutor<'a, H, G> {
    pub fn new(
        host: &'a H,
        generator: &'a G,
        markers: Markers,
        prompts: PromptBuilder,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            host,
            generator,
            markers,
            prompts,
            base_branch: base_branch.into(),
        }
    }

    pub fn host(&self) -> &'a H {
        self.host
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    #[instrument(skip_all, fields(kind = action.kind(), target = action.target()))]
    pub fn execute(&self, action: &Action) -> Result<ActionOutcome, ActionError> {
        match action {
            Action::Plan(task) => self.post_plan(task),
            Action::OpenPullRequest { issue, plan } => self.open_pull_request(issue, plan),
            Action::Refactor(task) => self.apply_refactor(task),
        }
    }

    fn generate(&self, role: AgentRole, prompt: String) -> Result<String, ActionError> {
        let request = GenerationRequest {
            role,
            system: persona(role).to_string(),
            prompt,
        };
        self.generator
            .generate(&request)
            .map_err(|err| ActionError::Transient(format!("{} generation: {err:#}", role.as_str())))
    }

    fn post_plan(&self, task: &PlanTask) -> Result<ActionOutcome, ActionError> {
        let prompt = self
            .prompts
            .build_plan(task)
            .map_err(|err| ActionError::Transient(format!("{err:#}")))?;
        let plan = self.generate(AgentRole::Planner, prompt)?;
        let comment = self
            .host
            .create_issue_comment(task.issue.number, &self.markers.plan_comment(&plan))?;
        info!(issue = task.issue.number, comment_id = comment.id, "posted plan");
        Ok(ActionOutcome::PlanPosted {
            issue: task.issue.number,
            comment_id: comment.id,
        })
    }

    fn open_pull_request(&self, issue: &Issue, plan: &str) -> Result<ActionOutcome, ActionError> {
        let base_sha = match self.host.branch_head(&self.base_branch) {
            Ok(sha) => sha,
            Err(HostError::NotFound { .. }) => {
                return Err(ActionError::Precondition(format!(
                    "base branch '{}' not found",
                    self.base_branch
                )));
            }
            Err(err) => return Err(err.into()),
        };

        let branch = feature_branch_name(issue, &mut rand::thread_rng());
        self.host.create_branch(&branch, &base_sha)?;
        self.host.write_file(&FileWrite {
            path: plan_file_name(issue),
            branch: branch.clone(),
            message: format!("Create plan for {}", issue.title),
            content: plan.to_string(),
            sha: None,
        })?;
        let created = self.host.create_pull_request(&NewPullRequest {
            title: issue.title.clone(),
            head: branch.clone(),
            base: self.base_branch.clone(),
            body: pull_request_body(issue.number, plan),
            issue: Some(issue.number),
        })?;
        info!(
            issue = issue.number,
            pull_request = created.number,
            %branch,
            "opened pull request"
        );
        Ok(ActionOutcome::PullRequestOpened {
            issue: issue.number,
            pull_request: created.number,
            branch,
        })
    }

    fn apply_refactor(&self, task: &RefactorTask) -> Result<ActionOutcome, ActionError> {
        let pr = &task.pull_request;
        let files = self.host.list_pull_request_files(pr.number)?;
        let [file] = files.as_slice() else {
            warn!(pull_request = pr.number, files = files.len(), "refactor needs exactly one changed file");
            return Err(ActionError::Precondition(format!(
                "pull request #{} has {} changed files, expected 1",
                pr.number,
                files.len()
            )));
        };

        let current = self.host.file_content(&file.path, &pr.head_ref)?;
        let snapshot = FileSnapshot {
            path: file.path.clone(),
            content: current,
        };
        let prompt = self
            .prompts
            .build_refactor(task, Some(&snapshot))
            .map_err(|err| ActionError::Transient(format!("{err:#}")))?;
        let answer = self.generate(AgentRole::Coder, prompt)?;

        self.host.write_file(&FileWrite {
            path: file.path.clone(),
            branch: pr.head_ref.clone(),
            message: format!("Refactored code for pull request #{}", pr.number),
            content: extract_code(&answer),
            sha: Some(file.sha.clone()),
        })?;
        self.host
            .create_issue_comment(pr.number, &refactor_reply(&answer))?;
        info!(pull_request = pr.number, path = %file.path, "applied refactor");
        Ok(ActionOutcome::Refactored {
            pull_request: pr.number,
            path: file.path.clone(),
        })
    }
}
