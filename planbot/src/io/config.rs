//! Service configuration stored in `planbot.toml`.
//!
//! Values come from the TOML file (all fields optional), then from the
//! environment variables the service has always honoured. Credentials are only
//! ever read from the environment.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::marker::DEFAULT_PLAN_MARKER;
use crate::io::github::RepoRef;

pub const DEFAULT_CONFIG_PATH: &str = "planbot.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanbotConfig {
    pub github: GithubConfig,
    pub poll: PollConfig,
    pub markers: MarkerConfig,
    pub generator: GeneratorConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    /// Repository as `owner/name`.
    pub repo: String,
    /// Branch new work is forked from and pull requests target.
    pub base_branch: String,
    pub api_base: String,
    /// Environment variable holding the access token.
    pub token_env: String,
    pub request_timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: "kvnn/AIAgentsStarterKit".to_string(),
            base_branch: "main".to_string(),
            api_base: "https://api.github.com".to_string(),
            token_env: "GH_ACCESS_TOKEN".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl GithubConfig {
    pub fn repo_ref(&self) -> Result<RepoRef> {
        self.repo.parse()
    }

    /// Read the access token from the configured environment variable.
    pub fn token(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        lookup(&self.token_env)
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow!("missing github token (set {})", self.token_env))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    /// Sleep between the end of one pass and the start of the next.
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MarkerConfig {
    /// Prefix that identifies plan comments.
    pub plan: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            plan: DEFAULT_PLAN_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// OpenAI-compatible chat completions over HTTP.
    Chat,
    /// Subprocess fed the prompt on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,
    /// Command line for the `command` backend.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate generator output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Overrides the chat endpoint picked from the available API key.
    pub api_base: Option<String>,
    /// Use `cheap_model` for every role.
    pub cheap_mode: bool,
    pub cheap_model: Option<String>,
    pub planner: ModelConfig,
    pub coder: ModelConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Chat,
            command: vec!["llm".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
            api_base: None,
            cheap_mode: false,
            cheap_model: None,
            planner: ModelConfig {
                model: "gpt-4o".to_string(),
                temperature: 0.2,
            },
            coder: ModelConfig {
                model: "gpt-4o".to_string(),
                temperature: 0.1,
            },
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        GeneratorConfig::default().planner
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptConfig {
    /// Maximum prompt size before sections are dropped.
    pub budget_bytes: usize,
    /// Technology preferences injected into every prompt.
    pub preferences: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 60_000,
            preferences: "We prefer a simple FastAPI backend that serves a React Native frontend \
                          with Mui, hosted on a single AWS instance with Postgres. We use git for \
                          version control and markdown for documentation. Bash scripts must work \
                          the same on OSX and Ubuntu."
                .to_string(),
        }
    }
}

impl PlanbotConfig {
    pub fn validate(&self) -> Result<()> {
        self.github.repo_ref()?;
        if self.github.base_branch.trim().is_empty() {
            return Err(anyhow!("github.base_branch must not be empty"));
        }
        if self.github.token_env.trim().is_empty() {
            return Err(anyhow!("github.token_env must not be empty"));
        }
        if self.github.request_timeout_secs == 0 {
            return Err(anyhow!("github.request_timeout_secs must be > 0"));
        }
        if self.poll.interval_secs == 0 {
            return Err(anyhow!("poll.interval_secs must be > 0"));
        }
        if self.markers.plan.trim().is_empty() {
            return Err(anyhow!("markers.plan must not be empty"));
        }
        if self.generator.timeout_secs == 0 {
            return Err(anyhow!("generator.timeout_secs must be > 0"));
        }
        if self.generator.output_limit_bytes == 0 {
            return Err(anyhow!("generator.output_limit_bytes must be > 0"));
        }
        if self.generator.backend == GeneratorBackend::Command
            && self
                .generator
                .command
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("generator.command must be a non-empty array"));
        }
        if self.generator.cheap_mode && self.generator.cheap_model.is_none() {
            return Err(anyhow!("generator.cheap_mode requires generator.cheap_model"));
        }
        for (role, model) in [
            ("planner", &self.generator.planner),
            ("coder", &self.generator.coder),
        ] {
            if model.model.trim().is_empty() {
                return Err(anyhow!("generator.{role}.model must not be empty"));
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(anyhow!("generator.{role}.temperature must be within 0..=2"));
            }
        }
        if self.prompt.budget_bytes == 0 {
            return Err(anyhow!("prompt.budget_bytes must be > 0"));
        }
        Ok(())
    }

    /// Apply environment overrides.
    ///
    /// `lookup` is usually `std::env::var(..).ok()`; tests pass a map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(repo) = non_empty("GH_REPO_NAME") {
            self.github.repo = repo;
        }
        if let Some(branch) = non_empty("GH_BASE_BRANCH") {
            self.github.base_branch = branch;
        }
        if let Some(cheap) = non_empty("CHEAP_MODE") {
            self.generator.cheap_mode = cheap == "True";
        }
        if let Some(model) = non_empty("CHEAP_MODE_LLM") {
            self.generator.cheap_model = Some(model);
        }
        if let Some(model) = non_empty("CTO_AGENT_LLM") {
            self.generator.planner.model = model;
        }
        if let Some(model) = non_empty("CODER_AGENT_LLM") {
            self.generator.coder.model = model;
        }
    }
}

/// Load config from a TOML file, apply environment overrides, and validate.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<PlanbotConfig> {
    let mut cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        PlanbotConfig::default()
    };
    cfg.apply_env(lookup);
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml"), env(&[])).expect("load");
        assert_eq!(cfg, PlanbotConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("planbot.toml");
        fs::write(
            &path,
            "[github]\nrepo = \"acme/widgets\"\n\n[markers]\nplan = \"[architect plan]\"\n",
        )
        .expect("write");
        let cfg = load_config(&path, env(&[])).expect("load");
        assert_eq!(cfg.github.repo, "acme/widgets");
        assert_eq!(cfg.github.base_branch, "main");
        assert_eq!(cfg.markers.plan, "[architect plan]");
        assert_eq!(cfg.poll.interval_secs, 5);
    }

    #[test]
    fn environment_overrides_file_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("planbot.toml");
        fs::write(&path, "[github]\nrepo = \"acme/widgets\"\n").expect("write");
        let cfg = load_config(
            &path,
            env(&[
                ("GH_REPO_NAME", "other/repo"),
                ("GH_BASE_BRANCH", "develop"),
                ("CHEAP_MODE", "True"),
                ("CHEAP_MODE_LLM", "gpt-4o-mini"),
                ("CODER_AGENT_LLM", "claude"),
            ]),
        )
        .expect("load");
        assert_eq!(cfg.github.repo, "other/repo");
        assert_eq!(cfg.github.base_branch, "develop");
        assert!(cfg.generator.cheap_mode);
        assert_eq!(cfg.generator.cheap_model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(cfg.generator.coder.model, "claude");
        assert_eq!(cfg.generator.planner.model, "gpt-4o");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = PlanbotConfig::default();
        cfg.poll.interval_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PlanbotConfig::default();
        cfg.github.repo = "not-a-repo".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = PlanbotConfig::default();
        cfg.generator.backend = GeneratorBackend::Command;
        cfg.generator.command = Vec::new();
        assert!(cfg.validate().is_err());

        let mut cfg = PlanbotConfig::default();
        cfg.generator.cheap_mode = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn token_comes_from_named_env_var() {
        let github = GithubConfig::default();
        assert_eq!(
            github
                .token(env(&[("GH_ACCESS_TOKEN", " secret \n")]))
                .expect("token"),
            "secret"
        );
        let err = github.token(env(&[("GH_ACCESS_TOKEN", "")])).unwrap_err();
        assert!(err.to_string().contains("GH_ACCESS_TOKEN"));
    }
}
