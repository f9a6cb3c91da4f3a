//! Text-generation backends.
//!
//! The [`TextGenerator`] trait decouples the workflow from the model backend.
//! Generation is stateless: a request goes in, free text comes out, and the
//! marker convention is the only structure applied to it downstream.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{GeneratorBackend, GeneratorConfig, ModelConfig};
use crate::io::process::run_command_with_timeout;

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Which agent a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    /// Writes plans for issues.
    Planner,
    /// Rewrites pull request files.
    Coder,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub role: AgentRole,
    pub system: String,
    pub prompt: String,
}

pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

impl<T: TextGenerator + ?Sized> TextGenerator for Box<T> {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request)
    }
}

/// Build the configured backend.
pub fn generator_from_config(
    config: &GeneratorConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Box<dyn TextGenerator>> {
    match config.backend {
        GeneratorBackend::Chat => Ok(Box::new(ChatGenerator::from_config(config, lookup)?)),
        GeneratorBackend::Command => Ok(Box::new(CommandGenerator::from_config(config)?)),
    }
}

/// Model settings for a role, honouring cheap mode.
pub fn model_for(config: &GeneratorConfig, role: AgentRole) -> ModelConfig {
    let base = match role {
        AgentRole::Planner => &config.planner,
        AgentRole::Coder => &config.coder,
    };
    match (config.cheap_mode, &config.cheap_model) {
        (true, Some(model)) => ModelConfig {
            model: model.clone(),
            temperature: base.temperature,
        },
        _ => base.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
#[derive(Debug, Clone)]
pub struct ChatGenerator {
    http: Client,
    api_base: String,
    api_key: String,
    planner: ModelConfig,
    coder: ModelConfig,
}

impl ChatGenerator {
    /// OpenRouter is used whenever `OPENROUTER_API_KEY` is set; otherwise
    /// `OPENAI_API_KEY` is required.
    pub fn from_config(
        config: &GeneratorConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let (default_base, api_key) = match non_empty("OPENROUTER_API_KEY") {
            Some(key) => (OPENROUTER_API_BASE, key),
            None => (
                OPENAI_API_BASE,
                non_empty("OPENAI_API_KEY")
                    .ok_or_else(|| anyhow!("set OPENROUTER_API_KEY or OPENAI_API_KEY"))?,
            ),
        };
        let api_base = config.api_base.as_deref().unwrap_or(default_base);
        Self::new(
            api_base,
            &api_key,
            model_for(config, AgentRole::Planner),
            model_for(config, AgentRole::Coder),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn new(
        api_base: &str,
        api_key: &str,
        planner: ModelConfig,
        coder: ModelConfig,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("build chat http client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            planner,
            coder,
        })
    }
}

impl TextGenerator for ChatGenerator {
    #[instrument(skip_all, fields(role = request.role.as_str()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let model = match request.role {
            AgentRole::Planner => &self.planner,
            AgentRole::Coder => &self.coder,
        };
        info!(model = %model.model, prompt_bytes = request.prompt.len(), "requesting completion");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": model.model,
                "temperature": model.temperature,
                "messages": [
                    { "role": "system", "content": request.system },
                    { "role": "user", "content": request.prompt },
                ],
            }))
            .send()
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(status = status.as_u16(), "chat completion rejected");
            bail!(
                "chat completion failed with status {}: {}",
                status.as_u16(),
                body.chars().take(240).collect::<String>()
            );
        }

        let parsed: ChatResponse = response
            .json()
            .context("decode chat completion response")?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow!("chat completion returned no content"))?;
        debug!(answer_bytes = text.len(), "completion received");
        Ok(text)
    }
}

/// Generator that pipes the prompt to a local command and reads stdout.
///
/// The role is exported as `PLANBOT_ROLE` so one wrapper script can pick a
/// model per agent.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn from_config(config: &GeneratorConfig) -> Result<Self> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator.command must be a non-empty array"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
        })
    }
}

impl TextGenerator for CommandGenerator {
    #[instrument(skip_all, fields(program = %self.program, role = request.role.as_str()))]
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env("PLANBOT_ROLE", request.role.as_str());
        let input = format!("{}\n\n{}", request.system, request.prompt);

        let output =
            run_command_with_timeout(cmd, Some(input.as_bytes()), self.timeout, self.output_limit_bytes)
                .with_context(|| format!("run generator {}", self.program))?;
        if output.timed_out {
            bail!("generator {} timed out after {:?}", self.program, self.timeout);
        }
        if !output.status.success() {
            bail!(
                "generator {} failed with status {:?}: {}",
                self.program,
                output.status.code(),
                output.stderr_tail()
            );
        }
        let text = output.stdout_text().trim().to_string();
        if text.is_empty() {
            bail!("generator {} produced no output", self.program);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn request(role: AgentRole) -> GenerationRequest {
        GenerationRequest {
            role,
            system: "system text".to_string(),
            prompt: "write a plan".to_string(),
        }
    }

    #[test]
    fn cheap_mode_uses_one_model_but_keeps_temperatures() {
        let config = GeneratorConfig {
            cheap_mode: true,
            cheap_model: Some("small".to_string()),
            ..GeneratorConfig::default()
        };
        let planner = model_for(&config, AgentRole::Planner);
        let coder = model_for(&config, AgentRole::Coder);
        assert_eq!(planner.model, "small");
        assert_eq!(coder.model, "small");
        assert_eq!(planner.temperature, 0.2);
        assert_eq!(coder.temperature, 0.1);
    }

    #[test]
    fn chat_generator_prefers_openrouter_key() {
        let lookup = |key: &str| match key {
            "OPENROUTER_API_KEY" => Some("or-key".to_string()),
            "OPENAI_API_KEY" => Some("oa-key".to_string()),
            _ => None,
        };
        let generator = ChatGenerator::from_config(&GeneratorConfig::default(), lookup).expect("build");
        assert_eq!(generator.api_base, OPENROUTER_API_BASE);
        assert_eq!(generator.api_key, "or-key");

        let err = ChatGenerator::from_config(&GeneratorConfig::default(), |_| None).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn chat_generator_sends_role_model_and_reads_first_choice() {
        let server = MockServer::start();
        let completion = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer test-key")
                .body_includes("\"model\":\"coder-model\"")
                .body_includes("\"content\":\"write a plan\"");
            then.status(200).json_body(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  the answer \n" } }]
            }));
        });

        let generator = ChatGenerator::new(
            &server.base_url(),
            "test-key",
            ModelConfig {
                model: "planner-model".to_string(),
                temperature: 0.2,
            },
            ModelConfig {
                model: "coder-model".to_string(),
                temperature: 0.1,
            },
            Duration::from_secs(5),
        )
        .expect("generator");

        let text = generator.generate(&request(AgentRole::Coder)).expect("generate");
        completion.assert();
        assert_eq!(text, "the answer");
    }

    #[test]
    fn chat_generator_reports_http_failures() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).body("slow down");
        });
        let generator = ChatGenerator::new(
            &server.base_url(),
            "k",
            ModelConfig::default(),
            ModelConfig::default(),
            Duration::from_secs(5),
        )
        .expect("generator");

        let err = generator.generate(&request(AgentRole::Planner)).unwrap_err();
        assert!(err.to_string().contains("status 429"));
    }

    #[cfg(unix)]
    #[test]
    fn command_generator_pipes_prompt_through_stdin() {
        let config = GeneratorConfig {
            backend: GeneratorBackend::Command,
            command: vec!["cat".to_string()],
            ..GeneratorConfig::default()
        };
        let generator = CommandGenerator::from_config(&config).expect("build");
        let text = generator.generate(&request(AgentRole::Planner)).expect("generate");
        assert_eq!(text, "system text\n\nwrite a plan");
    }

    #[cfg(unix)]
    #[test]
    fn command_generator_rejects_failing_command() {
        let config = GeneratorConfig {
            backend: GeneratorBackend::Command,
            command: vec!["false".to_string()],
            ..GeneratorConfig::default()
        };
        let generator = CommandGenerator::from_config(&config).expect("build");
        assert!(generator.generate(&request(AgentRole::Coder)).is_err());
    }
}
