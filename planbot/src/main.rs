//! Planbot: plans GitHub issues, opens pull requests for approved plans, and
//! applies refactor requests to them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use planbot::core::classifier::classify;
use planbot::core::marker::Markers;
use planbot::core::types::{Comment, PlanNeed};
use planbot::exit_codes;
use planbot::io::config::{DEFAULT_CONFIG_PATH, PlanbotConfig, load_config};
use planbot::io::executor::ActionExecutor;
use planbot::io::generator::generator_from_config;
use planbot::io::github::GithubClient;
use planbot::io::prompt::PromptBuilder;
use planbot::logging;
use planbot::poll::{PollReport, RunOptions, run_forever};

#[derive(Parser)]
#[command(
    name = "planbot",
    version,
    about = "Plans GitHub issues and applies review feedback to their pull requests"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the repository and act on issues and pull requests.
    Run {
        /// Run a single poll pass and exit.
        #[arg(long)]
        once: bool,
        /// Decide and print actions without executing them.
        #[arg(long)]
        dry_run: bool,
        /// Stop after this many poll passes.
        #[arg(long, conflicts_with = "once")]
        max_polls: Option<u32>,
    },
    /// Validate the config and print the effective values.
    CheckConfig,
    /// Classify a JSON array of comment bodies and print the result.
    Classify {
        /// File holding a JSON array of strings, oldest comment first.
        file: PathBuf,
    },
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, env_lookup)?;
    match cli.command {
        Command::Run {
            once,
            dry_run,
            max_polls,
        } => cmd_run(&config, once, dry_run, max_polls),
        Command::CheckConfig => cmd_check_config(&config),
        Command::Classify { file } => cmd_classify(&config, &file),
    }
}

fn cmd_run(config: &PlanbotConfig, once: bool, dry_run: bool, max_polls: Option<u32>) -> Result<i32> {
    let token = config.github.token(env_lookup)?;
    let client = GithubClient::new(
        &config.github.api_base,
        &token,
        config.github.repo_ref()?,
        Duration::from_secs(config.github.request_timeout_secs),
    )?;
    let generator = generator_from_config(&config.generator, env_lookup)?;
    let executor = ActionExecutor::new(
        &client,
        &*generator,
        Markers::new(config.markers.plan.clone()),
        PromptBuilder::new(config.prompt.budget_bytes, config.prompt.preferences.clone()),
        config.github.base_branch.clone(),
    );
    let options = RunOptions {
        interval: Duration::from_secs(config.poll.interval_secs),
        max_polls: if once { Some(1) } else { max_polls },
        dry_run,
    };

    let on_pass = |report: &PollReport| {
        if dry_run {
            for action in &report.actions {
                println!("{} #{}", action.kind(), action.target());
            }
        }
    };
    match run_forever(&executor, options, on_pass) {
        Ok(_) => Ok(exit_codes::OK),
        Err(err) => {
            eprintln!("{err:#}");
            Ok(exit_codes::POLL_FAILED)
        }
    }
}

fn cmd_check_config(config: &PlanbotConfig) -> Result<i32> {
    let rendered = toml::to_string_pretty(config).context("render config")?;
    print!("{rendered}");
    let token_state = match config.github.token(env_lookup) {
        Ok(_) => "set",
        Err(_) => "missing",
    };
    println!("# {}: {token_state}", config.github.token_env);
    Ok(exit_codes::OK)
}

fn cmd_classify(config: &PlanbotConfig, file: &Path) -> Result<i32> {
    let raw = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let bodies: Vec<String> =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", file.display()))?;
    let comments: Vec<Comment> = bodies
        .into_iter()
        .zip(1u64..)
        .map(|(body, id)| Comment { id, body })
        .collect();

    let classification = classify(&Markers::new(config.markers.plan.clone()), &comments);
    let (need, feedback) = match &classification.plan_need {
        PlanNeed::Satisfied => ("satisfied", None),
        PlanNeed::Initial => ("initial", None),
        PlanNeed::Refactor { feedback } => ("refactor", Some(feedback.as_str())),
    };
    let output = json!({
        "needs_new_plan": classification.plan_need.is_needed(),
        "plan_need": need,
        "feedback": feedback,
        "history": classification.history,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("render classification")?
    );
    Ok(exit_codes::OK)
}
