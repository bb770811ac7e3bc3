//! `taskloop` command-line entry point.
//!
//! `taskloop init` writes `.taskloop/config.toml`; `taskloop run` drives one
//! session against the configured completion provider and prints the result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use taskloop::agents::controller::{LlmController, SequentialController};
use taskloop::core::types::SessionStatus;
use taskloop::exit_codes;
use taskloop::io::completion::{HttpCompletionService, Profile};
use taskloop::io::config::{
    AgentConfig, DEFAULT_CONFIG_PATH, Provider, load_config, resolve_endpoint, write_config,
};
use taskloop::logging;
use taskloop::session::{IterationEffect, IterationReport, SessionConfig, SessionOutcome, run_session};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "LLM-driven plan / execute / reflect agent loop"
)]
struct Cli {
    /// Log loop progress to stderr (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one session for OBJECTIVE.
    Run {
        objective: String,
        /// Iteration budget (overrides the config file).
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Execute the plan in order instead of asking the model what to do next.
        #[arg(long)]
        sequential: bool,
        /// Completion provider (overrides the config file).
        #[arg(long)]
        provider: Option<Provider>,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Print the result record as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Write the default config file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            objective,
            max_iterations,
            sequential,
            provider,
            config,
            json,
        } => cmd_run(RunArgs {
            objective,
            max_iterations,
            sequential,
            provider,
            config,
            json,
        }),
        Command::Init { force, config } => cmd_init(&config, force),
    }
}

struct RunArgs {
    objective: String,
    max_iterations: Option<u32>,
    sequential: bool,
    provider: Option<Provider>,
    config: PathBuf,
    json: bool,
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    if args.objective.trim().is_empty() {
        bail!("objective must not be empty");
    }
    let mut config = load_config(&args.config)?;
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }
    if let Some(provider) = args.provider {
        config.completion.provider = provider;
    }
    config.validate()?;

    let endpoint = resolve_endpoint(&config.completion, |key| std::env::var(key).ok())?;
    let service = HttpCompletionService::new(endpoint, &config.completion)?;
    let session = SessionConfig::from(&config);
    let show_progress = !args.json;
    let on_iteration = |report: &IterationReport| {
        if show_progress {
            eprintln!("{}", describe_iteration(report));
        }
    };

    let outcome = if args.sequential {
        run_session(&service, &SequentialController, &args.objective, &session, on_iteration)?
    } else {
        let controller = LlmController::new(session.agent_settings(Profile::Deterministic));
        run_session(&service, &controller, &args.objective, &session, on_iteration)?
    };

    if args.json {
        let payload = serde_json::to_string_pretty(&outcome).context("serialize session outcome")?;
        println!("{payload}");
    } else {
        print_summary(&outcome);
    }

    Ok(match outcome.status {
        SessionStatus::Completed => exit_codes::OK,
        _ => exit_codes::BUDGET_EXHAUSTED,
    })
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn describe_iteration(report: &IterationReport) -> String {
    let detail = match &report.effect {
        IterationEffect::Planned { tasks, revision } => {
            let kind = if *revision { "revised plan" } else { "plan" };
            format!("{kind} with {tasks} tasks")
        }
        IterationEffect::PlanRetained { .. } => "planner output unreadable, kept previous plan".to_string(),
        IterationEffect::Executed {
            index,
            quality_score,
            structured,
        } => {
            let note = if *structured { "" } else { " (unstructured)" };
            format!("task {} done, quality {quality_score:.2}{note}", index + 1)
        }
        IterationEffect::AllTasksDone => "all planned tasks already done".to_string(),
        IterationEffect::ReflectionRecorded {
            should_replan,
            confidence,
        } => {
            let note = if *should_replan { ", suggests replanning" } else { "" };
            format!("reflected, confidence {confidence:.2}{note}")
        }
        IterationEffect::ReflectionSkipped => "reflection skipped".to_string(),
        IterationEffect::Completed => "objective completed".to_string(),
    };
    format!(
        "[{:>2}] {:<8} {detail}",
        report.iteration,
        report.decision.action.as_str()
    )
}

fn print_summary(outcome: &SessionOutcome) {
    println!("objective:   {}", outcome.objective);
    println!("status:      {}", outcome.status);
    println!("iterations:  {}", outcome.iterations_used);
    println!("confidence:  {:.2}", outcome.final_confidence);
    println!("replans:     {}", outcome.replan_count);
    println!(
        "tasks:       {}/{}",
        outcome.completed_tasks.len(),
        outcome.plan.len()
    );
    for (i, task) in outcome.completed_tasks.iter().enumerate() {
        println!("  {}. [{:.2}] {}", i + 1, task.quality_score, task.task);
    }
    if !outcome.reflections.is_empty() {
        println!("reflections: {}", outcome.reflections.len());
    }
}
