// Copyright (c) 2025 Workflow Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin command-line demonstrator for `workflow-engine-core`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow_engine_core::actions::{ActionContext, ActionError, ActionExecutor, ActionRegistry};
use workflow_engine_core::script::ScriptEngine;
use workflow_engine_core::value::Value;
use workflow_engine_core::workflow::{Workflow, WorkflowLoader};
use workflow_engine_core::{EngineError, WorkflowDriver, WorkflowStatus};

#[derive(Parser)]
#[command(name = "workflow-engine")]
#[command(version, about = "Declarative workflow execution engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow document
    Validate {
        /// Path to workflow JSON file
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a workflow to completion
    Run {
        /// Path to workflow JSON file
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string, or a path to a JSON file
        #[arg(short, long)]
        input: Option<String>,

        /// Default concurrency bound for `parallel` steps that don't declare
        /// their own `max_concurrent`
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("workflow_engine={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_workflow(&file),
        Commands::Run {
            file,
            input,
            max_concurrent,
        } => run_workflow(&file, input.as_deref(), max_concurrent).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_workflow(file_path: &str) -> Result<Workflow> {
    let content =
        fs::read_to_string(file_path).with_context(|| format!("failed to read workflow file: {file_path}"))?;
    let raw: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("failed to parse workflow JSON: {file_path}"))?;
    Workflow::from_json(raw).with_context(|| format!("failed to build workflow document: {file_path}"))
}

fn validate_workflow(file_path: &str) -> Result<()> {
    info!(file = file_path, "validating workflow");
    println!("{} {}", "Validating workflow:".cyan().bold(), file_path);

    let workflow = load_workflow(file_path)?;
    let resolved_inputs = workflow.resolve_inputs(HashMap::new());
    workflow.validate(&resolved_inputs).context("workflow validation failed")?;

    println!("{}", "\u{2713} Workflow is valid".green().bold());
    println!("  Id: {}", workflow.workflow.id);
    println!("  Name: {}", workflow.workflow.name);
    println!("  Steps: {}", workflow.steps.len());

    Ok(())
}

async fn run_workflow(file_path: &str, input: Option<&str>, max_concurrent: Option<usize>) -> Result<()> {
    info!(file = file_path, "running workflow");
    println!("{} {}", "Running workflow:".cyan().bold(), file_path);

    let workflow = load_workflow(file_path)?;
    let inputs = match input {
        Some(raw) => parse_inputs(raw)?,
        None => HashMap::new(),
    };
    info!(?inputs, "resolved inputs");

    let driver = WorkflowDriver::new(
        Arc::new(LoggingActionExecutor::default()),
        Arc::new(LoggingActionExecutor::default()),
        Arc::new(ScriptEngine::new()),
        Arc::new(NoSubworkflows),
    )
    .with_default_max_concurrent(max_concurrent);

    println!("{}", "Executing workflow...".cyan());
    let result = driver.execute(&workflow, inputs, None).await;

    match result.status {
        WorkflowStatus::Completed => {
            println!("{}", "\u{2713} Workflow completed".green().bold());
        }
        WorkflowStatus::Failed => {
            println!("{}", "\u{2717} Workflow failed".red().bold());
        }
        WorkflowStatus::Cancelled => {
            println!("{}", "\u{2717} Workflow cancelled".yellow().bold());
        }
    }

    println!("\n{}", "Step results:".cyan().bold());
    for step_result in &result.step_results {
        println!(
            "  {} {:?} ({} attempt(s), {}ms)",
            step_result.step_id, step_result.status, step_result.attempts, step_result.duration_ms
        );
        if let Some(err) = &step_result.error {
            println!("    {}", err.red());
        }
    }

    let output: serde_json::Map<String, serde_json::Value> =
        result.output.into_iter().map(|(k, v)| (k, v.into_json())).collect();
    println!("\n{}", "Output:".cyan().bold());
    println!(
        "{}",
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| "<unprintable output>".to_string())
    );

    if result.status != WorkflowStatus::Completed {
        anyhow::bail!("workflow did not complete successfully");
    }
    Ok(())
}

fn parse_inputs(input_str: &str) -> Result<HashMap<String, Value>> {
    let raw: serde_json::Value = if Path::new(input_str).exists() {
        let content = fs::read_to_string(input_str).with_context(|| format!("failed to read input file: {input_str}"))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse input JSON from file: {input_str}"))?
    } else {
        serde_json::from_str(input_str).with_context(|| "failed to parse input JSON string")?
    };
    let object = raw
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("input must be a JSON object"))?;
    Ok(object.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
}

/// Demonstration action backend: every service "exists", and every call
/// logs its inputs and returns `null`. A real deployment swaps this for an
/// executor backed by actual integrations (`ActionRegistry`/`ActionExecutor`
/// are the seam this binary leaves open).
#[derive(Default)]
struct LoggingActionExecutor;

#[async_trait]
impl ActionExecutor for LoggingActionExecutor {
    async fn execute(
        &self,
        action: &str,
        resolved_inputs: &HashMap<String, Value>,
        ctx: &ActionContext,
    ) -> std::result::Result<Value, ActionError> {
        info!(step_id = %ctx.step_id, action, ?resolved_inputs, "action invoked (demo backend, no-op)");
        Ok(Value::null())
    }
}

impl ActionRegistry for LoggingActionExecutor {
    fn resolve(&self, _service: &str) -> Option<Value> {
        Some(Value::null())
    }
}

/// The CLI has no workflow store; `subworkflow` steps always fail to load.
struct NoSubworkflows;

impl WorkflowLoader for NoSubworkflows {
    fn load(&self, path: &str) -> workflow_engine_core::Result<Workflow> {
        Err(EngineError::validation(format!(
            "no workflow store configured to resolve subworkflow '{path}'"
        )))
    }
}
