// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::{config_root_dir, default_config_path, load_and_validate};
use crate::config::model::ConfigFile;
use crate::config::{build_dag, run_config};
use crate::dag::Dag;
use crate::engine::{Engine, RunOptions, RunResult, RunStatus};
use crate::exec::context::RunConfig;
use crate::store::open_store;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and DAG compilation
/// - result store selection
/// - the engine (scheduler, runtime, worker pool)
/// - Ctrl-C handling (cancels the run)
///
/// Returns the status of the run; a dry run reports `Success`.
pub async fn run(args: CliArgs) -> Result<RunStatus> {
    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)?;
    let dag = Arc::new(build_dag(&cfg)?);
    let run_cfg = run_config(&cfg, args.params.clone());

    if args.dry_run {
        print_dry_run(&cfg, &dag, &run_cfg);
        return Ok(RunStatus::Success);
    }

    let store = open_store(cfg.config.result_storage, &config_root_dir(&config_path))?;
    let options = RunOptions {
        max_parallel: args.max_parallel.unwrap_or(cfg.config.max_parallel).max(1),
    };
    let engine = Engine::new(store, options)?;

    let handle = engine.start(&dag, run_cfg)?;
    info!(run_id = handle.run_id(), dag = %dag.name(), "run started");

    // Ctrl-C → cancel the run.
    {
        let canceller = handle.canceller();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            canceller.cancel().await;
        });
    }

    let result = handle.wait().await?;
    print_summary(&result);
    Ok(result.status)
}

/// Dry-run output: print tasks, kinds, edges, params and the topological
/// order.
fn print_dry_run(cfg: &ConfigFile, dag: &Dag, run_cfg: &RunConfig) {
    println!("dagflow dry-run: {}", dag.name());
    println!("  config.max_parallel = {}", cfg.config.max_parallel);
    println!("  config.default_retries = {}", cfg.config.default_retries);
    println!("  config.result_storage = {:?}", cfg.config.result_storage);
    if let Some(end) = dag.end_task() {
        println!("  config.end = {end}");
    }
    println!();

    if !run_cfg.params.is_empty() {
        println!("params:");
        for (key, value) in &run_cfg.params {
            println!("  {key} = {value}");
        }
        println!();
    }

    println!("tasks ({}):", dag.len());
    for name in dag.tasks() {
        let Some(spec) = dag.task(name) else {
            continue;
        };
        println!("  - {name} [{}]", spec.kind);
        println!("      run: {}", spec.callable.describe());
        if spec.retry.max_retries > 0 {
            println!("      retries: {}", spec.retry.max_retries);
        }
        for edge in dag.upstream_edges(name) {
            match &edge.label {
                Some(label) => println!("      after: {} (branch '{label}')", edge.from),
                None => println!("      after: {}", edge.from),
            }
        }
        if !spec.reads.is_empty() {
            println!("      reads: {:?}", spec.reads);
        }
    }
    println!();
    println!("order: {}", dag.topological_order().join(" -> "));

    debug!("dry-run complete (no execution)");
}

fn print_summary(result: &RunResult) {
    println!("run {} of '{}': {}", result.run_id, result.dag.name(), result.status);
    for name in result.dag.tasks() {
        let state = result
            .state_of(name)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match result.error_of(name) {
            Some(err) => println!("  {name}: {state} ({err})"),
            None => println!("  {name}: {state}"),
        }
    }
}
