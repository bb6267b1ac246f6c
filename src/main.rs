use anyhow::{Context, Result};
use stagegate::cli::commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand};
use stagegate::cli::output::*;
use stagegate::cli::{Cli, Command};
use stagegate::core::config::ClusterConfig;
use stagegate::core::{ClusterOutcome, ClusterPlan};
use stagegate::execution::{Orchestrator, OrchestratorOptions, RunSignal};
use stagegate::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use stagegate::probe::ShellProbeExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[cfg(feature = "sqlite")]
use stagegate::persistence::SqliteRunStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_cluster(cmd).await?,
        Command::Validate(cmd) => validate_cluster(cmd)?,
        Command::List(cmd) => list_clusters(cmd).await?,
        Command::History(cmd) => show_history(cmd, cli.verbose).await?,
    }

    Ok(())
}

async fn history_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(SqliteRunStore::with_default_path().await?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

fn load_plan(file: &str, overrides: &[(String, String)]) -> Result<(ClusterConfig, ClusterPlan)> {
    let config = ClusterConfig::from_file(file).context("Failed to load cluster config")?;
    let overrides: HashMap<String, String> = overrides.iter().cloned().collect();
    let plan = config.to_plan(&overrides)?;
    Ok((config, plan))
}

async fn run_cluster(cmd: &RunCommand) -> Result<()> {
    let (config, plan) = load_plan(&cmd.file, &cmd.set)?;

    println!(
        "{}Loaded cluster: {} ({} workers)",
        INFO,
        style(&plan.name).bold(),
        plan.workers.len()
    );
    for (key, value) in &cmd.set {
        println!(
            "{}Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let store = history_store(cmd.no_history).await?;

    let options = OrchestratorOptions::default()
        .with_deadline(cmd.deadline_secs.or(config.deadline_secs).map(Duration::from_secs))
        .with_worker_failure(
            cmd.worker_failure
                .map(Into::into)
                .unwrap_or(config.worker_failure),
        )
        .with_strategy(cmd.strategy());

    let progress = create_progress_bar(plan.total_stages());
    let orchestrator = {
        let progress = progress.clone();
        Orchestrator::new(ShellProbeExecutor::new()?, options).with_event_handler(move |event| {
            if finishes_stage(&event) {
                progress.inc(1);
            }
            progress.println(format_execution_event(&event));
        })
    };

    // Ctrl-C cancels in-flight stages instead of killing the process outright
    let signal = RunSignal::new(orchestrator.options().deadline);
    {
        let signal = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                signal.cancel();
            }
        });
    }

    println!();
    let report = orchestrator.run_with_signal(&plan, signal).await;
    progress.finish_and_clear();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n{}", format_run_report(&report));
    }

    if !cmd.no_history {
        let summary = create_summary(&report);
        store.save_run(&summary).await?;
        println!(
            "\n{}Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    match report.outcome {
        ClusterOutcome::Ready => Ok(()),
        ClusterOutcome::Degraded => std::process::exit(2),
        ClusterOutcome::Failed => {
            if let Some(e) = &report.error {
                error!("{}", e);
            }
            std::process::exit(1);
        }
    }
}

fn validate_cluster(cmd: &ValidateCommand) -> Result<()> {
    println!("{}Validating cluster...", INFO);

    let (config, plan) = match load_plan(&cmd.file, &cmd.set) {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{}Cluster configuration is valid!", CHECK);
    println!("  Name: {}", style(&plan.name).bold());
    println!("  Hosts: {}", style(plan.workers.len() + 1).cyan());
    println!("  Stages: {}", style(plan.total_stages()).cyan());
    if let Some(deadline) = config.deadline_secs {
        println!("  Deadline: {}", style(format_duration(Duration::from_secs(deadline))).cyan());
    }
    if let Some(point) = &plan.sync_point {
        println!("  Sync point: {} ({})", style(&point.name).cyan(), point.path.display());
    }

    for pipeline in std::iter::once(&plan.master).chain(plan.workers.iter()) {
        println!(
            "\n  {} ({}, {})",
            style(&pipeline.host.id).bold(),
            pipeline.host.role,
            pipeline.host.address
        );
        for stage in &pipeline.stages {
            let what = match stage.probe() {
                Some(probe) => probe.to_string(),
                None => "join via sync point".to_string(),
            };
            let flag = if stage.critical { "" } else { " [best-effort]" };
            println!(
                "    - {}{}: {} (x{}, every {}s)",
                style(&stage.name).cyan(),
                style(flag).dim(),
                what,
                stage.policy.max_attempts,
                stage.policy.interval.as_secs_f64()
            );
        }
    }

    Ok(())
}

async fn list_clusters(cmd: &ListCommand) -> Result<()> {
    let store = history_store(false).await?;
    let clusters = store.list_clusters().await?;

    if cmd.json {
        let mut json_data = Vec::new();
        for cluster in &clusters {
            let runs = store.list_runs(cluster).await?;
            json_data.push(serde_json::json!({
                "name": cluster,
                "run_count": runs.len(),
            }));
        }
        let data = serde_json::json!({ "clusters": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if clusters.is_empty() {
        println!("{}No clusters found in history", INFO);
        return Ok(());
    }

    println!("{}Clusters in history:", INFO);
    for cluster in &clusters {
        if cmd.with_counts {
            let runs = store.list_runs(cluster).await?;
            let count = |outcome| runs.iter().filter(|r| r.outcome == outcome).count();
            println!(
                "  {} ({} runs: {} ready, {} degraded, {} failed)",
                style(cluster).bold(),
                style(runs.len()).cyan(),
                style(count(ClusterOutcome::Ready)).green(),
                style(count(ClusterOutcome::Degraded)).yellow(),
                style(count(ClusterOutcome::Failed)).red()
            );
        } else {
            println!("  {}", style(cluster).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, verbose: bool) -> Result<()> {
    let store = history_store(false).await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, verbose, cmd.json)?,
            None => println!("{}Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.cluster {
        Some(cluster) => store.list_runs(cluster).await?,
        None => {
            let mut all = Vec::new();
            for cluster in store.list_clusters().await? {
                all.extend(store.list_runs(&cluster).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    runs.truncate(cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{}No runs found", INFO);
        return Ok(());
    }

    println!("{}Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{}Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Cluster: {}", style(&summary.cluster_name).bold());
    println!("  Outcome: {}", format_outcome(summary.outcome));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    println!("  Completed: {}", style(summary.completed_at.to_rfc3339()).dim());
    if let Some(duration) = summary.duration() {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }
    println!("  Hosts ready: {}/{}", summary.hosts_ready, summary.hosts_total);
    if !summary.failed_hosts.is_empty() {
        println!("  Failed hosts: {}", style(summary.failed_hosts.join(", ")).red());
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
