//! CLI command definitions

use crate::core::WorkerFailurePolicy;
use crate::execution::SchedulingStrategy;
use clap::Args;

/// Run the readiness pipelines of a cluster
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to cluster YAML file
    #[arg(short, long)]
    pub file: String,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Deadline for the whole run, overriding the config
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// What a failed worker does to the run, overriding the config
    #[arg(long, value_enum)]
    pub worker_failure: Option<WorkerFailureArg>,

    /// How worker pipelines are scheduled
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Worker limit for `--strategy parallel-limited`
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(self.max_parallel),
        }
    }
}

/// Validate a cluster configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to cluster YAML file
    #[arg(short, long)]
    pub file: String,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List clusters in run history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Cluster name to filter by
    #[arg(short, long)]
    pub cluster: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Worker failure policy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerFailureArg {
    Isolate,
    #[clap(name = "fail-run")]
    FailRun,
}

impl From<WorkerFailureArg> for WorkerFailurePolicy {
    fn from(arg: WorkerFailureArg) -> Self {
        match arg {
            WorkerFailureArg::Isolate => WorkerFailurePolicy::Isolate,
            WorkerFailureArg::FailRun => WorkerFailurePolicy::FailRun,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
