use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "qrewrite",
    version,
    about = "Search, validate and measure rewrites of analytical SQL queries"
)]
pub struct Cli {
    /// log output: text|json
    #[arg(long, global = true, env = "QREWRITE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the rewrite search over a query corpus
    Run(RunArgs),
    /// Check one SQL file against the catalog without executing it
    Validate(ValidateArgs),
    /// Inspect or merge knowledge files
    Knowledge(KnowledgeArgs),
    /// Write a sample configuration
    Init(InitArgs),
    Version,
}

#[derive(Parser, Clone, Debug)]
pub struct RunArgs {
    #[arg(long, default_value = "qrewrite.yaml")]
    pub config: PathBuf,

    /// corpus directory (overrides `corpus`)
    #[arg(long)]
    pub corpus: Option<PathBuf>,

    #[arg(long)]
    pub workers: Option<usize>,

    /// hard per-execution timeout for equivalence and measurement
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// search iterations per query
    #[arg(long)]
    pub iterations: Option<u32>,

    /// wall-clock search budget per query, 0 disables
    #[arg(long)]
    pub time_budget_s: Option<u64>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub generations: Option<u32>,

    /// CSV report path; the JSON report is written next to it
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub db: Option<PathBuf>,

    /// knowledge file to load before and save after the run
    #[arg(long)]
    pub knowledge: Option<PathBuf>,

    /// fail on unknown config keys instead of warning
    #[arg(long)]
    pub strict: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub sql: PathBuf,

    /// duckdb|postgres|ansi|generic
    #[arg(long)]
    pub dialect: Option<String>,

    /// take catalog and dialect from a run config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// builtin catalog when no config is given: tpcds|none
    #[arg(long, default_value = "tpcds")]
    pub catalog: String,

    #[arg(long, default_value = "text")]
    pub format: String, // text|json
}

#[derive(Parser, Clone, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub cmd: KnowledgeSub,
}

#[derive(Subcommand, Clone, Debug)]
pub enum KnowledgeSub {
    /// Print pattern statistics ranked by confidence
    Show(KnowledgeShowArgs),
    /// Fold other knowledge files into one
    Merge(KnowledgeMergeArgs),
}

#[derive(Parser, Clone, Debug)]
pub struct KnowledgeShowArgs {
    #[arg(long, default_value = "knowledge.json")]
    pub path: PathBuf,

    #[arg(long, default_value_t = 10)]
    pub top: usize,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone, Debug)]
pub struct KnowledgeMergeArgs {
    /// file to merge into; created when missing
    #[arg(long)]
    pub into: PathBuf,

    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
pub struct InitArgs {
    #[arg(long, default_value = "qrewrite.yaml")]
    pub config: PathBuf,

    /// overwrite an existing file
    #[arg(long)]
    pub force: bool,
}
