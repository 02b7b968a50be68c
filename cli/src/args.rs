use clap::{Parser, Subcommand};
use fleetctl_common::args::{EngineArgs, PostgresArgs, RedisArgs};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Submit one cluster action record and run it to completion.
    Run(RunArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub postgres: PostgresArgs,

    #[command(flatten)]
    pub redis: RedisArgs,

    #[command(flatten)]
    pub engine: EngineArgs,

    /// Cluster the action targets.
    #[arg(long)]
    pub cluster_id: uuid::Uuid,

    /// CLUSTER_CREATE, CLUSTER_RESIZE, CLUSTER_ATTACH_POLICY, etc.
    #[arg(long)]
    pub action_kind: String,

    /// Action inputs as a JSON object. When omitted, read from stdin.
    #[arg(long)]
    pub inputs: Option<String>,

    /// Redis key TTL for the cluster lock, in seconds.
    #[arg(long, env = "LOCK_TTL_SECS", default_value_t = 300)]
    pub lock_ttl_secs: u64,
}
