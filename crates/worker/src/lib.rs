//! The shard server: ingests its assigned country directories into an
//! in-memory index and answers one query per connection.

pub mod bootstrap;
pub mod ingest;
pub mod serve;

use std::path::PathBuf;

use clap::Parser;

/// Spawned and wired up by `cohort-master`; not a user-facing command.
#[derive(Debug, Parser)]
#[command(name = "cohort-worker")]
pub struct Args {
    /// Shard tag assigned by the supervising master. Stable across
    /// respawns.
    #[arg(long)]
    pub tag: usize,

    /// Path of the master's control channel socket.
    #[arg(long)]
    pub control: PathBuf,

    /// Root directory holding one subdirectory of record files per country.
    #[arg(short = 'i', long = "input-dir")]
    pub input_dir: PathBuf,

    /// Cap on a single transport read.
    #[arg(short = 'b', long = "buffer-size", default_value_t = protocol::DEFAULT_CHUNK)]
    pub buffer_size: usize,

    #[clap(flatten)]
    pub log: cli_common::LogArgs,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let assignment = bootstrap::read_assignment(&args.control, args.buffer_size).await?;
    tracing::info!(
        tag = args.tag,
        countries = assignment.countries.len(),
        broker = %assignment.broker,
        "bootstrapped from master"
    );
    serve::serve(&args, assignment).await
}
