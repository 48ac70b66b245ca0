use anyhow::Context;
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = worker::Args::parse();
    cli_common::init_logging(&args.log);

    // The shard serves one query at a time by design, so a current-thread
    // runtime is all it needs.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = runtime.block_on(worker::run(args));

    // Shut down without waiting for background blocking tasks; a blocked
    // read on a dead peer would otherwise hold the exit hostage.
    runtime.shutdown_background();

    result
}
