use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = broker::Args::parse();
    cli_common::init_logging(&args.log);

    broker::run(args).await
}
