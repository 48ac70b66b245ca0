use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = master::Args::parse();
    cli_common::init_logging(&args.log);

    master::run(args).await
}
