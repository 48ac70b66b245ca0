use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = client::Args::parse();
    cli_common::init_logging(&args.log);

    client::run(args).await
}
