//! The query driver: reads queries from a file and fires them at the broker
//! in lock-step waves of concurrent senders.

use std::io::Write as _;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use protocol::MessageReader;
use tokio::net::TcpStream;
use tokio::sync::Barrier;

#[derive(Debug, Parser)]
#[command(name = "cohort-client")]
pub struct Args {
    /// File holding one query per line.
    #[arg(short = 'q', long = "query-file")]
    pub query_file: PathBuf,

    /// How many queries go out concurrently per wave.
    #[arg(short = 'w', long = "num-threads")]
    pub num_threads: NonZeroUsize,

    /// The broker's query port.
    #[arg(long = "sp")]
    pub server_port: u16,

    /// The broker's host.
    #[arg(long = "sip")]
    pub server_host: String,

    /// Cap on a single transport read.
    #[arg(short = 'b', long = "buffer-size", default_value_t = protocol::DEFAULT_CHUNK)]
    pub buffer_size: usize,

    #[clap(flatten)]
    pub log: cli_common::LogArgs,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(&args.query_file)
        .with_context(|| format!("reading {}", args.query_file.display()))?;
    let queries: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    let server = format!("{}:{}", args.server_host, args.server_port);

    let mut next_id: usize = 0;
    for wave in queries.chunks(args.num_threads.get()) {
        // Senders of one wave rendezvous on the barrier, so their
        // connections open at roughly the same moment.
        let barrier = Arc::new(Barrier::new(wave.len()));
        let mut senders = Vec::with_capacity(wave.len());
        for query in wave {
            let id = next_id;
            next_id += 1;
            senders.push(tokio::spawn(send_query(
                id,
                query.clone(),
                server.clone(),
                args.buffer_size,
                barrier.clone(),
            )));
        }

        // Drain the whole wave before deciding to stop.
        let mut first_err = None;
        for sender in senders {
            if let Err(err) = sender.await.context("sender task panicked")? {
                tracing::error!(%err, "query failed");
                first_err.get_or_insert(err);
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }
    }
    Ok(())
}

/// One query over its own connection. The `[id] query` header and the
/// response lines print as a single write, so concurrent senders cannot
/// interleave output.
async fn send_query(
    id: usize,
    query: String,
    server: String,
    chunk: usize,
    barrier: Arc<Barrier>,
) -> anyhow::Result<()> {
    barrier.wait().await;

    let mut stream = TcpStream::connect(&server)
        .await
        .with_context(|| format!("connecting to {server}"))?;
    protocol::write_message(&mut stream, &query).await?;
    protocol::write_done(&mut stream).await?;

    let mut reader = MessageReader::new(stream, chunk);
    let reply = protocol::read_reply(&mut reader).await?;

    let mut block = format!("[{id}] {query}\n");
    for line in &reply.lines {
        block.push_str(line);
        block.push('\n');
    }
    block.push('\n');

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(block.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
