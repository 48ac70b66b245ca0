//! The broker: workers announce themselves on one port, clients ask on the
//! other, and every query fans out to all known shards before the replies
//! are reduced into a single client response.

pub mod fanout;
pub mod registry;

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use models::Query;
use protocol::{Frame, MessageReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use registry::Registry;

#[derive(Debug, Parser)]
#[command(name = "cohort-broker")]
pub struct Args {
    /// Port answering client queries.
    #[arg(short = 'q', long = "query-port")]
    pub query_port: u16,

    /// Port on which workers announce themselves and push statistics.
    #[arg(short = 's', long = "statistics-port")]
    pub statistics_port: u16,

    /// Size of the request handler pool.
    #[arg(short = 'w', long = "num-threads")]
    pub num_threads: NonZeroUsize,

    /// Capacity of the accepted-connection queue.
    #[arg(short = 'b', long = "buffer-size")]
    pub buffer_size: NonZeroUsize,

    /// How long one fan-out waits for worker replies before answering with
    /// partial data and an error line.
    #[arg(long = "fanout-timeout", value_parser = humantime::parse_duration, default_value = "10s")]
    pub fanout_timeout: Duration,

    #[clap(flatten)]
    pub log: cli_common::LogArgs,
}

/// State shared by the handler pool.
pub struct Broker {
    pub registry: Registry,
    timeout: Duration,
    chunk: usize,
    shutdown: CancellationToken,
}

/// An accepted connection, classified by the listener it arrived on.
enum Accepted {
    Statistics(TcpStream),
    Query(TcpStream),
}

type SharedRx = Arc<tokio::sync::Mutex<mpsc::Receiver<Accepted>>>;

pub async fn run(args: Args) -> anyhow::Result<()> {
    let statistics_listener = TcpListener::bind(("0.0.0.0", args.statistics_port))
        .await
        .with_context(|| format!("binding statistics port {}", args.statistics_port))?;
    let query_listener = TcpListener::bind(("0.0.0.0", args.query_port))
        .await
        .with_context(|| format!("binding query port {}", args.query_port))?;

    let shutdown = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigquit.recv() => {}
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        }
    });

    serve(args, statistics_listener, query_listener, shutdown).await
}

/// Accept on both listeners, pushing connections into the bounded queue
/// drained by a fixed pool of handlers. Runs until `shutdown` fires.
pub async fn serve(
    args: Args,
    statistics_listener: TcpListener,
    query_listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let broker = Arc::new(Broker {
        registry: Registry::default(),
        timeout: args.fanout_timeout,
        chunk: protocol::DEFAULT_CHUNK,
        shutdown: shutdown.clone(),
    });

    let (tx, rx) = mpsc::channel(args.buffer_size.get());
    let rx: SharedRx = Arc::new(tokio::sync::Mutex::new(rx));

    let mut handlers = Vec::new();
    for id in 0..args.num_threads.get() {
        handlers.push(tokio::spawn(handler(id, broker.clone(), rx.clone())));
    }
    // The pool owns the queue from here: once every handler exits, a
    // blocked send errors out instead of wedging the accept loop.
    drop(rx);

    loop {
        // The queue send blocks when the pool is saturated, which in turn
        // pauses accepting: the classic bounded-FIFO backpressure.
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = statistics_listener.accept() => {
                let (stream, _) = accepted.context("accepting statistics connection")?;
                if tx.send(Accepted::Statistics(stream)).await.is_err() {
                    break;
                }
            }
            accepted = query_listener.accept() => {
                let (stream, _) = accepted.context("accepting query connection")?;
                if tx.send(Accepted::Query(stream)).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(tx);
    for handler in handlers {
        let _ = handler.await;
    }
    Ok(())
}

async fn handler(id: usize, broker: Arc<Broker>, rx: SharedRx) {
    loop {
        let accepted = tokio::select! {
            _ = broker.shutdown.cancelled() => return,
            accepted = async { rx.lock().await.recv().await } => accepted,
        };
        let Some(accepted) = accepted else { return };

        match accepted {
            Accepted::Statistics(stream) => {
                if let Err(err) = broker.handle_statistics(stream).await {
                    // A broken statistics link is fatal: the registry can no
                    // longer be trusted to reflect the fleet.
                    tracing::error!(%err, handler = id, "statistics connection failed");
                    broker.shutdown.cancel();
                }
            }
            Accepted::Query(stream) => {
                if let Err(err) = broker.handle_query(stream).await {
                    tracing::warn!(%err, handler = id, "dropping client connection");
                }
            }
        }
    }
}

impl Broker {
    /// Register the worker behind this statistics connection and stream its
    /// statistics payload to stdout until READY.
    pub async fn handle_statistics(&self, stream: TcpStream) -> anyhow::Result<()> {
        let peer = stream.peer_addr().context("statistics peer address")?;
        let mut reader = MessageReader::new(stream, self.chunk);

        // The first payload is the announcement: "{tag}\n{port}".
        let header = loop {
            match reader.next().await? {
                Some(Frame::Payload(payload)) => break payload,
                Some(Frame::Done) => continue,
                Some(Frame::Ready) => return Ok(()),
                Some(Frame::Invalid) => anyhow::bail!("INVALID on the statistics link"),
                None => anyhow::bail!("worker closed the statistics link before announcing"),
            }
        };
        let (tag, port) = parse_announcement(&header)?;

        // All workers share the master's host; the announcing connection's
        // source address names it.
        let addr = SocketAddr::new(peer.ip(), port);
        let replaced = self.registry.announce(tag, addr);
        tracing::info!(tag, %addr, replaced, "worker announced");

        loop {
            match reader.next().await? {
                Some(Frame::Payload(payload)) => println!("{payload}"),
                Some(Frame::Done | Frame::Invalid) => {}
                Some(Frame::Ready) => return Ok(()),
                None => anyhow::bail!("worker closed the statistics link before READY"),
            }
        }
    }

    /// Read one client command, broadcast it, merge, answer.
    #[tracing::instrument(skip_all)]
    pub async fn handle_query(&self, stream: TcpStream) -> anyhow::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = MessageReader::new(read_half, self.chunk);

        let command = loop {
            match reader.next().await? {
                Some(Frame::Payload(payload)) => break payload,
                Some(_) => continue,
                None => return Ok(()), // client went away without asking
            }
        };

        match command.trim().parse::<Query>() {
            Err(err) => {
                tracing::warn!(%err, command, "rejecting client query");
                protocol::write_line(&mut write_half, fanout::REQUEST_ERROR).await?;
            }
            Ok(Query::Exit) => {}
            Ok(query) => {
                let workers = self.registry.workers();
                let replies = fanout::broadcast(&query, &workers, self.timeout, self.chunk).await;
                let merged = fanout::merge(&query, replies);
                for line in &merged {
                    protocol::write_line(&mut write_half, line).await?;
                }
                tracing::info!(%query, workers = workers.len(), lines = merged.len(), "answered");
            }
        }
        protocol::write_ready(&mut write_half).await?;
        Ok(())
    }
}

/// The first statistics frame: `"{tag}\n{port}"`.
fn parse_announcement(header: &str) -> anyhow::Result<(usize, u16)> {
    let mut lines = header.lines();
    let tag = lines
        .next()
        .and_then(|s| s.trim().parse().ok())
        .with_context(|| format!("worker announcement tag in {header:?}"))?;
    let port = lines
        .next()
        .and_then(|s| s.trim().parse().ok())
        .with_context(|| format!("worker announcement port in {header:?}"))?;
    Ok((tag, port))
}
