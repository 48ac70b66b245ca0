//! The worker's serve phase: announce the shard to the broker, then answer
//! one query per accepted connection until told to stop.

use anyhow::Context;
use models::Query;
use protocol::{Frame, MessageReader};
use shard::{DomainError, Shard};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal::unix::{signal, SignalKind};

use crate::bootstrap::Assignment;
use crate::ingest::Ingestor;
use crate::Args;

/// How one accepted connection ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A command was read and a READY-terminated reply written.
    Answered { ok: bool },
    /// The peer went away without sending a command.
    Empty,
    /// The peer asked the shard to exit.
    Exit,
}

pub async fn serve(args: &Args, assignment: Assignment) -> anyhow::Result<()> {
    let mut shard = Shard::new();
    let mut ingestor = Ingestor::new(args.input_dir.clone());

    // Bind the query listener before announcing, so the announcement can
    // carry the ephemeral port.
    let listener = TcpListener::bind(("0.0.0.0", 0))
        .await
        .context("binding query listener")?;
    let port = listener.local_addr().context("query listener address")?.port();

    // Handlers go in before the first ingest; a signal mid-ingest must not
    // hit the default disposition.
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;
    let mut sigusr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;

    announce_and_ingest(args, &assignment, &mut shard, &mut ingestor, port).await?;
    tracing::info!(
        tag = args.tag,
        port,
        records = shard.record_count(),
        "shard serving"
    );

    let mut total: u64 = 0;
    let mut ok: u64 = 0;

    // One connection at a time: accept, handle, close. Signals are observed
    // between queries.
    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigquit.recv() => break,
            _ = sigusr1.recv() => {
                if let Err(err) =
                    announce_and_ingest(args, &assignment, &mut shard, &mut ingestor, port).await
                {
                    tracing::error!(%err, "rescan failed");
                }
            }
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("accepting query connection")?;
                match handle_query(stream, &shard, args.buffer_size).await {
                    Ok(Outcome::Answered { ok: answered_ok }) => {
                        total += 1;
                        if answered_ok {
                            ok += 1;
                        }
                    }
                    Ok(Outcome::Empty) => {}
                    Ok(Outcome::Exit) => break,
                    Err(err) => {
                        // A client that died mid-exchange is dropped.
                        tracing::warn!(%err, "dropping query connection");
                        total += 1;
                    }
                }
            }
        }
    }

    write_log(std::path::Path::new("logs"), &assignment.countries, total, ok)
}

/// Open a statistics connection to the broker, announce `tag` and the query
/// port, ingest whatever is new, stream its statistics and end with READY.
/// Used both for the initial ingest and for SIGUSR1 rescans.
async fn announce_and_ingest(
    args: &Args,
    assignment: &Assignment,
    shard: &mut Shard,
    ingestor: &mut Ingestor,
    port: u16,
) -> anyhow::Result<()> {
    let mut stats = TcpStream::connect(&assignment.broker)
        .await
        .with_context(|| format!("connecting statistics channel to {}", assignment.broker))?;
    protocol::write_line(&mut stats, &format!("{}\n{}", args.tag, port)).await?;
    protocol::write_done(&mut stats).await?;

    for country in &assignment.countries {
        if let Err(err) = ingestor.ingest_country(shard, country, &mut stats).await {
            tracing::error!(%err, country, "country directory not ingested");
        }
    }

    protocol::write_ready(&mut stats).await?;
    Ok(())
}

/// Read one command, write one READY-terminated reply.
pub async fn handle_query<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    shard: &Shard,
    chunk: usize,
) -> Result<Outcome, protocol::FrameError> {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = MessageReader::new(read_half, chunk);

    let command = loop {
        match reader.next().await? {
            Some(Frame::Payload(payload)) => break payload,
            Some(Frame::Done | Frame::Ready | Frame::Invalid) => continue,
            None => return Ok(Outcome::Empty),
        }
    };

    let mut ok = false;
    match command.trim().parse::<Query>() {
        Err(err) => {
            tracing::warn!(%err, command, "invalid request");
            protocol::write_invalid(&mut write_half).await?;
        }
        Ok(Query::Exit) => return Ok(Outcome::Exit),
        Ok(query) => match answer(shard, &query) {
            Ok(lines) => {
                for line in &lines {
                    protocol::write_line(&mut write_half, line).await?;
                }
                ok = true;
            }
            // Domain misses answer with an empty reply; most queries only
            // land on the one shard that owns their country or record.
            Err(err) => tracing::debug!(%err, %query, "query missed this shard"),
        },
    }
    protocol::write_ready(&mut write_half).await?;

    Ok(Outcome::Answered { ok })
}

fn answer(shard: &Shard, query: &Query) -> Result<Vec<String>, DomainError> {
    match query {
        Query::ListCountries => Ok(shard.countries().map(|name| name.to_string()).collect()),
        // The broker normally rewrites this verb before fan-out, but a
        // direct connection may still send it.
        Query::DiseaseFrequency {
            disease,
            range,
            country,
        }
        | Query::NumPatientAdmissions {
            disease,
            range,
            country,
        } => shard.admissions(disease, *range, country.as_deref()),
        Query::NumPatientDischarges {
            disease,
            range,
            country,
        } => shard.discharges(disease, *range, country.as_deref()),
        Query::TopkAgeRanges {
            k,
            country,
            disease,
            range,
        } => shard.topk_age_ranges(*k, country, disease, *range),
        Query::SearchPatientRecord { record_id } => shard
            .search(record_id)
            .map(|record| vec![record.to_string()])
            .ok_or_else(|| DomainError::UnknownRecord(record_id.clone())),
        Query::TopkDiseases { k, country, range } => shard.topk_diseases(*k, country, *range),
        Query::TopkCountries { k, disease, range } => shard.topk_countries(*k, disease, *range),
        Query::Exit => Ok(Vec::new()),
    }
}

/// The worker's exit report: owned countries, then the request counters,
/// written to `<dir>/log_file.<pid>`.
fn write_log(dir: &std::path::Path, countries: &[String], total: u64, ok: u64) -> anyhow::Result<()> {
    use std::fmt::Write as _;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let path = dir.join(format!("log_file.{}", std::process::id()));

    let mut contents = String::new();
    for country in countries {
        contents.push_str(country);
        contents.push('\n');
    }
    let _ = writeln!(contents, "TOTAL {total}");
    let _ = writeln!(contents, "SUCCESS {ok}");
    let _ = writeln!(contents, "FAIL {}", total - ok);

    std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
}
