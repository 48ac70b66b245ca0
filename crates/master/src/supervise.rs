//! Spawning, handing off, and respawning workers.
//!
//! Each slot gets a Unix-socket control channel named `request.<tag>`; the
//! freshly spawned worker connects and reads its country list and the
//! broker address. The master keeps an explicit pid→tag map, so a SIGCHLD
//! sweep knows exactly which slot to respawn.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use anyhow::Context;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};

use crate::{assign, partition, Args};

/// How long a spawned worker gets to connect to its control channel.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct Supervisor {
    args: Args,
    worker_bin: PathBuf,
    assignments: Vec<Vec<String>>,
    /// pid → (tag, child handle).
    children: HashMap<u32, (usize, Child)>,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    let countries = partition(&args.input_dir)?;
    anyhow::ensure!(
        !countries.is_empty(),
        "{}: no country directories to assign",
        args.input_dir.display()
    );

    // No more workers than there are directories.
    let workers = args.num_workers.get().min(countries.len());
    let assignments = assign(countries, workers);

    let worker_bin = match &args.worker_bin {
        Some(bin) => bin.clone(),
        None => sibling_worker_bin()?,
    };
    tracing::info!(workers, worker_bin = %worker_bin.display(), "partitioned input");

    // SIGCHLD registration precedes the first spawn, or an early death
    // would go unnoticed.
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigquit = signal(SignalKind::quit()).context("installing SIGQUIT handler")?;
    let mut sigchld = signal(SignalKind::child()).context("installing SIGCHLD handler")?;

    let mut supervisor = Supervisor {
        args,
        worker_bin,
        assignments,
        children: HashMap::new(),
    };
    for tag in 0..workers {
        supervisor.spawn(tag).await?;
    }

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigquit.recv() => break,
            _ = sigchld.recv() => {
                if let Err(err) = supervisor.reap_and_respawn().await {
                    tracing::error!(%err, "respawn failed");
                }
            }
        }
    }

    supervisor.teardown()
}

impl Supervisor {
    fn channel_path(&self, tag: usize) -> PathBuf {
        self.args.channel_dir.join(format!("request.{tag}"))
    }

    /// Fork one worker for `tag` and hand it its shard over the control
    /// channel: countries batch, broker address batch, READY.
    async fn spawn(&mut self, tag: usize) -> anyhow::Result<()> {
        let socket = self.channel_path(tag);
        let _ = std::fs::remove_file(&socket); // stale socket from a respawn
        let listener = UnixListener::bind(&socket)
            .with_context(|| format!("binding control channel {}", socket.display()))?;

        let child = Command::new(&self.worker_bin)
            .arg("--tag")
            .arg(tag.to_string())
            .arg("--control")
            .arg(&socket)
            .arg("--input-dir")
            .arg(&self.args.input_dir)
            .arg("--buffer-size")
            .arg(self.args.buffer_size.to_string())
            .spawn()
            .with_context(|| format!("spawning {}", self.worker_bin.display()))?;
        let pid = child.id();
        self.children.insert(pid, (tag, child));

        let (stream, _) = tokio::time::timeout(HANDSHAKE_TIMEOUT, listener.accept())
            .await
            .context("worker never connected to its control channel")?
            .context("accepting on the control channel")?;
        hand_over(
            stream,
            &self.assignments[tag],
            &self.args.server_host,
            self.args.server_port,
        )
        .await?;

        tracing::info!(
            tag,
            pid,
            countries = self.assignments[tag].len(),
            "worker spawned"
        );
        Ok(())
    }

    /// One SIGCHLD can stand for several exits: sweep every child and
    /// respawn each dead slot with its original assignment.
    async fn reap_and_respawn(&mut self) -> anyhow::Result<()> {
        let mut exited = Vec::new();
        for (pid, (tag, child)) in self.children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!(pid = *pid, tag = *tag, %status, "worker died");
                    exited.push(*pid);
                }
                Ok(None) => {}
                Err(err) => tracing::error!(%err, pid = *pid, "polling child status"),
            }
        }
        for pid in exited {
            let (tag, _) = self.children.remove(&pid).expect("swept pid is present");
            self.spawn(tag).await?;
        }
        Ok(())
    }

    /// Kill the fleet outright and remove the control channel sockets.
    fn teardown(mut self) -> anyhow::Result<()> {
        for (pid, (tag, mut child)) in self.children.drain() {
            if let Err(err) = child.kill() {
                tracing::warn!(%err, pid, tag, "killing worker");
            }
            let _ = child.wait();
            tracing::info!(pid, tag, "worker stopped");
        }
        for tag in 0..self.assignments.len() {
            let _ = std::fs::remove_file(self.channel_path(tag));
        }
        Ok(())
    }
}

/// The master's half of the bootstrap protocol: the country batch, the
/// broker address batch, READY.
pub async fn hand_over<W: tokio::io::AsyncWrite + Unpin>(
    mut stream: W,
    countries: &[String],
    server_host: &str,
    server_port: u16,
) -> anyhow::Result<()> {
    for country in countries {
        protocol::write_line(&mut stream, country).await?;
    }
    protocol::write_done(&mut stream).await?;

    protocol::write_line(&mut stream, server_host).await?;
    protocol::write_line(&mut stream, &server_port.to_string()).await?;
    protocol::write_done(&mut stream).await?;

    protocol::write_ready(&mut stream).await?;
    Ok(())
}

fn sibling_worker_bin() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("locating the current executable")?;
    Ok(exe.with_file_name("cohort-worker"))
}
