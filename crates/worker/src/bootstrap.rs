//! The master hands each worker its shard over a one-way control channel:
//! a batch of country directory names, a batch holding the broker's host
//! and port, then READY.

use std::path::Path;

use anyhow::Context;
use protocol::{Frame, MessageReader};
use tokio::net::UnixStream;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub countries: Vec<String>,
    /// `host:port` of the broker's statistics listener.
    pub broker: String,
}

pub async fn read_assignment(control: &Path, chunk: usize) -> anyhow::Result<Assignment> {
    let stream = UnixStream::connect(control)
        .await
        .with_context(|| format!("connecting to control channel {}", control.display()))?;
    let mut reader = MessageReader::new(stream, chunk);

    let mut batches: Vec<Vec<String>> = vec![Vec::new()];
    loop {
        match reader.next().await? {
            Some(Frame::Payload(payload)) => batches
                .last_mut()
                .expect("one batch is always open")
                .extend(payload.lines().map(str::to_string)),
            Some(Frame::Done) => batches.push(Vec::new()),
            Some(Frame::Ready) => break,
            Some(Frame::Invalid) => anyhow::bail!("unexpected INVALID on the control channel"),
            None => anyhow::bail!("control channel closed before READY"),
        }
    }

    parse_batches(batches)
}

fn parse_batches(batches: Vec<Vec<String>>) -> anyhow::Result<Assignment> {
    let mut batches = batches.into_iter();
    let countries: Vec<String> = batches.next().unwrap_or_default();
    anyhow::ensure!(!countries.is_empty(), "control channel assigned no countries");

    let address = batches.next().unwrap_or_default();
    let [host, port] = &address[..] else {
        anyhow::bail!("control channel announced no broker address");
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("broker port '{port}'"))?;

    Ok(Assignment {
        countries,
        broker: format!("{host}:{port}"),
    })
}
