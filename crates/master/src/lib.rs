//! The worker supervisor: partitions country directories round-robin across
//! a fleet of `cohort-worker` processes, hands each its shard over a named
//! control channel, and respawns whichever worker dies.

pub mod supervise;

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "cohort-master")]
pub struct Args {
    /// How many workers to spawn. Clamped to the number of country
    /// directories.
    #[arg(short = 'w', long = "num-workers")]
    pub num_workers: NonZeroUsize,

    /// Read chunk cap handed down to the workers' message framing.
    #[arg(short = 'b', long = "buffer-size", default_value_t = protocol::DEFAULT_CHUNK)]
    pub buffer_size: usize,

    /// Host the broker listens on.
    #[arg(short = 's', long = "server-host")]
    pub server_host: String,

    /// The broker's statistics port.
    #[arg(short = 'p', long = "server-port")]
    pub server_port: u16,

    /// Root directory holding one subdirectory of record files per country.
    #[arg(short = 'i', long = "input-dir")]
    pub input_dir: PathBuf,

    /// Directory for the per-worker control channel sockets.
    #[arg(long = "channel-dir", default_value = "/tmp")]
    pub channel_dir: PathBuf,

    /// Worker executable. Defaults to `cohort-worker` next to this binary.
    #[arg(long = "worker-bin")]
    pub worker_bin: Option<PathBuf>,

    #[clap(flatten)]
    pub log: cli_common::LogArgs,
}

pub use supervise::run;

/// Country subdirectories of the input root, sorted by name. The stable
/// order matters: a respawned worker must receive the same assignment and
/// reproduce its shard.
pub fn partition(input_dir: &Path) -> anyhow::Result<Vec<String>> {
    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("scanning {}", input_dir.display()))?;

    let mut countries = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("scanning {}", input_dir.display()))?;
        if entry.file_type()?.is_dir() {
            countries.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    countries.sort();
    Ok(countries)
}

/// Deal the countries onto `workers` slots round-robin.
pub fn assign(countries: Vec<String>, workers: usize) -> Vec<Vec<String>> {
    let mut slots: Vec<Vec<String>> = vec![Vec::new(); workers];
    for (i, country) in countries.into_iter().enumerate() {
        slots[i % workers].push(country);
    }
    slots
}

#[cfg(test)]
mod test {
    use super::*;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn partition_finds_only_directories_sorted() {
        let root = tempfile::tempdir().unwrap();
        for dir in ["Italy", "China", "France"] {
            std::fs::create_dir(root.path().join(dir)).unwrap();
        }
        std::fs::write(root.path().join("notes.txt"), "stray file").unwrap();

        assert_eq!(
            partition(root.path()).unwrap(),
            names(&["China", "France", "Italy"])
        );
    }

    #[test]
    fn assign_deals_round_robin() {
        let countries = names(&["China", "France", "Italy", "Peru", "Spain"]);
        assert_eq!(
            assign(countries.clone(), 2),
            vec![
                names(&["China", "Italy", "Spain"]),
                names(&["France", "Peru"]),
            ]
        );
        // One worker takes everything.
        assert_eq!(assign(countries.clone(), 1), vec![countries.clone()]);
        // More slots than countries leaves the tail empty.
        let slots = assign(names(&["China"]), 3);
        assert_eq!(slots[0], names(&["China"]));
        assert!(slots[1].is_empty() && slots[2].is_empty());
    }
}
