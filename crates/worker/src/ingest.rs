//! Directory ingestion: each country subdirectory holds record files named
//! by date. Files ingest in date order, and every ingested file streams one
//! statistics block to the broker.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use models::{Date, RecordLine};
use shard::Shard;
use tokio::io::AsyncWrite;

pub struct Ingestor {
    input_dir: PathBuf,
    /// Files already ingested, so a rescan only picks up what is new.
    ingested: HashSet<(String, Date)>,
}

impl Ingestor {
    pub fn new(input_dir: PathBuf) -> Self {
        Self {
            input_dir,
            ingested: HashSet::new(),
        }
    }

    /// Dated regular files of one country directory, ascending by date.
    /// Anything that does not parse as a `DD-MM-YYYY` name is ignored.
    fn dated_files(&self, country: &str) -> anyhow::Result<Vec<(Date, PathBuf)>> {
        let dir = self.input_dir.join(country);
        let entries =
            std::fs::read_dir(&dir).with_context(|| format!("scanning {}", dir.display()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("scanning {}", dir.display()))?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Ok(date) = entry.file_name().to_string_lossy().parse::<Date>() else {
                continue;
            };
            files.push((date, entry.path()));
        }
        files.sort_by_key(|(date, _)| *date);
        Ok(files)
    }

    /// Ingest this country's files that have not been seen before, and
    /// stream one statistics block per new file. Returns how many files
    /// were ingested.
    #[tracing::instrument(skip(self, shard, stats))]
    pub async fn ingest_country<W: AsyncWrite + Unpin>(
        &mut self,
        shard: &mut Shard,
        country: &str,
        stats: &mut W,
    ) -> anyhow::Result<usize> {
        let mut new_files = 0;
        for (date, path) in self.dated_files(country)? {
            if self.ingested.contains(&(country.to_string(), date)) {
                continue;
            }
            ingest_file(shard, country, date, &path)?;
            self.ingested.insert((country.to_string(), date));
            new_files += 1;

            match shard.file_statistics(country, date) {
                Ok(lines) => {
                    for line in &lines {
                        protocol::write_line(stats, line).await?;
                    }
                    protocol::write_done(stats).await?;
                }
                Err(err) => tracing::warn!(%err, country, %date, "no statistics block"),
            }
        }
        Ok(new_files)
    }
}

/// Parse and insert every record line of one file. Malformed lines and
/// rejected records are logged and skipped; ingestion continues.
fn ingest_file(shard: &mut Shard, country: &str, date: Date, path: &Path) -> anyhow::Result<()> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: RecordLine = match line.parse() {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::error!(%err, line, file = %path.display(), "skipping malformed record");
                continue;
            }
        };
        if let Err(err) = shard.insert(country, date, parsed) {
            tracing::error!(%err, file = %path.display(), "skipping record");
        }
    }
    Ok(())
}
