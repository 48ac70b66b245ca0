//! Query fan-out and the per-verb reductions of worker replies.

use std::net::SocketAddr;
use std::time::Duration;

use models::Query;
use protocol::{MessageReader, Reply};
use tokio::net::TcpStream;

/// The generic failure line appended to a client reply when the fan-out
/// could not gather a full answer.
pub const REQUEST_ERROR: &str = "Error in request.";

/// Send the query to every worker over a fresh connection and gather the
/// replies. `None` marks a worker that failed or timed out; the merge still
/// runs over whatever survived.
pub async fn broadcast(
    query: &Query,
    workers: &[SocketAddr],
    timeout: Duration,
    chunk: usize,
) -> Vec<Option<Reply>> {
    let line = forwarded_form(query).to_string();

    futures::future::join_all(workers.iter().map(|addr| {
        let line = &line;
        async move {
            match tokio::time::timeout(timeout, ask(*addr, line, chunk)).await {
                Ok(Ok(reply)) => Some(reply),
                Ok(Err(err)) => {
                    tracing::warn!(%err, %addr, "worker query failed");
                    None
                }
                Err(_elapsed) => {
                    tracing::warn!(%addr, "worker query timed out");
                    None
                }
            }
        }
    }))
    .await
}

async fn ask(addr: SocketAddr, line: &str, chunk: usize) -> anyhow::Result<Reply> {
    let mut stream = TcpStream::connect(addr).await?;
    protocol::write_message(&mut stream, line).await?;
    protocol::write_done(&mut stream).await?;

    let mut reader = MessageReader::new(stream, chunk);
    Ok(protocol::read_reply(&mut reader).await?)
}

/// The shard-side form of a query. Workers count admissions per country;
/// the broker turns that into a disease frequency by summing.
fn forwarded_form(query: &Query) -> Query {
    match query {
        Query::DiseaseFrequency {
            disease,
            range,
            country,
        } => Query::NumPatientAdmissions {
            disease: disease.clone(),
            range: *range,
            country: country.clone(),
        },
        other => other.clone(),
    }
}

/// Reduce gathered replies into the client's answer lines, per verb:
/// summing, concatenation, or top-k re-ranking. Any missing or INVALID
/// reply appends the generic error line after the surviving data.
pub fn merge(query: &Query, replies: Vec<Option<Reply>>) -> Vec<String> {
    let failed = replies.iter().any(Option::is_none);
    let invalid = replies.iter().flatten().any(|reply| reply.invalid);
    let lines: Vec<String> = replies
        .into_iter()
        .flatten()
        .flat_map(|reply| reply.lines)
        .collect();

    let mut merged = match query {
        Query::DiseaseFrequency { .. } => vec![sum_counts(&lines).to_string()],
        Query::TopkDiseases { k, .. } | Query::TopkCountries { k, .. } => rerank(lines, *k),
        _ => lines,
    };
    if failed || invalid {
        merged.push(REQUEST_ERROR.to_string());
    }
    merged
}

/// Sum the trailing count of each `<name> <count>` line.
fn sum_counts(lines: &[String]) -> u64 {
    lines
        .iter()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _name = fields.next()?;
            fields.next()?.parse::<u64>().ok()
        })
        .sum()
}

/// Global top-k over per-worker `<name> <count>` candidates. Each worker
/// already ranked its own names, so re-ranking the concatenation is exact.
fn rerank(lines: Vec<String>, k: usize) -> Vec<String> {
    let mut entries: Vec<(u64, String)> = lines
        .into_iter()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let count = fields.next()?.parse().ok()?;
            Some((count, name))
        })
        .collect();
    // Count-descending, name-ascending on ties; the worker-side order.
    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    entries.truncate(k);
    entries
        .into_iter()
        .map(|(count, name)| format!("{name} {count}"))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn reply(lines: &[&str]) -> Option<Reply> {
        Some(Reply {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            invalid: false,
        })
    }

    fn frequency() -> Query {
        "/diseaseFrequency covid19 01-01-2020 31-12-2020"
            .parse()
            .unwrap()
    }

    #[test]
    fn disease_frequency_sums_across_shards() {
        // Scenario: one covid19 admission per shard merges to 2.
        let merged = merge(&frequency(), vec![reply(&["France 1"]), reply(&["France 1"])]);
        assert_eq!(merged, vec!["2".to_string()]);

        let merged = merge(
            &frequency(),
            vec![reply(&["China 3", "Italy 2"]), reply(&["France 4"])],
        );
        assert_eq!(merged, vec!["9".to_string()]);

        // Workers with nothing to report still sum cleanly.
        let merged = merge(&frequency(), vec![reply(&[]), reply(&[])]);
        assert_eq!(merged, vec!["0".to_string()]);
    }

    #[test]
    fn concatenating_verbs_keep_all_lines() {
        let query: Query = "/numPatientAdmissions covid19 01-01-2020 31-12-2020"
            .parse()
            .unwrap();
        let merged = merge(
            &query,
            vec![reply(&["China 3", "Italy 2"]), reply(&["France 4"])],
        );
        assert_eq!(
            merged,
            vec![
                "China 3".to_string(),
                "Italy 2".to_string(),
                "France 4".to_string()
            ]
        );
    }

    #[test]
    fn a_missing_worker_appends_the_error_line_after_data() {
        let query: Query = "/numPatientAdmissions covid19 01-01-2020 31-12-2020"
            .parse()
            .unwrap();
        let merged = merge(&query, vec![reply(&["China 3"]), None]);
        assert_eq!(
            merged,
            vec!["China 3".to_string(), REQUEST_ERROR.to_string()]
        );
    }

    #[test]
    fn an_invalid_reply_flags_the_merge() {
        let merged = merge(
            &frequency(),
            vec![
                reply(&["China 3"]),
                Some(Reply {
                    lines: vec![],
                    invalid: true,
                }),
            ],
        );
        assert_eq!(merged, vec!["3".to_string(), REQUEST_ERROR.to_string()]);
    }

    #[test]
    fn an_empty_ready_counts_as_one_empty_reply() {
        let query: Query = "/searchPatientRecord r1".parse().unwrap();
        let merged = merge(
            &query,
            vec![
                reply(&["r1 Al B covid19 30 01-01-2020 00-00-0000"]),
                reply(&[]),
            ],
        );
        assert_eq!(
            merged,
            vec!["r1 Al B covid19 30 01-01-2020 00-00-0000".to_string()]
        );
    }

    #[test]
    fn topk_rerank_is_globally_exact() {
        let query: Query = "/topk-Countries 2 covid19".parse().unwrap();
        let merged = merge(
            &query,
            vec![
                reply(&["China 5", "Italy 1"]),
                reply(&["France 7", "Spain 5"]),
            ],
        );
        assert_eq!(merged, vec!["France 7".to_string(), "China 5".to_string()]);

        // Count ties rank by name.
        let query: Query = "/topk-Countries 3 covid19".parse().unwrap();
        let merged = merge(
            &query,
            vec![reply(&["China 5"]), reply(&["Albania 5", "Spain 5"])],
        );
        assert_eq!(
            merged,
            vec![
                "Albania 5".to_string(),
                "China 5".to_string(),
                "Spain 5".to_string()
            ]
        );
    }
}
