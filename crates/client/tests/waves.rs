//! The client driver against a canned query server.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use cli_common::LogArgs;
use client::{run, Args};
use protocol::{Frame, MessageReader};
use tokio::net::TcpListener;

/// A server that answers every query with one canned line and records the
/// commands it saw.
async fn canned_server(seen: Arc<Mutex<Vec<String>>>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = MessageReader::new(read_half, 128);
                let command = loop {
                    match reader.next().await {
                        Ok(Some(Frame::Payload(payload))) => break payload,
                        Ok(Some(_)) => continue,
                        _ => return,
                    }
                };
                seen.lock().unwrap().push(command.clone());
                let _ = protocol::write_line(&mut write_half, &format!("echo {command}")).await;
                let _ = protocol::write_ready(&mut write_half).await;
            });
        }
    });
    port
}

#[tokio::test]
async fn drives_every_query_in_waves() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let port = canned_server(seen.clone()).await;

    let query_file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(
        query_file.path(),
        "/listCountries\n\
         /searchPatientRecord r1\n\
         \n\
         /diseaseFrequency covid19 01-01-2020 31-12-2020\n",
    )
    .unwrap();

    let args = Args {
        query_file: query_file.path().to_path_buf(),
        num_threads: NonZeroUsize::new(2).unwrap(),
        server_port: port,
        server_host: "127.0.0.1".to_string(),
        buffer_size: 128,
        log: LogArgs {
            filter: "off".to_string(),
        },
    };
    run(args).await.unwrap();

    // Each non-empty query goes out on its own connection, verbatim.
    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            "/diseaseFrequency covid19 01-01-2020 31-12-2020".to_string(),
            "/listCountries".to_string(),
            "/searchPatientRecord r1".to_string(),
        ]
    );
}

#[tokio::test]
async fn a_dead_server_fails_the_run() {
    let query_file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(query_file.path(), "/listCountries\n").unwrap();

    // Nothing listens on this port.
    let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = unused.local_addr().unwrap().port();
    drop(unused);

    let args = Args {
        query_file: query_file.path().to_path_buf(),
        num_threads: NonZeroUsize::new(1).unwrap(),
        server_port: port,
        server_host: "127.0.0.1".to_string(),
        buffer_size: 128,
        log: LogArgs {
            filter: "off".to_string(),
        },
    };
    assert!(run(args).await.is_err());
}
