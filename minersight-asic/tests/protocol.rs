//! Wire protocol tests against in-process mock miners.

mod common;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;

use common::{MockMiner, Reply, antminer, antminer_summary, closed_port};
use minersight_asic::client::TimeoutPhase;
use minersight_asic::{Command, ProtocolClient, QueryError};

fn client() -> ProtocolClient {
    ProtocolClient::new(Duration::from_millis(500))
}

#[tokio::test]
async fn test_request_framing() {
    let miner = MockMiner::start(antminer(110_000.0)).await;

    let response = client().query(&miner.address, Command::Summary).await.unwrap();
    assert_eq!(response.command(), Command::Summary);
    assert_eq!(response.payload()["SUMMARY"][0]["Accepted"], 51234);

    client().query(&miner.address, Command::Stats).await.unwrap();

    assert_eq!(
        miner.requests(),
        vec![
            "{\"command\": \"summary\"}\n".to_string(),
            "{\"command\": \"stats\"}\n".to_string(),
        ]
    );
    // One connection per command.
    assert_eq!(miner.connections(), 2);
}

#[tokio::test]
async fn test_chunked_response_is_reassembled() {
    let body = antminer_summary(95_000.0).to_string().into_bytes();
    let pieces: Vec<Vec<u8>> = body.chunks(17).map(|c| c.to_vec()).collect();
    let miner = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Chunks(pieces, Duration::from_millis(5)),
    )]))
    .await;

    let response = client().query(&miner.address, Command::Summary).await.unwrap();
    assert_eq!(response.payload(), &antminer_summary(95_000.0));
}

#[tokio::test]
async fn test_trailing_nul_is_ignored() {
    let mut body = json!({"STATUS": [{"STATUS": "S"}], "SUMMARY": [{"GHS 5s": 1.0}]})
        .to_string()
        .into_bytes();
    body.push(0);
    let miner = MockMiner::start(HashMap::from([("summary", Reply::Raw(body))])).await;

    let response = client().query(&miner.address, Command::Summary).await.unwrap();
    assert_eq!(response.payload()["SUMMARY"][0]["GHS 5s"], 1.0);
}

#[tokio::test]
async fn test_response_complete_before_close() {
    // The payload parses before the device closes the socket; the client
    // must not wait for EOF.
    let body = antminer_summary(1.0).to_string().into_bytes();
    let miner = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Chunks(vec![body, b"\n".to_vec()], Duration::from_secs(30)),
    )]))
    .await;

    let started = Instant::now();
    client().query(&miner.address, Command::Summary).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let miner = MockMiner::start(HashMap::from([("summary", Reply::Silent)])).await;
    let client = ProtocolClient::new(Duration::from_millis(100));

    let started = Instant::now();
    let err = client.query(&miner.address, Command::Summary).await.unwrap_err();
    assert_eq!(
        err,
        QueryError::Timeout(TimeoutPhase::Read, Duration::from_millis(200))
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_partial_response_then_silence_is_malformed() {
    let miner = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Chunks(vec![b"{\"SUMMARY\":[{\"GHS 5s\":".to_vec()], Duration::from_secs(30)),
    )]))
    .await;
    let client = ProtocolClient::new(Duration::from_millis(100));

    let err = client.query(&miner.address, Command::Summary).await.unwrap_err();
    assert!(matches!(err, QueryError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_truncated_response_is_malformed() {
    let miner = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Raw(b"{\"SUMMARY\":[{\"GHS 5s\":".to_vec()),
    )]))
    .await;

    let err = client().query(&miner.address, Command::Summary).await.unwrap_err();
    assert!(matches!(err, QueryError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_invalid_json_is_malformed() {
    let miner = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Raw(b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec()),
    )]))
    .await;

    let err = client().query(&miner.address, Command::Summary).await.unwrap_err();
    assert!(matches!(err, QueryError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_close_without_response_is_malformed() {
    let miner = MockMiner::start(HashMap::from([("summary", Reply::Close)])).await;

    let err = client().query(&miner.address, Command::Summary).await.unwrap_err();
    assert!(matches!(err, QueryError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_closed_port_fails_fast() {
    let address = closed_port().await;
    let client = ProtocolClient::new(Duration::from_millis(300));

    let started = Instant::now();
    let err = client.query(&address, Command::Summary).await.unwrap_err();
    assert!(matches!(
        err,
        QueryError::ConnectionRefused | QueryError::Timeout(TimeoutPhase::Connect, _)
    ));
    assert!(started.elapsed() < Duration::from_millis(300) + Duration::from_millis(500));

    assert!(client.probe(&address).await.is_err());
}

#[tokio::test]
async fn test_refusal_is_per_command() {
    let miner = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Json(antminer_summary(100.0)),
    )]))
    .await;

    let summary = client().query(&miner.address, Command::Summary).await.unwrap();
    let pools = client().query(&miner.address, Command::Pools).await.unwrap();

    assert!(!summary.is_refused());
    assert!(pools.is_refused());
    assert_eq!(
        pools.status().unwrap().message.as_deref(),
        Some("Invalid command")
    );
}
