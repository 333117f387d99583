//! Network scanner tests against in-process mock miners.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use common::{MockMiner, Reply, antminer, closed_port, whatsminer_summary};
use minersight_asic::{
    ChannelSink, DeviceRegistry, DeviceSource, NetworkScanner, ProtocolClient, ScanError,
};
use minersight_common::{Address, DeviceRecord};

fn scanner(port: u16) -> NetworkScanner {
    NetworkScanner::new(ProtocolClient::new(Duration::from_millis(200)), port).with_concurrency(4)
}

#[tokio::test]
async fn test_scan_small_block_on_loopback() {
    let miner = MockMiner::start(antminer(100_000.0)).await;
    let port = miner.address.port;

    let records = scanner(port).scan("127.0.0.0/30").await.unwrap();
    assert_eq!(records.len(), 2);

    assert_eq!(records[0].address, Address::new("127.0.0.1", port));
    assert!(records[0].reachable);
    assert_eq!(records[0].manufacturer.as_deref(), Some("AntMiner"));
    assert!(records[0].failure.is_none());

    assert_eq!(records[1].address, Address::new("127.0.0.2", port));
    assert!(!records[1].reachable);
    assert!(records[1].failure.is_some());
}

#[tokio::test]
async fn test_scan_classifies_each_address() {
    let whatsminer = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Json(whatsminer_summary()),
    )]))
    .await;
    let generic = MockMiner::start(HashMap::from([(
        "summary",
        Reply::Json(json!({
            "STATUS": [{"STATUS": "S", "Description": "cgminer 4.11.1"}],
            "SUMMARY": [{"GHS 5s": 13500.0}],
        })),
    )]))
    .await;
    let mute = MockMiner::start(HashMap::from([("summary", Reply::Silent)])).await;
    let dead = closed_port().await;

    let records = scanner(4028)
        .scan_addresses(vec![
            whatsminer.address.clone(),
            generic.address.clone(),
            mute.address.clone(),
            dead.clone(),
        ])
        .await;
    assert_eq!(records.len(), 4);

    let find = |address: &Address| -> DeviceRecord {
        records
            .iter()
            .find(|r| &r.address == address)
            .cloned()
            .unwrap()
    };

    let record = find(&whatsminer.address);
    assert!(record.reachable);
    assert_eq!(record.manufacturer.as_deref(), Some("Whatsminer"));
    assert_eq!(record.model.as_deref(), Some("M50"));

    let record = find(&generic.address);
    assert!(record.reachable);
    assert_eq!(record.manufacturer.as_deref(), Some("Unknown"));
    assert!(record.model.is_none());

    let record = find(&mute.address);
    assert!(!record.reachable);
    assert!(
        record
            .failure
            .as_deref()
            .unwrap()
            .starts_with("identification failed")
    );

    let record = find(&dead);
    assert!(!record.reachable);
    assert!(record.failure.is_some());
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let miner = MockMiner::start(antminer(100_000.0)).await;
    let scanner = scanner(miner.address.port);

    let first = scanner.scan("127.0.0.0/29").await.unwrap();
    let second = scanner.scan("127.0.0.0/29").await.unwrap();
    assert_eq!(first.len(), 6);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_invalid_cidr_fails_before_network_activity() {
    let miner = MockMiner::start(antminer(100_000.0)).await;
    let scanner = scanner(miner.address.port);

    assert!(matches!(
        scanner.scan("127.0.0.1/33").await,
        Err(ScanError::InvalidCidr(_))
    ));
    assert!(matches!(
        scanner.with_max_hosts(16).scan("127.0.0.0/24").await,
        Err(ScanError::TooLarge { .. })
    ));
    assert_eq!(miner.connections(), 0);
}

#[tokio::test]
async fn test_discovery_loop_feeds_registry() {
    let miner = MockMiner::start(antminer(100_000.0)).await;
    let scanner = scanner(miner.address.port);

    let registry = Arc::new(DeviceRegistry::new());
    let (channel, mut rx) = ChannelSink::<Vec<DeviceRecord>>::new();
    let (tx, shutdown) = watch::channel(false);

    let targets = (registry.clone(), channel);
    let handle = tokio::spawn(async move {
        scanner
            .run(
                "127.0.0.0/30",
                Duration::from_millis(20),
                Duration::from_millis(20),
                &targets,
                shutdown,
            )
            .await
    });

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first, second);

    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.active_devices().unwrap(),
        vec![Address::new("127.0.0.1", miner.address.port)]
    );

    tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
