//! In-process mock miners for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use minersight_common::Address;

/// How the mock answers one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Serialize and send in one write.
    Json(Value),
    /// Send these exact bytes.
    Raw(Vec<u8>),
    /// Send the pieces with a pause between them.
    Chunks(Vec<Vec<u8>>, Duration),
    /// Keep the connection open without answering.
    Silent,
    /// Close without answering.
    Close,
}

/// A fake miner listening on loopback.
pub struct MockMiner {
    pub address: Address,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockMiner {
    /// Listen on 127.0.0.1 with an ephemeral port.
    pub async fn start(replies: HashMap<&'static str, Reply>) -> Self {
        Self::start_on("127.0.0.1:0", replies).await
    }

    pub async fn start_on(bind: &str, replies: HashMap<&'static str, Reply>) -> Self {
        let listener = TcpListener::bind(bind).await.unwrap();
        let local = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let replies = Arc::new(replies);

        let handle = {
            let requests = requests.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, replies.clone(), requests.clone()));
                }
            })
        };

        Self {
            address: Address::from_ip(local.ip(), local.port()),
            requests,
            connections,
            handle,
        }
    }

    /// Request lines received so far, including the trailing newline.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Accepted TCP connections, including bare probes.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockMiner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    stream: TcpStream,
    replies: Arc<HashMap<&'static str, Reply>>,
    requests: Arc<Mutex<Vec<String>>>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
    }
    requests.lock().unwrap().push(line.clone());

    let command = serde_json::from_str::<Value>(&line)
        .ok()
        .and_then(|v| v["command"].as_str().map(str::to_string))
        .unwrap_or_default();

    let reply = replies
        .get(command.as_str())
        .cloned()
        .unwrap_or_else(|| Reply::Json(refusal("Invalid command")));

    let mut stream = reader.into_inner();
    match reply {
        Reply::Json(value) => {
            let _ = stream.write_all(value.to_string().as_bytes()).await;
        }
        Reply::Raw(bytes) => {
            let _ = stream.write_all(&bytes).await;
        }
        Reply::Chunks(pieces, pause) => {
            for piece in pieces {
                if stream.write_all(&piece).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                tokio::time::sleep(pause).await;
            }
        }
        Reply::Silent => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            return;
        }
        Reply::Close => return,
    }
    let _ = stream.shutdown().await;
}

/// A port on loopback with nothing listening.
pub async fn closed_port() -> Address {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local = listener.local_addr().unwrap();
    drop(listener);
    Address::from_ip(local.ip(), local.port())
}

pub fn refusal(message: &str) -> Value {
    json!({"STATUS": [{"STATUS": "E", "When": 1700000000, "Code": 14, "Msg": message}], "id": 1})
}

pub fn antminer_summary(ghs_5s: f64) -> Value {
    json!({
        "STATUS": [{"STATUS": "S", "When": 1700000000, "Code": 11, "Msg": "Summary", "Description": "bmminer 1.0.0"}],
        "SUMMARY": [{
            "Elapsed": 86400,
            "GHS 5s": format!("{:.2}", ghs_5s),
            "GHS av": ghs_5s - 100.0,
            "Accepted": 51234,
            "Rejected": 17,
            "Pool Switches": 2,
        }],
        "id": 1
    })
}

pub fn antminer_stats() -> Value {
    json!({
        "STATUS": [{"STATUS": "S", "Msg": "CGMiner stats"}],
        "STATS": [
            {"BMMiner": "1.0.0", "Miner": "uart_trans.1.3", "Type": "Antminer S19 Pro"},
            {
                "fan_num": 4, "fan1": 5760, "fan2": 5880, "fan3": 5640, "fan4": 5700,
                "temp_num": 3, "temp1": 61, "temp2": 63, "temp3": 62,
                "temp2_1": 76, "temp2_2": 78, "temp2_3": 77,
                "temp_chip1": "58-58-74-74",
                "chain_power": "3247.51",
            }
        ],
        "id": 1
    })
}

pub fn whatsminer_summary() -> Value {
    json!({
        "STATUS": [{"STATUS": "S", "Msg": "Summary", "Description": "btminer"}],
        "SUMMARY": [{
            "Elapsed": 7200,
            "MHS 5s": 118_000_000.0,
            "MHS av": 117_500_000.0,
            "Accepted": 900,
            "Rejected": 4,
            "Temperature": 71.5,
            "Fan Speed In": 4800,
            "Fan Speed Out": 4860,
            "Power": 3420,
            "Type": "WhatsMiner M50S_VH40",
        }],
        "id": 1
    })
}

/// Replies for a healthy Antminer.
pub fn antminer(ghs_5s: f64) -> HashMap<&'static str, Reply> {
    HashMap::from([
        ("summary", Reply::Json(antminer_summary(ghs_5s))),
        ("stats", Reply::Json(antminer_stats())),
    ])
}
