//! End-to-end node behavior over the public API: frame ingestion through
//! translated output, learning feedback, and the admin socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use polyglot_core::{FlowId, RawFrame, TransportKind};
use polyglot_node::config::{GossipSection, LimitsSection, NodeSection};
use polyglot_node::{MemoryStore, Node, NodeConfig, OutcomeStore};

fn config() -> NodeConfig {
    NodeConfig {
        node: NodeSection {
            id: None,
            workers: 2,
            admin_addr: "127.0.0.1:0".to_string(),
        },
        gossip: GossipSection {
            enabled: false,
            ..Default::default()
        },
        limits: LimitsSection::default(),
    }
}

fn http_frame(flow: u64, fin: bool) -> RawFrame {
    RawFrame {
        flow: FlowId(flow),
        transport: TransportKind::Tcp,
        port: 80,
        payload: b"GET /sensors/kitchen HTTP/1.1\r\nHost: gw\r\n\r\n".to_vec(),
        fin,
    }
}

#[tokio::test]
async fn test_frames_in_mqtt_out_with_outcome_recorded() {
    let outcomes = Arc::new(MemoryStore::new());
    let (node, mut rx) = Node::start(config(), outcomes.clone() as Arc<dyn OutcomeStore>)
        .await
        .unwrap();

    node.ingest(http_frame(1, true)).unwrap();
    let out = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("translated output")
        .unwrap();
    assert_eq!(out.payload[0], 0x30, "HTTP routes to MQTT PUBLISH by default");

    // The terminal outcome feeds learning and storage
    for _ in 0..100 {
        if !outcomes.outcomes().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let recorded = outcomes.outcomes();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].success);

    node.shutdown().await;
}

#[tokio::test]
async fn test_admin_socket_reports_session_counters() {
    let outcomes = Arc::new(MemoryStore::new());
    let (node, mut rx) = Node::start(config(), outcomes as Arc<dyn OutcomeStore>)
        .await
        .unwrap();
    let addr = node.admin_addr().expect("admin listener");

    node.ingest(http_frame(1, true)).unwrap();
    rx.recv().await.expect("translated output");

    // Counters are eventually consistent; wait for the terminal outcome
    for _ in 0..100 {
        if node
            .balancer()
            .stats()
            .completed
            .load(std::sync::atomic::Ordering::Relaxed)
            == 1
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write.write_all(b"status\n").await.unwrap();
    let status: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(status["running"], true);
    assert_eq!(status["sessions"]["admitted"], 1);
    assert_eq!(status["sessions"]["completed"], 1);
    assert!(status["gossip"].is_null(), "gossip disabled in this config");

    write.write_all(b"decisions\n").await.unwrap();
    let decisions: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(decisions["decisions"].as_array().unwrap().len(), 1);
    assert_eq!(decisions["decisions"][0]["tag"], "http_to_mqtt");

    // Unknown commands answer with an error line, the connection stays up
    write.write_all(b"reboot\nknowledge\n").await.unwrap();
    let err: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(err["error"].is_string());
    let knowledge: serde_json::Value =
        serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(knowledge["records"].as_array().unwrap().len(), 1);

    node.shutdown().await;
}
