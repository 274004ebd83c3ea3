//! Client RPC calls served by a node connected over a real tunnel

use fleet_api::{start_server, ApiState, FleetMetrics, TunnelForwarder};
use fleet_core::{FeeRate, Node, NodeStatus, Repos};
use fleet_network::connection::{
    read_raw_frame, recv_frame, send_frame, write_raw_frame, MAX_RPC_FRAME_LEN,
};
use fleet_network::{
    AddrPool, KeepAliveConfig, TunnelHello, TunnelRegistry, TunnelReply, TunnelServer,
};
use fleet_nodes::{
    FleetGatekeeper, HealthTracker, NodeRegistrar, NodeRouter, RequestRecorder, SelectionStrategy,
    Whitelist,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

struct Fleet {
    repos: Repos,
    registry: Arc<TunnelRegistry>,
    tunnel_addr: SocketAddr,
    api_addr: SocketAddr,
}

async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

async fn start_fleet() -> Fleet {
    let repos = Repos::in_memory();
    let whitelist = Arc::new(Whitelist::disabled());
    let registry = Arc::new(TunnelRegistry::new(
        Arc::new(AddrPool::init("22000:22009").unwrap()),
        KeepAliveConfig::default(),
    ));
    let gatekeeper = Arc::new(FleetGatekeeper::new(repos.clone(), whitelist.clone()));
    let tunnel_server = TunnelServer::bind("127.0.0.1:0".parse().unwrap(), registry.clone(), gatekeeper)
        .await
        .unwrap()
        .with_response_timeout(Duration::from_secs(2));
    let tunnel_addr = tunnel_server.local_addr().unwrap();
    tokio::spawn(tunnel_server.run());

    let state = ApiState {
        repos: repos.clone(),
        registry: registry.clone(),
        router: Arc::new(NodeRouter::new(
            repos.clone(),
            registry.clone(),
            whitelist.clone(),
            SelectionStrategy::RoundRobin,
        )),
        recorder: RequestRecorder::new(repos.clone()),
        health: Arc::new(HealthTracker::new(repos.clone())),
        registrar: Arc::new(NodeRegistrar::new(repos.clone(), whitelist, registry.clone())),
        metrics: Arc::new(FleetMetrics::new(FeeRate::from_fraction(0.1).unwrap())),
        forwarder: Arc::new(TunnelForwarder::new(registry.clone())),
        tunnel_server_address: tunnel_addr.to_string(),
        start_time: std::time::Instant::now(),
    };
    let api_addr = free_addr().await;
    tokio::spawn(start_server(api_addr, state));

    Fleet {
        repos,
        registry,
        tunnel_addr,
        api_addr,
    }
}

/// Dial in as `node_id` and answer every request with `result`
async fn connect_node(fleet: &Fleet, node_id: &str, result: Value) {
    let mut node = Node::new(node_id, format!("addr-{}", node_id));
    node.status = NodeStatus::Active;
    fleet.repos.nodes.save(&node).unwrap();

    let mut stream = TcpStream::connect(fleet.tunnel_addr).await.unwrap();
    send_frame(&mut stream, &TunnelHello { node_id: node_id.to_string() })
        .await
        .unwrap();
    let reply: TunnelReply = recv_frame(&mut stream).await.unwrap();
    assert!(matches!(reply, TunnelReply::Accepted { .. }));

    tokio::spawn(async move {
        while let Ok(request) = read_raw_frame(&mut stream, MAX_RPC_FRAME_LEN).await {
            let request: Value = serde_json::from_slice(&request).unwrap();
            let response = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
            if write_raw_frame(&mut stream, response.to_string().as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });
}

async fn post_rpc(fleet: &Fleet, body: Value) -> reqwest::Response {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        match client
            .post(format!("http://{}/", fleet.api_addr))
            .json(&body)
            .send()
            .await
        {
            Ok(response) => return response,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("api server did not come up");
}

#[tokio::test]
async fn test_rpc_answered_by_tunneled_node() {
    let fleet = start_fleet().await;
    connect_node(&fleet, "node-a", json!("0xbeef")).await;

    let response = post_rpc(
        &fleet,
        json!({"jsonrpc": "2.0", "id": 42, "method": "chain_getBlockHash"}),
    )
    .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 42);
    assert_eq!(body["result"], "0xbeef");

    assert_eq!(fleet.repos.records.count_successful_requests().unwrap(), 1);
    assert!(fleet.registry.is_registered("node-a"));
}

#[tokio::test]
async fn test_silent_node_is_bad_gateway() {
    let fleet = start_fleet().await;
    let mut node = Node::new("node-b", "addr-b");
    node.status = NodeStatus::Active;
    fleet.repos.nodes.save(&node).unwrap();

    // completes the handshake and never answers
    let mut stream = TcpStream::connect(fleet.tunnel_addr).await.unwrap();
    send_frame(&mut stream, &TunnelHello { node_id: "node-b".to_string() })
        .await
        .unwrap();
    let _: TunnelReply = recv_frame(&mut stream).await.unwrap();

    let response = post_rpc(&fleet, json!({"jsonrpc": "2.0", "id": 1, "method": "x"})).await;
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(fleet.repos.records.count_failed_requests().unwrap(), 1);

    // the tunnel is out of step after a missed answer and gets dropped
    for _ in 0..100 {
        if !fleet.registry.is_registered("node-b") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("tunnel of silent node still registered");
}
