//! Concurrency tests for the shared registries

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::task::JoinSet;
use wired::registry::{
    NodeEntry, NodeMeta, NodeRegistry, PlayerRegistry, PlayerSession, Route, RouteTable,
};
use wired::service::{LatestSender, PacketSender};

fn entry(key: String, conn_id: u64) -> NodeEntry {
    let (sender, _rx) = PacketSender::channel(1);
    let (routes, _) = LatestSender::channel();
    NodeEntry {
        key,
        conn_id,
        sender,
        routes,
        meta: NodeMeta {
            arch: "x86_64".into(),
            version: "0.4.0".into(),
            hash: String::new(),
            peer: "127.0.0.1:50000".parse().unwrap(),
            connected_at: SystemTime::now(),
            last_seen: Instant::now(),
        },
    }
}

fn route(i: usize) -> Route {
    Route {
        id: format!("route-{i}"),
        server_host: "10.0.0.5".into(),
        server_port: 25565,
        proxy_domain: format!("server{i}.example.net"),
        proxy_port: 25565,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_node_registration() {
    let registry = Arc::new(NodeRegistry::new());
    let tasks_count = 64usize;
    let per_task = 50usize;

    let mut tasks = JoinSet::new();
    for t in 0..tasks_count {
        let registry = registry.clone();
        tasks.spawn(async move {
            for i in 0..per_task {
                let key = format!("node-{t:03}-{i:03}");
                assert!(registry.add(entry(key.clone(), (t * per_task + i) as u64)).is_none());
                registry.touch(&key, (t * per_task + i) as u64);
                tokio::task::yield_now().await;
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), tasks_count * per_task);
    let keys: HashSet<String> = snapshot.into_iter().map(|e| e.key).collect();
    assert_eq!(keys.len(), tasks_count * per_task);

    let mut tasks = JoinSet::new();
    for t in 0..tasks_count {
        let registry = registry.clone();
        tasks.spawn(async move {
            for i in 0..per_task {
                let key = format!("node-{t:03}-{i:03}");
                assert!(registry.remove(&key).is_some());
                assert!(registry.find(&key).is_none());
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_reconnects_keep_one_entry() {
    let registry = Arc::new(NodeRegistry::new());

    let mut tasks = JoinSet::new();
    for conn_id in 0..200u64 {
        let registry = registry.clone();
        tasks.spawn(async move {
            registry.add(entry("node-flappy".into(), conn_id));
            tokio::task::yield_now().await;
            // Only the owner may remove; everyone else is a stale connection
            registry.remove_connection("node-flappy", conn_id + 1_000);
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    assert_eq!(registry.len(), 1);
    assert!(registry.find("node-flappy").unwrap().conn_id < 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_player_sessions() {
    let players = Arc::new(PlayerRegistry::new());

    let mut tasks = JoinSet::new();
    for node in 0..8usize {
        let players = players.clone();
        tasks.spawn(async move {
            for i in 0..100usize {
                players.add(
                    PlayerSession {
                        name: format!("player{i}"),
                        uuid: format!("{node:02x}{i:030x}"),
                        joined_at: 0,
                        backend: "10.0.0.5:25565".into(),
                        virtual_host: "play.example.net".into(),
                        protocol_version: 763,
                        node_id: format!("node-{node}"),
                    },
                    None,
                );
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert_eq!(players.len(), 800);

    let mut tasks = JoinSet::new();
    for node in 0..8usize {
        let players = players.clone();
        tasks.spawn(async move { players.remove_by_node(&format!("node-{node}")).len() });
    }
    let mut removed = 0;
    while let Some(res) = tasks.join_next().await {
        removed += res.unwrap();
    }
    assert_eq!(removed, 800);
    assert!(players.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn route_reads_during_replacement() {
    let table = Arc::new(RouteTable::new((0..10).map(route).collect()));

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let table = table.clone();
        tasks.spawn(async move {
            for _ in 0..1_000 {
                let routes = table.get_routes();
                // Each snapshot is one whole table, never a partial update
                assert!(routes.len() == 10 || routes.len() == 20);
                tokio::task::yield_now().await;
            }
        });
    }
    for round in 0..100 {
        let size = if round % 2 == 0 { 20 } else { 10 };
        table.set_routes((0..size).map(route).collect());
        tokio::task::yield_now().await;
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}
