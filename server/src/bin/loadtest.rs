//! Load test for the island server.
//!
//! Spawns multiple fake WebSocket clients that:
//! - Register a throwaway account
//! - Walk in a circle, sending moves at a fixed rate
//! - Receive and count player-moved broadcasts
//!
//! Usage: cargo run --bin loadtest -- --clients 50 --duration 30

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser, Debug)]
#[command(name = "loadtest", about = "Island server load test")]
struct Args {
    /// Number of clients to spawn
    #[arg(long, default_value_t = 50)]
    clients: u32,

    /// Test duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Moves per second per client
    #[arg(long, default_value_t = 20.0)]
    move_rate: f64,

    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    url: String,
}

// === Metrics ===

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    signed_in: AtomicU64,
    messages_received: AtomicU64,
    moves_received: AtomicU64,
    moves_sent: AtomicU64,
    errors: AtomicU64,
    auth_latency_sum_ms: AtomicU64,
}

// === Client task ===

async fn run_client(client_id: u32, run_tag: u64, args: Arc<Args>, metrics: Arc<Metrics>) {
    let (mut ws, _) = match connect_async(args.url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let register = json!({
        "type": "register",
        "username": format!("lt{}_{}", run_tag % 100_000, client_id),
        "password": "loadtest",
    });
    let auth_start = Instant::now();
    if ws.send(Message::Text(register.to_string().into())).await.is_err() {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        return;
    }

    // Wait for the auth ack before doing anything else
    let signed_in = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(msg) = ws.next().await {
            let Ok(Message::Text(text)) = msg else { continue };
            metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                continue;
            };
            if value["type"] == "auth-ack" {
                if value["ok"] != true && client_id < 3 {
                    eprintln!("Client {} rejected: {}", client_id, value["error"]);
                }
                return value["ok"] == true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !signed_in {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        metrics.connected.fetch_sub(1, Ordering::Relaxed);
        return;
    }
    metrics.signed_in.fetch_add(1, Ordering::Relaxed);
    metrics
        .auth_latency_sum_ms
        .fetch_add(auth_start.elapsed().as_millis() as u64, Ordering::Relaxed);

    let move_period = Duration::from_secs_f64(1.0 / args.move_rate.max(0.1));
    let mut move_timer = tokio::time::interval(move_period);
    move_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let test_end = Instant::now() + Duration::from_secs(args.duration);
    let radius = 5.0 + (client_id % 15) as f64;
    let mut angle = client_id as f64;

    while Instant::now() < test_end {
        tokio::select! {
            _ = move_timer.tick() => {
                angle += 0.05;
                let msg = json!({
                    "type": "move",
                    "x": radius * angle.cos(),
                    "y": 1.35,
                    "z": radius * angle.sin(),
                    "yaw": angle,
                    "isSwimming": false,
                });
                if ws.send(Message::Text(msg.to_string().into())).await.is_ok() {
                    metrics.moves_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        if text.contains("\"type\":\"player-moved\"") {
                            metrics.moves_received.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if client_id < 3 {
                            eprintln!("Client {} got Close: {:?}", client_id, frame);
                        }
                        break;
                    }
                    None => break,
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

// === Main ===

#[tokio::main]
async fn main() {
    let args = Arc::new(Args::parse());

    println!("=== Island Server Load Test ===");
    println!("Clients: {}", args.clients);
    println!("Duration: {}s", args.duration);
    println!("Move rate: {}/s per client", args.move_rate);
    println!("URL: {}", args.url);
    println!();

    let run_tag = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let metrics = Arc::new(Metrics::default());

    let mut handles = Vec::with_capacity(args.clients as usize);
    let spawn_start = Instant::now();
    for client_id in 0..args.clients {
        let args = Arc::clone(&args);
        let metrics = Arc::clone(&metrics);
        handles.push(tokio::spawn(run_client(client_id, run_tag, args, metrics)));

        // Stagger sign-ups; each one costs a password hash on the server
        if client_id % 10 == 9 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    println!("All clients spawned in {:?}", spawn_start.elapsed());

    let stats_metrics = Arc::clone(&metrics);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();
        loop {
            interval.tick().await;
            println!(
                "[{:3}s] connected={}, signed_in={}, moves_sent={}, moves_received={}, errors={}",
                start.elapsed().as_secs(),
                stats_metrics.connected.load(Ordering::Relaxed),
                stats_metrics.signed_in.load(Ordering::Relaxed),
                stats_metrics.moves_sent.load(Ordering::Relaxed),
                stats_metrics.moves_received.load(Ordering::Relaxed),
                stats_metrics.errors.load(Ordering::Relaxed),
            );
        }
    });

    for handle in handles {
        let _ = handle.await;
    }
    stats_handle.abort();

    let signed_in = metrics.signed_in.load(Ordering::Relaxed);
    let sent = metrics.moves_sent.load(Ordering::Relaxed);
    let received = metrics.moves_received.load(Ordering::Relaxed);

    println!();
    println!("=== Final Results ===");
    println!("Signed in: {}/{}", signed_in, args.clients);
    println!("Total messages received: {}", metrics.messages_received.load(Ordering::Relaxed));
    println!("Moves sent: {}", sent);
    println!("Moves received: {}", received);
    println!("Errors: {}", metrics.errors.load(Ordering::Relaxed));
    if signed_in > 0 {
        println!(
            "Average sign-up latency: {}ms",
            metrics.auth_latency_sum_ms.load(Ordering::Relaxed) / signed_in
        );
    }
    // Every accepted move fans out to all other signed-in clients
    if sent > 0 && signed_in > 1 {
        let expected = sent as f64 * (signed_in - 1) as f64;
        println!("Delivery rate: {:.1}%", received as f64 / expected * 100.0);
    }
}
