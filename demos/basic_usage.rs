// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic content-sync usage example.
//!
//! Demonstrates:
//! 1. Two engines (an editor and a viewer) on one in-process hub
//! 2. A content change reaching the other client
//! 3. A transport outage: changes deferred, breaker opening
//! 4. Recovery: the queue draining in order
//! 5. Persisted sync state in SQLite
//! 6. Displaying exported metrics
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::sync::Arc;
use std::time::Duration;

use content_sync::{
    InProcessHub, InProcessTransport, SqliteStore, StaticFlags, SyncDeps, SyncEngine, SyncEngineConfig,
    SyncEventKind, SyncOptions,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_sync=info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           content-sync: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Two clients on one hub
    // ─────────────────────────────────────────────────────────────────────────
    let dir = std::env::temp_dir().join("content_sync_demo");
    std::fs::create_dir_all(&dir)?;
    let db_path = dir.join("state.db");

    let config = SyncEngineConfig {
        reset_timeout_ms: 1_000,
        drain_interval_ms: 250,
        ..Default::default()
    };

    let hub = InProcessHub::new();
    let editor_transport = Arc::new(hub.transport());
    let editor = Arc::new(SyncEngine::new(
        config.clone(),
        SyncDeps {
            transport: editor_transport.clone(),
            store: Arc::new(SqliteStore::open(&db_path).await?),
            flags: Arc::new(StaticFlags::new().with("realtime_sync_enabled", true)),
        },
    ));
    let viewer = Arc::new(SyncEngine::new(
        config,
        SyncDeps {
            transport: Arc::new(hub.transport()),
            store: Arc::new(content_sync::MemoryStore::new()),
            flags: Arc::new(StaticFlags::new().with("realtime_sync_enabled", true)),
        },
    ));

    editor.initialize().await;
    viewer.initialize().await;
    println!("📦 Editor strategy: {}, viewer strategy: {}", editor.strategy(), viewer.strategy());

    viewer.subscribe(SyncEventKind::ContentUpdated, |event| {
        println!("   👀 viewer saw {} id={:?}", event.kind, event.content_id());
        Ok(())
    });

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Happy path
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n✏️  Editing article-1...");
    let synced = editor
        .sync_content_change(
            SyncEventKind::ContentUpdated,
            json!({"id": "article-1", "contentType": "article", "title": "Hello"}),
            SyncOptions::default(),
        )
        .await;
    println!("   └─ synced: {}", synced);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Outage
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Dropping the editor's connection...");
    set_link(&editor_transport, false);
    for n in 2..=5 {
        let synced = editor
            .sync_content_change(
                SyncEventKind::ContentUpdated,
                json!({"id": format!("article-{n}")}),
                SyncOptions::default(),
            )
            .await;
        println!("   └─ article-{} synced: {}", n, synced);
    }
    let status = editor.get_status();
    println!("   └─ queue={} circuit_open={}", status.queue_size, status.circuit_open);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Recovery
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔁 Waiting out the cooldown and reconnecting...");
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    set_link(&editor_transport, true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    let status = editor.get_status();
    println!("   └─ queue={} circuit_open={}", status.queue_size, status.circuit_open);
    println!("   └─ status: {}", serde_json::to_string_pretty(&status)?);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Persisted state
    // ─────────────────────────────────────────────────────────────────────────
    let state = editor.load_sync_state().await;
    println!("\n💾 Persisted state: {}", serde_json::to_string(&state)?);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📈 Exported metrics:");
    dump_metrics(&snapshotter);

    editor.destroy();
    viewer.destroy();
    let _ = std::fs::remove_dir_all(&dir);

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

fn set_link(transport: &InProcessTransport, up: bool) {
    transport.set_connected(up);
}

/// Print every captured metric, sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let rendered = match value {
                DebugValue::Counter(v) => format!("{}", v),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.4}", samples.len(), sum)
                }
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
