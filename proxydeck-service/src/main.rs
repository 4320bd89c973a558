//! proxydeck service - native host for the browser extension shim.
//!
//! Reads tab events and UI requests as native-messaging frames on stdin,
//! drives the auto-switch engine, and sends proxy/badge/notification
//! commands back on stdout. All diagnostics go to stderr; stdout belongs to
//! the frame protocol.

mod bridge;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use colored::*;
use proxydeck_core::messaging;
use proxydeck_core::storage::FileStore;
use proxydeck_core::Engine;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use bridge::{read_frame, HostBridge, Inbound, Outbound};

fn default_db_path() -> PathBuf {
    std::env::var_os("PROXYDECK_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("proxydeck")
                .join("proxydeck.json")
        })
}

fn print_banner() {
    eprintln!();
    eprintln!("{}", "  proxydeck - auto-switching proxy manager".cyan().bold());
    eprintln!();
}

/// Work items the reader task hands to the serial decision loop. Replies to
/// backend calls are routed straight to the bridge instead, so an in-flight
/// apply can settle while the loop is busy.
enum Work {
    Tab(proxydeck_core::TabEvent),
    Request { id: u64, request: messaging::Request },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxydeck_service=info,proxydeck_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    print_banner();

    let db_path = default_db_path();
    eprintln!("{} {}", "Store:".dimmed(), db_path.display());

    let store = Arc::new(FileStore::open(&db_path).await?);
    let hostbridge = Arc::new(HostBridge::new(tokio::io::stdout()));
    let engine = Arc::new(Engine::start(store, hostbridge.clone()).await?);

    eprintln!(
        "{} {} profiles, {} rules, current: {}",
        "Loaded:".dimmed(),
        engine.profiles().len(),
        engine.rule_count(),
        engine.current_profile().green()
    );

    let (work_tx, mut work_rx) = mpsc::channel::<Work>(256);

    // Reader task: frames in order, replies routed out of band
    let reader_bridge = hostbridge.clone();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        loop {
            match read_frame(&mut stdin).await {
                Ok(Some(Inbound::Tab { event })) => {
                    if work_tx.send(Work::Tab(event)).await.is_err() {
                        break;
                    }
                }
                Ok(Some(Inbound::Request { id, request })) => {
                    if work_tx.send(Work::Request { id, request }).await.is_err() {
                        break;
                    }
                }
                Ok(Some(Inbound::Reply {
                    id,
                    ok,
                    error,
                    proxy,
                })) => reader_bridge.resolve_reply(id, ok, error, proxy),
                Ok(None) => {
                    info!("Host closed the bridge");
                    break;
                }
                Err(e) => {
                    error!("Bridge read failed: {}", e);
                    break;
                }
            }
        }
    });

    // Serial decision loop: one event at a time, in delivery order
    while let Some(work) = work_rx.recv().await {
        match work {
            Work::Tab(event) => {
                if let Some(action) = engine.handle_event(event).await {
                    if let Err(e) = hostbridge.send(&Outbound::Action { action }).await {
                        warn!("Could not deliver engine action: {}", e);
                    }
                }
            }
            Work::Request { id, request } => {
                let response = messaging::handle(&engine, request).await;
                if let Err(e) = hostbridge.send(&Outbound::Response { id, response }).await {
                    warn!("Could not deliver response {}: {}", id, e);
                }
            }
        }
    }

    info!("Service shutting down");
    Ok(())
}
