//! Real-time host telemetry and remote control over WebSocket.
//!
//! Per-topic duplex channels stream periodic host snapshots (processes,
//! services, network, cpu, memory, storage, temperature) and accept control
//! commands that are applied to the live host and acknowledged in-band.
//! Interactive shell and one-shot SSH sessions ride the same transport.

pub mod controller;
pub mod history;
pub mod inspector;
pub mod session;
pub mod shell;
pub mod sinks;
pub mod ssh;
pub mod state;
pub mod tls;
pub mod topic;
pub mod types;
pub mod ws;

use axum::{routing::get, Router};

use crate::state::AppState;

/// All topic endpoints under `/ws/<topic>`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/:topic", get(ws::ws_handler))
        .with_state(state)
}

/// Port from `--port N`, `-p N`, or `--port=N`; falls back to the default.
pub fn parse_port<I: IntoIterator<Item = String>>(args: I, default_port: u16) -> u16 {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut long: Option<String> = None;
    let mut short: Option<String> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--port" => long = it.next(),
            "-p" => short = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    long = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    long.or(short)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default_port)
}
