//! # sni-proxy
//!
//! A transparent TCP forwarder that routes each incoming TLS connection to a
//! backend chosen by the SNI host name in the client's ClientHello. The
//! proxy never terminates TLS and never inspects payload past the first
//! handshake record.
//!
//! ## Architecture
//!
//! - [`config`] loads and resolves the on-disk backend map once at startup.
//! - [`dispatch`] looks up a host name against that map (read-only, no
//!   mutex — shared across every session via `Rc`).
//! - [`handshake`] and [`alert`] are pure byte-level functions: parse a
//!   ClientHello, or build the fatal alert record sent on failure.
//! - [`listener`] binds and accepts; [`session`] drives each accepted
//!   connection's sniff → dial → proxy → drain lifecycle.
//! - [`ring_buffer`] is the per-direction byte queue the byte pump reads
//!   and writes through.
//!
//! Everything runs on a single-threaded, cooperative Tokio runtime
//! (`current_thread` + `LocalSet`): no session is ever touched from more
//! than one task at a time, so `Rc`/`RefCell` stand in for `Arc`/`Mutex`
//! throughout. Split into a library and a thin binary so the proxy's
//! internals — the parser, the ring buffer, a whole session against real
//! loopback sockets — are reachable from `tests/`.

pub mod alert;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod ring_buffer;
pub mod session;

use std::rc::Rc;

use anyhow::Context;
use log::info;

/// Loads configuration, binds every listener, and accepts connections until
/// SIGINT. Runs entirely on the current task's `LocalSet` — callers must
/// invoke this from within one (see `main.rs`).
pub async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let cfg = config::load(&cli.config, cli.buffer_len)
        .await
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    info!(
        "loaded configuration: port={} buffer_len={} backends={}",
        cfg.port,
        cfg.buffer_len,
        cfg.backends.len()
    );

    let dispatcher = Rc::new(dispatch::Dispatcher::new(&cfg));
    let listeners = listener::bind_all(cfg.port)
        .await
        .with_context(|| format!("failed to bind listen port {}", cfg.port))?;

    let mut tasks = Vec::with_capacity(listeners.len());
    for l in listeners {
        let dispatcher = Rc::clone(&dispatcher);
        let buffer_len = cfg.buffer_len;
        tasks.push(tokio::task::spawn_local(async move {
            listener::accept_loop(l, buffer_len, dispatcher).await;
        }));
    }

    // Accept loops never return on their own; the only clean shutdown path
    // is an operator-initiated SIGINT.
    tokio::signal::ctrl_c().await.context("failed to listen for SIGINT")?;
    info!("SIGINT received, shutting down");
    for task in tasks {
        task.abort();
    }

    Ok(())
}
