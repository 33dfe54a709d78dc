//! # Error Types
//!
//! Startup errors ([`ProxyError`]) are fatal and surface to the operator via
//! `anyhow::Context` in `main`; per-session errors ([`SessionError`]) never
//! escape [`crate::session::Session::run`] — one bad connection never
//! brings down another.

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("could not bind any listen address for port {port}")]
    BindFailed { port: u16 },
}

/// Local to one session; causes an alert-and-close or a silent drop,
/// depending on which state the session was in when the error occurred.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed ClientHello")]
    Malformed(#[from] crate::handshake::Malformed),
    #[error("no route for host and no default backend configured")]
    HostUnknown(#[from] crate::dispatch::NotFound),
    #[error("backend unreachable: {0}")]
    BackendUnreachable(#[source] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
}
