//! # Dispatcher
//!
//! Maps an SNI host name to a backend address list. This is lookup-only:
//! resolution already happened once at startup in [`crate::config`]. A
//! `Dispatcher` is built once and then shared read-only (via `Rc`) across
//! every session for the life of the process — nothing here ever needs a
//! mutex.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::config::{BackendEntry, ProxyConfig};

const DEFAULT_KEY: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no backend for host and no default configured")]
pub struct NotFound;

pub struct Dispatcher {
    backends: HashMap<String, BackendEntry>,
}

impl Dispatcher {
    pub fn new(config: &ProxyConfig) -> Self {
        Dispatcher { backends: config.backends.clone() }
    }

    /// Looks up `host` by exact byte equality (no case folding, no
    /// trailing-dot handling, no wildcarding), falling back to the
    /// `"default"` entry when present.
    pub fn dispatch(&self, host: Option<&str>) -> Result<&[SocketAddr], NotFound> {
        if let Some(host) = host {
            if let Some(entry) = self.backends.get(host) {
                return Ok(&entry.addresses);
            }
        }
        self.backends
            .get(DEFAULT_KEY)
            .map(|entry| entry.addresses.as_slice())
            .ok_or(NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn config_with(entries: &[(&str, &str)]) -> ProxyConfig {
        let mut backends = Map::new();
        for (name, addr) in entries {
            backends.insert(
                name.to_string(),
                BackendEntry { addresses: vec![addr.parse().unwrap()] },
            );
        }
        ProxyConfig { port: 443, buffer_len: 16384, backends }
    }

    #[test]
    fn exact_host_match_wins_over_default() {
        let cfg = config_with(&[("example.com", "127.0.0.1:9001"), ("default", "127.0.0.1:9002")]);
        let dispatcher = Dispatcher::new(&cfg);
        let addrs = dispatcher.dispatch(Some("example.com")).unwrap();
        assert_eq!(addrs[0].port(), 9001);
    }

    #[test]
    fn unknown_host_falls_back_to_default() {
        let cfg = config_with(&[("default", "127.0.0.1:9002")]);
        let dispatcher = Dispatcher::new(&cfg);
        let addrs = dispatcher.dispatch(Some("other.test")).unwrap();
        assert_eq!(addrs[0].port(), 9002);
    }

    #[test]
    fn no_route_and_no_default_is_not_found() {
        let cfg = config_with(&[("example.com", "127.0.0.1:9001")]);
        let dispatcher = Dispatcher::new(&cfg);
        assert_eq!(dispatcher.dispatch(Some("absent.test")), Err(NotFound));
    }

    #[test]
    fn absent_sni_falls_back_to_default() {
        let cfg = config_with(&[("default", "127.0.0.1:9002")]);
        let dispatcher = Dispatcher::new(&cfg);
        let addrs = dispatcher.dispatch(None).unwrap();
        assert_eq!(addrs[0].port(), 9002);
    }
}
