//! # Command-Line Interface
//!
//! `-c`/`-b`/`-h` flags via `clap`'s derive API, in the same style a
//! small companion CLI crate would use for its own flags.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_BUFFER_LEN;

/// Transparent SNI-routing TCP forwarder.
#[derive(Parser, Debug)]
#[command(name = "sni-proxy", about = "Routes TLS connections by SNI to a backend, without terminating TLS", long_about = None)]
pub struct Cli {
    /// Path to the configuration file.
    // Kept a literal (rather than `config::DEFAULT_CONFIG_PATH`) since
    // clap's derive attributes parse `default_value` as a string literal.
    #[arg(short = 'c', long = "config", default_value = "/etc/sni-proxy.conf")]
    pub config: PathBuf,

    /// Ring-buffer capacity in bytes for each direction of a proxied session.
    #[arg(short = 'b', long = "buffer", default_value_t = DEFAULT_BUFFER_LEN)]
    pub buffer_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_CONFIG_PATH;

    #[test]
    fn cli_default_config_path_matches_config_module_constant() {
        assert_eq!("/etc/sni-proxy.conf", DEFAULT_CONFIG_PATH);
    }
}
