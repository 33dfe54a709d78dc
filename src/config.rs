//! # Configuration
//!
//! Parses the proxy's on-disk configuration: a small hierarchical
//! key/value grammar (bareword or quoted-string keys, `key = value;`
//! assignments, and `key { ... }` nested blocks), in the nginx/UCL style.
//! No published crate parses this exact grammar, so a small
//! recursive-descent parser lives in this module; each backend's `host` is
//! resolved to a concrete address list once at startup via
//! [`tokio::net::lookup_host`] — DNS resolution happens exactly once, not
//! on every connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Default listen port when the configuration omits `port`.
pub const DEFAULT_PORT: u16 = 443;
/// Default backend port when a backend entry omits `port`.
const DEFAULT_BACKEND_PORT: u16 = 443;
/// Default ring-buffer capacity (bytes) when `-b` is not given on the CLI.
pub const DEFAULT_BUFFER_LEN: usize = 16384;
/// Default configuration file path when `-c` is not given on the CLI.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sni-proxy.conf";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A resolved backend: a non-empty, ordered address list.
#[derive(Debug, Clone)]
pub struct BackendEntry {
    pub addresses: Vec<SocketAddr>,
}

/// The fully loaded, ready-to-serve configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub buffer_len: usize,
    pub backends: HashMap<String, BackendEntry>,
}

/// Loads and validates the configuration at `path`, resolving every
/// backend's `host` via DNS. `buffer_len` is the value already decided by
/// the CLI (`-b`, default [`DEFAULT_BUFFER_LEN`]); it is threaded through
/// rather than read from the file, since the ring-buffer size is a runtime
/// tuning knob, not part of the routing table.
pub async fn load(path: &Path, buffer_len: usize) -> Result<ProxyConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let root = parse(&text).map_err(ConfigError::Parse)?;
    build_config(root, buffer_len).await
}

async fn build_config(root: Vec<(String, Value)>, buffer_len: usize) -> Result<ProxyConfig, ConfigError> {
    let mut port = DEFAULT_PORT;
    let mut backends_block: Option<Vec<(String, Value)>> = None;

    for (key, value) in root {
        match key.as_str() {
            "port" => {
                let n = value
                    .as_number()
                    .ok_or_else(|| ConfigError::Invalid("`port` must be a number".into()))?;
                port = u16::try_from(n)
                    .map_err(|_| ConfigError::Invalid(format!("`port` out of range: {n}")))?;
            }
            "backends" => {
                backends_block = Some(
                    value
                        .into_block()
                        .ok_or_else(|| ConfigError::Invalid("`backends` must be a block".into()))?,
                );
            }
            other => {
                return Err(ConfigError::Invalid(format!("unknown top-level key `{other}`")));
            }
        }
    }

    let backends_block = backends_block
        .ok_or_else(|| ConfigError::Invalid("missing `backends` block".into()))?;
    if backends_block.is_empty() {
        return Err(ConfigError::Invalid("`backends` block is empty".into()));
    }

    let mut backends = HashMap::with_capacity(backends_block.len());
    for (name, entry) in backends_block {
        let entry = entry
            .into_block()
            .ok_or_else(|| ConfigError::Invalid(format!("backend `{name}` must be a block")))?;
        let resolved = resolve_backend(&name, entry).await?;
        backends.insert(name, resolved);
    }

    Ok(ProxyConfig { port, buffer_len, backends })
}

async fn resolve_backend(name: &str, fields: Vec<(String, Value)>) -> Result<BackendEntry, ConfigError> {
    let mut host: Option<String> = None;
    let mut port = DEFAULT_BACKEND_PORT;

    for (key, value) in fields {
        match key.as_str() {
            "host" => {
                host = Some(
                    value
                        .into_string()
                        .ok_or_else(|| ConfigError::Invalid(format!("backend `{name}`: `host` must be a string")))?,
                );
            }
            "port" => {
                let n = value
                    .as_number()
                    .ok_or_else(|| ConfigError::Invalid(format!("backend `{name}`: `port` must be a number")))?;
                port = u16::try_from(n).map_err(|_| {
                    ConfigError::Invalid(format!("backend `{name}`: `port` out of range: {n}"))
                })?;
                if port == 0 {
                    return Err(ConfigError::Invalid(format!("backend `{name}`: `port` must be 1-65535")));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!("backend `{name}`: unknown key `{other}`")));
            }
        }
    }

    let host = host.ok_or_else(|| ConfigError::Invalid(format!("backend `{name}`: missing `host`")))?;
    let addresses: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| ConfigError::Invalid(format!("backend `{name}`: cannot resolve `{host}`: {e}")))?
        .collect();
    if addresses.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "backend `{name}`: `{host}` resolved to no addresses"
        )));
    }

    Ok(BackendEntry { addresses })
}

// --- grammar -----------------------------------------------------------

#[derive(Debug, Clone)]
enum Value {
    Number(i64),
    String(String),
    Block(Vec<(String, Value)>),
}

impl Value {
    fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    fn into_block(self) -> Option<Vec<(String, Value)>> {
        match self {
            Value::Block(b) => Some(b),
            _ => None,
        }
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { chars: src.char_indices().peekable(), src }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, c)) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some((_, '#')) => {
                    for (_, c) in self.chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.skip_trivia();
        self.chars.peek().map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next().map(|(_, c)| c)
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_trivia();
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected `{expected}`, found `{c}`")),
            None => Err(format!("expected `{expected}`, found end of input")),
        }
    }

    fn parse_quoted_string(&mut self) -> Result<String, String> {
        self.expect('"')?;
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some(c) => s.push(c),
                None => return Err("unterminated string literal".into()),
            }
        }
        Ok(s)
    }

    fn parse_bareword(&mut self) -> Result<String, String> {
        self.skip_trivia();
        let start = match self.chars.peek() {
            Some((i, c)) if c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '-' => *i,
            _ => return Err("expected a key".into()),
        };
        let mut end = start;
        while let Some((i, c)) = self.chars.peek() {
            if c.is_alphanumeric() || *c == '_' || *c == '.' || *c == '-' {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        Ok(self.src[start..end].to_string())
    }

    fn parse_key(&mut self) -> Result<String, String> {
        match self.peek_char() {
            Some('"') => self.parse_quoted_string(),
            Some(_) => self.parse_bareword(),
            None => Err("expected a key, found end of input".into()),
        }
    }

    fn parse_value(&mut self) -> Result<Value, String> {
        match self.peek_char() {
            Some('"') => Ok(Value::String(self.parse_quoted_string()?)),
            Some('{') => Ok(Value::Block(self.parse_block()?)),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            Some(c) => Err(format!("unexpected character `{c}` in value position")),
            None => Err("expected a value, found end of input".into()),
        }
    }

    fn parse_number(&mut self) -> Result<Value, String> {
        self.skip_trivia();
        let start = match self.chars.peek() {
            Some((i, _)) => *i,
            None => return Err("expected a number".into()),
        };
        let mut end = start;
        if let Some((_, '-')) = self.chars.peek() {
            end += 1;
            self.chars.next();
        }
        while let Some((i, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end]
            .parse::<i64>()
            .map(Value::Number)
            .map_err(|e| format!("invalid number: {e}"))
    }

    /// Parses `{ key = value; key { ... } ... }`, consuming the braces.
    fn parse_block(&mut self) -> Result<Vec<(String, Value)>, String> {
        self.expect('{')?;
        let entries = self.parse_entries('}')?;
        self.expect('}')?;
        Ok(entries)
    }

    /// Parses zero or more `key = value;` / `key { ... }` entries until
    /// `terminator` is seen (without consuming it) or input ends.
    fn parse_entries(&mut self, terminator: char) -> Result<Vec<(String, Value)>, String> {
        let mut entries = Vec::new();
        loop {
            match self.peek_char() {
                None => break,
                Some(c) if c == terminator => break,
                _ => {}
            }
            let key = self.parse_key()?;
            let value = match self.peek_char() {
                Some('{') => Value::Block(self.parse_block()?),
                Some('=') => {
                    self.bump();
                    let v = self.parse_value()?;
                    self.skip_trivia();
                    // A trailing `;` terminates the assignment; tolerate its
                    // absence before a closing brace or end of input.
                    if let Some(';') = self.peek_char() {
                        self.bump();
                    }
                    v
                }
                Some(c) => return Err(format!("expected `=` or `{{` after key, found `{c}`")),
                None => return Err("expected `=` or `{`, found end of input".into()),
            };
            entries.push((key, value));
        }
        Ok(entries)
    }
}

fn parse(src: &str) -> Result<Vec<(String, Value)>, String> {
    let mut parser = Parser::new(src);
    let entries = parser.parse_entries('\0')?;
    parser.skip_trivia();
    if parser.chars.peek().is_some() {
        return Err("trailing input after top-level configuration".into());
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        port = 8443 # listen port
        backends {
          "example.com" { host = "10.0.0.1"; port = 443 }
          "default"     { host = "10.0.0.9" }
        }
    "#;

    #[test]
    fn parses_port_and_backends() {
        let root = parse(SAMPLE).expect("sample config parses");
        assert_eq!(root.len(), 2);
        assert_eq!(root[0].0, "port");
        assert_eq!(root[0].1.as_number(), Some(8443));

        let backends = root[1].1.clone().into_block().unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(backends[0].0, "example.com");
    }

    #[test]
    fn rejects_unterminated_block() {
        let broken = r#"backends { "default" { host = "10.0.0.9" }"#;
        assert!(parse(broken).is_err());
    }

    #[tokio::test]
    async fn build_config_resolves_backends_and_defaults_port() {
        let mut root = Vec::new();
        root.push((
            "backends".to_string(),
            Value::Block(vec![(
                "default".to_string(),
                Value::Block(vec![
                    ("host".to_string(), Value::String("127.0.0.1".to_string())),
                    ("port".to_string(), Value::Number(9443)),
                ]),
            )]),
        ));

        let cfg = build_config(root, DEFAULT_BUFFER_LEN).await.expect("builds");
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.buffer_len, DEFAULT_BUFFER_LEN);
        let backend = cfg.backends.get("default").expect("default backend present");
        assert_eq!(backend.addresses[0].port(), 9443);
    }

    #[tokio::test]
    async fn build_config_rejects_missing_backends() {
        let err = build_config(Vec::new(), DEFAULT_BUFFER_LEN).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
