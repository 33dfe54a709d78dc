//! # Listener
//!
//! Binds every address resolved for `(None, port)`, accepts connections in a
//! loop, and spawns a fresh [`Session`] per accepted socket: bind, then
//! `loop { listener.accept().await }` spawning one task per connection,
//! run on the single `LocalSet` (`spawn_local`) this crate's ownership
//! model requires — no session is ever shared across threads, so no
//! `Send` bound is needed.

use std::net::SocketAddr;
use std::rc::Rc;

use log::{error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::error::ProxyError;
use crate::session::Session;

/// Binds a listener for `(None, port)` on every address family the host
/// supports — the Tokio equivalent of looping over `getaddrinfo(NULL, port,
/// AI_PASSIVE)` results, which for an unspecified host yields the wildcard
/// address of each family. Returns one [`TcpListener`] per address that
/// bound successfully; a partial failure is logged and the proxy continues
/// with whatever did bind — only binding nothing at all is fatal.
pub async fn bind_all(port: u16) -> Result<Vec<TcpListener>, ProxyError> {
    let candidates = [
        SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], port)),
        SocketAddr::from(([0, 0, 0, 0], port)),
    ];

    let mut listeners = Vec::new();
    for addr in candidates {
        match bind_one(addr) {
            Ok(listener) => {
                info!("listening on {addr}");
                listeners.push(listener);
            }
            Err(e) => warn!("failed to bind {addr}: {e}"),
        }
    }

    if listeners.is_empty() {
        return Err(ProxyError::BindFailed { port });
    }
    Ok(listeners)
}

/// Binds a single address with `SO_REUSEADDR` and non-blocking mode, then
/// listens with the OS maximum backlog: `i32::MAX` is clipped by the
/// kernel down to `net.core.somaxconn`, which is the actual ceiling and
/// varies per host, so this deliberately doesn't guess a fixed number.
/// `socket2` opens the socket with `SOCK_CLOEXEC` set on Unix by
/// construction, so no separate call is needed for that bit.
fn bind_one(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::MAX)?;

    TcpListener::from_std(socket.into())
}

/// Accepts connections on `listener` in a loop for as long as the process
/// runs, spawning one `Session::run` task per accepted socket onto the
/// current `LocalSet`. `EAGAIN`/`EINTR`/`EWOULDBLOCK`-shaped errors never
/// reach this layer (Tokio's `accept()` already retries them); any other
/// accept error is logged and the loop continues.
pub async fn accept_loop(listener: TcpListener, buffer_len: usize, dispatcher: Rc<Dispatcher>) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                let dispatcher = Rc::clone(&dispatcher);
                let _: JoinHandle<()> = tokio::task::spawn_local(async move {
                    Session::new(client, peer, buffer_len, dispatcher).run().await;
                });
            }
            Err(e) => {
                error!("accept failed: {e}");
            }
        }
    }
}
