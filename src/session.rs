//! # Session
//!
//! The per-connection state machine spanning sniff → dial → proxy → drain.
//! A `Session` owns both sockets, the saved ClientHello bytes, the
//! extracted host name, and (once `Proxy` is entered) both ring buffers —
//! nothing here is shared with any other session, so no mutex is ever
//! needed.
//!
//! States are an explicit tagged enum carrying exactly the data that state
//! needs, rather than a bare ordinal advanced by `state++`. Each variant's
//! fields are only alive while that state is current, so e.g. the ring
//! buffers simply don't exist until `Proxy` is entered and are dropped the
//! moment the session leaves it.

use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::alert::build_alert;
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::handshake::{self, parse_client_hello};
use crate::ring_buffer::RingBuffer;

/// Half-close drain timeout: the only timer a session ever arms.
const HALF_CLOSE_DRAIN: Duration = Duration::from_secs(5);

enum SessionState {
    AwaitHello,
    AlertPending { alert: [u8; 7] },
    AlertSent,
    BackendConnecting,
    Proxy { cl2bk: RingBuffer, bk2cl: RingBuffer, backend: TcpStream },
    /// Backend already closed; client is the side still draining `bk2cl`
    /// to completion (or until the timer fires).
    ClientHalfClosed { bk2cl: RingBuffer, deadline: Instant },
    /// Client already closed; backend is the side still draining `cl2bk`
    /// to completion (or until the timer fires).
    BackendHalfClosed { cl2bk: RingBuffer, backend: TcpStream, deadline: Instant },
    Terminated,
}

pub struct Session {
    client: TcpStream,
    peer: SocketAddr,
    buffer_len: usize,
    dispatcher: Rc<Dispatcher>,
    legacy_version: [u8; 2],
    saved_hello: Vec<u8>,
    host: Option<String>,
    state: SessionState,
}

impl Session {
    pub fn new(client: TcpStream, peer: SocketAddr, buffer_len: usize, dispatcher: Rc<Dispatcher>) -> Self {
        Session {
            client,
            peer,
            buffer_len,
            dispatcher,
            legacy_version: [0x03, 0x01],
            saved_hello: Vec::new(),
            host: None,
            state: SessionState::AwaitHello,
        }
    }

    /// Drives the session to completion. Never returns an error: every
    /// per-session failure is logged and ends in `Terminated`.
    pub async fn run(mut self) {
        loop {
            self.state = match std::mem::replace(&mut self.state, SessionState::Terminated) {
                SessionState::AwaitHello => self.await_hello().await,
                SessionState::AlertPending { alert } => self.send_alert(alert).await,
                SessionState::AlertSent => self.await_alert_sent().await,
                SessionState::BackendConnecting => self.connect_backend().await,
                SessionState::Proxy { cl2bk, bk2cl, backend } => self.run_proxy(cl2bk, bk2cl, backend).await,
                SessionState::ClientHalfClosed { bk2cl, deadline } => {
                    self.drain_to_client(bk2cl, deadline).await
                }
                SessionState::BackendHalfClosed { cl2bk, backend, deadline } => {
                    self.drain_to_backend(cl2bk, backend, deadline).await
                }
                SessionState::Terminated => break,
            };
        }
        debug!("session {}: terminated", self.peer);
    }

    async fn await_hello(&mut self) -> SessionState {
        let mut buf = vec![0u8; self.buffer_len];
        loop {
            if let Err(e) = self.client.readable().await {
                warn!("session {}: client not readable: {e}", self.peer);
                return SessionState::Terminated;
            }
            match self.client.try_read(&mut buf) {
                Ok(0) => {
                    debug!("session {}: client closed before sending a ClientHello", self.peer);
                    return SessionState::Terminated;
                }
                Ok(n) => {
                    buf.truncate(n);
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("session {}: read error awaiting ClientHello: {e}", self.peer);
                    return SessionState::Terminated;
                }
            }
        }

        self.legacy_version = handshake::peek_legacy_version(&buf);

        let hello = match parse_client_hello(&buf) {
            Ok(hello) => hello,
            Err(e) => {
                info!("session {}: {}", self.peer, SessionError::from(e));
                return SessionState::AlertPending { alert: build_alert(self.legacy_version) };
            }
        };
        self.legacy_version = hello.legacy_version;
        self.host = hello.server_name.clone();

        match self.dispatcher.dispatch(hello.server_name.as_deref()) {
            Ok(addrs) if !addrs.is_empty() => {
                self.saved_hello = buf;
                debug!(
                    "session {}: routing host={:?} to {} candidate address(es)",
                    self.peer,
                    self.host,
                    addrs.len()
                );
                SessionState::BackendConnecting
            }
            Ok(_) | Err(_) => {
                info!(
                    "session {}: {} (host={:?})",
                    self.peer,
                    SessionError::from(crate::dispatch::NotFound),
                    self.host
                );
                SessionState::AlertPending { alert: build_alert(self.legacy_version) }
            }
        }
    }

    async fn send_alert(&mut self, alert: [u8; 7]) -> SessionState {
        if let Err(e) = self.client.writable().await {
            warn!("session {}: client not writable for alert: {e}", self.peer);
            return SessionState::Terminated;
        }
        match self.client.try_write(&alert) {
            Ok(n) if n == alert.len() => SessionState::AlertSent,
            Ok(_) => {
                warn!("session {}: partial alert write, closing", self.peer);
                SessionState::Terminated
            }
            Err(e) => {
                warn!("session {}: failed to write alert: {e}", self.peer);
                SessionState::Terminated
            }
        }
    }

    /// `AlertSent`: waits for the socket to report writable (which fires
    /// almost immediately once the alert has gone out) and then terminates
    /// unconditionally, rather than waiting on the client to read or close
    /// — a client that never sends another byte and never closes must not
    /// keep this session's task alive indefinitely.
    async fn await_alert_sent(&mut self) -> SessionState {
        let _ = self.client.writable().await;
        SessionState::Terminated
    }

    /// Dials the first address the dispatcher resolved for this host. One
    /// attempt only — a connect failure goes straight to `AlertPending`
    /// rather than trying any other address in the list.
    async fn connect_backend(&mut self) -> SessionState {
        let addr = match self.dispatcher.dispatch(self.host.as_deref()) {
            Ok([addr, ..]) => *addr,
            Ok([]) | Err(_) => return SessionState::AlertPending { alert: build_alert(self.legacy_version) },
        };

        match TcpStream::connect(addr).await {
            Ok(backend) => {
                debug!("session {}: connected to backend {addr}", self.peer);
                let cl2bk = RingBuffer::create(self.buffer_len, &self.saved_hello);
                let bk2cl = RingBuffer::create(self.buffer_len, &[]);
                SessionState::Proxy { cl2bk, bk2cl, backend }
            }
            Err(e) => {
                warn!(
                    "session {}: connect to {addr} failed: {}",
                    self.peer,
                    SessionError::BackendUnreachable(e)
                );
                SessionState::AlertPending { alert: build_alert(self.legacy_version) }
            }
        }
    }

    async fn run_proxy(&mut self, mut cl2bk: RingBuffer, mut bk2cl: RingBuffer, backend: TcpStream) -> SessionState {
        loop {
            let cl_read_armed = cl2bk.can_write();
            let cl_write_armed = bk2cl.can_read();
            let bk_read_armed = bk2cl.can_write();
            let bk_write_armed = cl2bk.can_read();

            if !cl_read_armed && !cl_write_armed && !bk_read_armed && !bk_write_armed {
                return SessionState::Terminated;
            }

            tokio::select! {
                res = self.client.readable(), if cl_read_armed => {
                    if res.is_err() {
                        return self.close_client(cl2bk, bk2cl, backend);
                    }
                    match read_into(&self.client, &mut cl2bk) {
                        Ok(true) => {}
                        Ok(false) => return self.close_client(cl2bk, bk2cl, backend),
                        Err(e) => {
                            warn!("session {}: {} (reading from client)", self.peer, SessionError::Transport(e));
                            return self.close_client(cl2bk, bk2cl, backend);
                        }
                    }
                }
                res = self.client.writable(), if cl_write_armed => {
                    if res.is_err() {
                        return self.close_client(cl2bk, bk2cl, backend);
                    }
                    if let Err(e) = write_from(&self.client, &mut bk2cl) {
                        warn!("session {}: {} (writing to client)", self.peer, SessionError::Transport(e));
                        return self.close_client(cl2bk, bk2cl, backend);
                    }
                }
                res = backend.readable(), if bk_read_armed => {
                    if res.is_err() {
                        return self.close_backend(cl2bk, bk2cl, backend);
                    }
                    match read_into(&backend, &mut bk2cl) {
                        Ok(true) => {}
                        Ok(false) => return self.close_backend(cl2bk, bk2cl, backend),
                        Err(e) => {
                            warn!("session {}: {} (reading from backend)", self.peer, SessionError::Transport(e));
                            return self.close_backend(cl2bk, bk2cl, backend);
                        }
                    }
                }
                res = backend.writable(), if bk_write_armed => {
                    if res.is_err() {
                        return self.close_backend(cl2bk, bk2cl, backend);
                    }
                    if let Err(e) = write_from(&backend, &mut cl2bk) {
                        warn!("session {}: {} (writing to backend)", self.peer, SessionError::Transport(e));
                        return self.close_backend(cl2bk, bk2cl, backend);
                    }
                }
            }
        }
    }

    /// Client side closed (EOF or error) while in `Proxy`. If there is
    /// nothing left to flush to the backend, finish immediately; otherwise
    /// stop reading from the backend (`bk2cl` no longer has anywhere to
    /// go) and drain `cl2bk` to it under the half-close timer.
    fn close_client(&mut self, cl2bk: RingBuffer, _bk2cl: RingBuffer, backend: TcpStream) -> SessionState {
        if !cl2bk.can_read() {
            return SessionState::Terminated;
        }
        shutdown_read(&backend);
        SessionState::BackendHalfClosed { cl2bk, backend, deadline: Instant::now() + HALF_CLOSE_DRAIN }
    }

    /// Backend side closed (EOF or error) while in `Proxy`. Symmetric with
    /// [`Session::close_client`].
    fn close_backend(&mut self, _cl2bk: RingBuffer, bk2cl: RingBuffer, _backend: TcpStream) -> SessionState {
        if !bk2cl.can_read() {
            return SessionState::Terminated;
        }
        shutdown_read(&self.client);
        SessionState::ClientHalfClosed { bk2cl, deadline: Instant::now() + HALF_CLOSE_DRAIN }
    }

    async fn drain_to_backend(&mut self, mut cl2bk: RingBuffer, backend: TcpStream, deadline: Instant) -> SessionState {
        loop {
            if !cl2bk.can_read() {
                return SessionState::Terminated;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("session {}: half-close drain to backend timed out", self.peer);
                    return SessionState::Terminated;
                }
                res = backend.writable() => {
                    if res.is_err() {
                        return SessionState::Terminated;
                    }
                    if write_from(&backend, &mut cl2bk).is_err() {
                        return SessionState::Terminated;
                    }
                }
            }
        }
    }

    async fn drain_to_client(&mut self, mut bk2cl: RingBuffer, deadline: Instant) -> SessionState {
        loop {
            if !bk2cl.can_read() {
                return SessionState::Terminated;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("session {}: half-close drain to client timed out", self.peer);
                    return SessionState::Terminated;
                }
                res = self.client.writable() => {
                    if res.is_err() {
                        return SessionState::Terminated;
                    }
                    if write_from(&self.client, &mut bk2cl).is_err() {
                        return SessionState::Terminated;
                    }
                }
            }
        }
    }
}

fn shutdown_read(stream: &TcpStream) {
    let sock = socket2::SockRef::from(stream);
    let _ = sock.shutdown(Shutdown::Read);
}

/// Reads from `stream` into `buf`'s writable view. Returns `Ok(true)` on a
/// successful (possibly zero-progress-due-to-WouldBlock) read, `Ok(false)`
/// on EOF.
fn read_into(stream: &TcpStream, buf: &mut RingBuffer) -> std::io::Result<bool> {
    let mut view = buf.write_view();
    let mut slices = view.as_io_slices_mut();
    match stream.try_read_vectored(&mut slices) {
        Ok(0) => Ok(false),
        Ok(n) => {
            drop(slices);
            drop(view);
            buf.advance_write(n);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(true),
        Err(e) => Err(e),
    }
}

/// Writes `buf`'s readable view to `stream`.
fn write_from(stream: &TcpStream, buf: &mut RingBuffer) -> std::io::Result<()> {
    let view = buf.read_view();
    let slices = view.as_io_slices();
    match stream.try_write_vectored(&slices) {
        Ok(n) => {
            drop(slices);
            drop(view);
            buf.advance_read(n);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(()),
        Err(e) => Err(e),
    }
}
