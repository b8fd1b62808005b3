//! TCP listeners and connections
//!
//! Every accepted or connected socket becomes a [`Connection`] in the
//! runtime's table, keyed by its reactor token. A connection has a read
//! buffer, a FIFO of pending writes and exactly one protocol that owns
//! what is read: raw `net` sockets discard input, HTTP exchanges parse it.
//!
//! Registrations are edge-triggered, so each readiness event drains reads
//! and writes until `WouldBlock`.

use super::async_io::{AsyncSocket, Interest, Source, TaskId, Token};
use super::http::{ClientTransaction, ExchangePhase, ServerExchange};
use super::{HostError, HostObject, HostResult, Pinned, Runtime, Value, WeakRuntime};
use log::{debug, error, info, trace, warn};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;

/// Which protocol accepted connections speak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    Net,
    Http,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::Net => write!(f, "net"),
            ServerKind::Http => write!(f, "http"),
        }
    }
}

pub(crate) enum Protocol {
    Raw,
    HttpServer(ServerExchange),
    HttpClient(ClientTransaction),
}

pub(crate) struct Listener {
    socket: AsyncSocket,
    kind: ServerKind,
    callback: Rc<Pinned>,
}

pub(crate) struct Connection {
    socket: AsyncSocket,
    token: Token,
    read_buffer: Vec<u8>,
    pending_writes: VecDeque<Vec<u8>>,
    /// Bytes of the front pending write already sent
    write_offset: usize,
    close_after_flush: bool,
    /// Peer sent FIN while a response was still owed
    read_closed: bool,
    protocol: Protocol,
}

/// What the dispatcher should do with a connection after servicing it
enum Disposition {
    Keep,
    Close(Option<String>),
}

enum ReadOutcome {
    Open,
    Eof,
}

impl Connection {
    fn new(socket: AsyncSocket, token: Token, protocol: Protocol) -> Self {
        Self {
            socket,
            token,
            read_buffer: Vec::new(),
            pending_writes: VecDeque::new(),
            write_offset: 0,
            close_after_flush: false,
            read_closed: false,
            protocol,
        }
    }

    pub(crate) fn client(socket: AsyncSocket, token: Token, transaction: ClientTransaction) -> Self {
        Self::new(socket, token, Protocol::HttpClient(transaction))
    }

    fn queue(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.pending_writes.push_back(bytes);
        }
    }

    /// Write queued data until done or the socket would block. Returns true
    /// when nothing is left queued.
    fn flush(&mut self) -> io::Result<bool> {
        while let Some(front) = self.pending_writes.front() {
            match self.socket.write(&front[self.write_offset..]) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "socket closed")),
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset == front.len() {
                        self.pending_writes.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Read everything available into the read buffer
    fn drain_reads(&mut self, chunk: usize) -> io::Result<ReadOutcome> {
        let mut buf = vec![0u8; chunk.max(1)];
        loop {
            match self.socket.read(&mut buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => self.read_buffer.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn on_ready(&mut self, rt: &Runtime, interest: Interest) -> Disposition {
        if let Protocol::HttpClient(transaction) = &mut self.protocol {
            if transaction.state() == super::http::ClientState::Connecting {
                match self.socket.check_connect() {
                    Ok(()) => {
                        if let Some(request) = transaction.on_connected() {
                            self.pending_writes.push_back(request);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Disposition::Keep,
                    Err(e) => return Disposition::Close(Some(e.to_string())),
                }
            }
        }

        let readable = interest.is_readable() || interest.is_hup() || interest.is_error();
        if readable && !self.read_closed {
            let outcome = match self.drain_reads(rt.config().reactor.read_chunk_size) {
                Ok(outcome) => outcome,
                Err(e) => return Disposition::Close(Some(e.to_string())),
            };
            self.consume_input(rt);
            if let ReadOutcome::Eof = outcome {
                trace!("connection {} reached EOF", self.token.0);
                if self.awaiting_response() {
                    // Half-closed peer still gets the response; end() closes
                    self.read_closed = true;
                } else {
                    if let Protocol::HttpClient(transaction) = &mut self.protocol {
                        transaction.on_eof(rt);
                    }
                    return Disposition::Close(None);
                }
            }
        }

        self.after_write_activity()
    }

    /// A server exchange whose request went to the script. The connection
    /// stays until `ServerResponse.end` flushes.
    fn awaiting_response(&self) -> bool {
        match &self.protocol {
            Protocol::HttpServer(exchange) => exchange.phase() == ExchangePhase::Dispatched,
            _ => false,
        }
    }

    /// Hand buffered input to the protocol that owns it
    fn consume_input(&mut self, rt: &Runtime) {
        if self.read_buffer.is_empty() {
            return;
        }
        match &mut self.protocol {
            Protocol::Raw => {
                trace!("connection {}: discarding {} bytes", self.token.0, self.read_buffer.len());
                self.read_buffer.clear();
            }
            Protocol::HttpServer(exchange) => {
                exchange.on_data(rt, self.token, &mut self.read_buffer);
            }
            Protocol::HttpClient(transaction) => {
                transaction.on_data(&self.read_buffer);
                self.read_buffer.clear();
            }
        }
    }

    /// Flush and decide whether the connection is finished
    fn after_write_activity(&mut self) -> Disposition {
        match self.flush() {
            Ok(true) => {
                if let Protocol::HttpClient(transaction) = &mut self.protocol {
                    transaction.on_flushed();
                }
                if self.close_after_flush {
                    Disposition::Close(None)
                } else {
                    Disposition::Keep
                }
            }
            Ok(false) => Disposition::Keep,
            Err(e) => Disposition::Close(Some(e.to_string())),
        }
    }

    /// Orderly shutdown: send FIN and discard unread input so the close
    /// does not turn into a reset.
    fn shutdown(&mut self) {
        if self.socket.shutdown_write().is_ok() {
            let _ = self.drain_reads(4096);
        }
    }
}

/// Service a readable listener: accept until the backlog is empty
pub(crate) fn accept_ready(rt: &Runtime, token: Token) {
    loop {
        let accepted = {
            let listeners = rt.inner().listeners.borrow();
            let Some(listener) = listeners.get(&token) else {
                return;
            };
            let accepted = listener
                .socket
                .accept()
                .map(|(socket, peer)| (socket, peer, listener.kind, listener.callback.clone()));
            accepted
        };

        match accepted {
            Ok((socket, peer, kind, callback)) => adopt(rt, socket, peer, kind, callback),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("accept on listener {} failed: {}", token.0, e);
                return;
            }
        }
    }
}

fn adopt(rt: &Runtime, socket: AsyncSocket, peer: SocketAddr, kind: ServerKind, callback: Rc<Pinned>) {
    let token = match rt.register(socket.fd(), Source::Connection, Interest::READABLE | Interest::WRITABLE) {
        Ok(token) => token,
        Err(e) => {
            warn!("failed to register connection from {}: {}", peer, e);
            return;
        }
    };
    debug!("{} connection {} accepted from {}", kind, token.0, peer);

    let protocol = match kind {
        ServerKind::Http => Protocol::HttpServer(ServerExchange::new(callback)),
        ServerKind::Net => {
            let handle = SocketHandle {
                runtime: rt.downgrade(),
                token,
                peer,
            };
            rt.defer(TaskId::next(), move |_| {
                callback.invoke(vec![Value::Host(HostObject::Socket(handle))]);
            });
            Protocol::Raw
        }
    };

    rt.inner()
        .connections
        .borrow_mut()
        .insert(token, Connection::new(socket, token, protocol));
}

/// Service readiness on an established or connecting socket
pub(crate) fn connection_ready(rt: &Runtime, token: Token, interest: Interest) {
    let disposition = {
        let mut connections = rt.inner().connections.borrow_mut();
        let Some(connection) = connections.get_mut(&token) else {
            return;
        };
        let disposition = connection.on_ready(rt, interest);
        disposition
    };
    if let Disposition::Close(reason) = disposition {
        rt.close_connection(token, reason);
    }
}

impl Runtime {
    /// Queue `bytes` on a connection and try to send them right away.
    /// With `close_after` the connection closes once everything is flushed.
    /// Writes to connections that no longer exist are dropped.
    pub(crate) fn queue_write(&self, token: Token, bytes: Vec<u8>, close_after: bool) {
        let disposition = {
            let mut connections = self.inner().connections.borrow_mut();
            let Some(connection) = connections.get_mut(&token) else {
                trace!("write to closed connection {} dropped", token.0);
                return;
            };
            connection.queue(bytes);
            if close_after {
                connection.close_after_flush = true;
            }
            let disposition = connection.after_write_activity();
            disposition
        };
        if let Disposition::Close(reason) = disposition {
            self.close_connection(token, reason);
        }
    }

    /// Remove a connection, fail its pending transaction and release the socket
    pub(crate) fn close_connection(&self, token: Token, reason: Option<String>) {
        let removed = self.inner().connections.borrow_mut().remove(&token);
        let Some(mut connection) = removed else {
            return;
        };
        self.deregister(token);

        match &reason {
            Some(reason) => debug!("connection {} closed: {}", token.0, reason),
            None => debug!("connection {} closed", token.0),
        }
        if !connection.pending_writes.is_empty() {
            trace!(
                "connection {}: dropping {} queued writes",
                token.0,
                connection.pending_writes.len()
            );
        }

        match &mut connection.protocol {
            Protocol::HttpClient(transaction) => transaction.on_closed(self, reason),
            Protocol::HttpServer(_) | Protocol::Raw => connection.shutdown(),
        }
    }

    /// Create a server whose accepted connections speak `kind`
    pub fn create_server(&self, kind: ServerKind, callback: super::CallbackRef) -> ServerHandle {
        ServerHandle {
            state: Rc::new(ServerState {
                runtime: self.downgrade(),
                kind,
                callback: Rc::new(self.pin(callback)),
                token: Cell::new(None),
                local_addr: Cell::new(None),
            }),
        }
    }
}

struct ServerState {
    runtime: WeakRuntime,
    kind: ServerKind,
    callback: Rc<Pinned>,
    token: Cell<Option<Token>>,
    local_addr: Cell<Option<SocketAddr>>,
}

/// Script-visible server returned by `net.createServer`/`http.createServer`
#[derive(Clone)]
pub struct ServerHandle {
    state: Rc<ServerState>,
}

impl ServerHandle {
    pub fn kind(&self) -> ServerKind {
        self.state.kind
    }

    /// Bind to the configured host on `port` (0 picks an ephemeral port)
    /// and start accepting. Returns the bound address.
    pub fn listen(&self, port: u16) -> HostResult<SocketAddr> {
        let state = &self.state;
        if state.token.get().is_some() {
            return Err(HostError::invalid("server is already listening"));
        }
        let rt = state
            .runtime
            .upgrade()
            .ok_or_else(|| HostError::invalid("runtime is gone"))?;

        let host: IpAddr = rt.config().net.bind_host.parse().map_err(|_| {
            HostError::invalid(format!("invalid bind host: {}", rt.config().net.bind_host))
        })?;
        let addr = SocketAddr::new(host, port);

        let result = AsyncSocket::listen(addr, rt.config().net.listen_backlog).and_then(|socket| {
            let local = socket.local_addr()?;
            let token = rt.register(socket.fd(), Source::Listener, Interest::READABLE)?;
            Ok((socket, local, token))
        });
        let (socket, local, token) = match result {
            Ok(bound) => bound,
            Err(e) => {
                error!("{} server failed to listen on {}: {}", state.kind, addr, e);
                return Err(HostError::Io(e));
            }
        };

        rt.inner().listeners.borrow_mut().insert(
            token,
            Listener {
                socket,
                kind: state.kind,
                callback: state.callback.clone(),
            },
        );
        state.token.set(Some(token));
        state.local_addr.set(Some(local));
        info!("{} server listening on {}", state.kind, local);
        Ok(local)
    }

    /// Stop accepting. Established connections are left alone.
    pub fn close(&self) -> bool {
        let Some(token) = self.state.token.take() else {
            return false;
        };
        self.state.local_addr.set(None);
        let Some(rt) = self.state.runtime.upgrade() else {
            return false;
        };
        let removed = rt.inner().listeners.borrow_mut().remove(&token);
        rt.deregister(token);
        if removed.is_some() {
            info!("{} server on listener {} closed", self.state.kind, token.0);
        }
        removed.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state.local_addr.get()
    }

    pub fn is_listening(&self) -> bool {
        self.state.token.get().is_some()
    }
}

impl PartialEq for ServerHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("kind", &self.state.kind)
            .field("local_addr", &self.state.local_addr.get())
            .finish()
    }
}

/// Script-visible accepted `net` socket
#[derive(Clone)]
pub struct SocketHandle {
    runtime: WeakRuntime,
    token: Token,
    peer: SocketAddr,
}

impl SocketHandle {
    /// Queue `data` for sending. Writes after close are dropped.
    pub fn write(&self, data: &[u8]) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.queue_write(self.token, data.to_vec(), false);
        }
    }

    /// Close once queued writes are flushed
    pub fn end(&self) {
        if let Some(rt) = self.runtime.upgrade() {
            rt.queue_write(self.token, Vec::new(), true);
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        match self.runtime.upgrade() {
            Some(rt) => {
                let open = rt.inner().connections.borrow().contains_key(&self.token);
                open
            }
            None => false,
        }
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("connection", &self.token.0)
            .field("peer", &self.peer)
            .finish()
    }
}
