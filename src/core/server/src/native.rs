// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The native FastCGI transport: a single-threaded mio event loop that owns
//! the listening socket and every accepted connection. Each connection gets
//! its own demultiplexer; completed requests are published to the worker
//! queue with a sink that routes response bytes back here over a bounded
//! channel, since only this thread may touch the sockets.

use crate::demux::{Demux, Limits, Published};
use crate::transport::Transport;
use crate::{Signal, QUEUE_CAPACITY};

use bytes::{Buf, BytesMut};
use config::{Backend, FastcgiConfig, ServerConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use gateway_net::{Events, Interest, Listener, Poll, Stream, Token, Waker};
use logger::*;
use session::{ReadyRequest, ResponseSink, ResponseWriter};
use slab::Slab;

use std::collections::{HashMap, VecDeque};
use std::io::{Error, ErrorKind, Read, Result, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LISTENER_TOKEN: Token = Token(usize::MAX - 1);
const WAKER_TOKEN: Token = Token(usize::MAX);

const TIMEOUT: Duration = Duration::from_millis(100);
const NEVENT: usize = 1024;
const READ_CHUNK: usize = 16384;

/// Once a connection's outbound buffer holds this much, response ops for it
/// are held back until the socket catches up. The ops channel is bounded, so
/// a held op stalls the workers writing into it rather than growing the
/// buffer without limit.
const WRITE_HIWAT: usize = 256 * 1024;

/// A response-path operation, sent from a worker thread back to the event
/// loop that owns the connection. The connection id guards against delivery
/// to a slab slot that was reused after a disconnect.
enum ResponseOp {
    Write {
        conn_id: u64,
        request_id: u16,
        data: Vec<u8>,
    },
    End {
        conn_id: u64,
        request_id: u16,
        app_status: u32,
    },
}

impl ResponseOp {
    fn conn_id(&self) -> u64 {
        match self {
            Self::Write { conn_id, .. } | Self::End { conn_id, .. } => *conn_id,
        }
    }
}

struct Connection {
    id: u64,
    stream: Stream,
    demux: Demux,
    wbuf: BytesMut,
    /// Close once the outbound buffer drains.
    closing: bool,
    write_interest: bool,
}

pub struct NativeTransport {
    poll: Poll,
    listener: Listener,
    connections: Slab<Connection>,
    conn_index: HashMap<u64, usize>,
    next_conn_id: u64,
    limits: Limits,
    publish_tx: Sender<ReadyRequest>,
    ops_tx: Sender<ResponseOp>,
    ops_rx: Receiver<ResponseOp>,
    signal_rx: Receiver<Signal>,
    waker: Arc<Waker>,
    finished: Arc<AtomicBool>,
    /// Completed requests the worker queue could not take yet.
    backlog: VecDeque<ReadyRequest>,
    /// A response op held back because its connection is over the write
    /// high-water mark. At most one; holding it pauses the ops drain.
    held_op: Option<ResponseOp>,
}

impl NativeTransport {
    pub fn new<T: ServerConfig + FastcgiConfig>(
        config: &T,
        backend: Backend,
        publish_tx: Sender<ReadyRequest>,
        signal_rx: Receiver<Signal>,
    ) -> Result<Self> {
        let mut listener = match backend {
            Backend::FastcgiUnix => Listener::from_listensock()?,
            Backend::FastcgiTcp { port } => {
                Listener::tcp(config.server().host(), port, config.server().backlog())?
            }
            Backend::Http { .. } => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "http backend is not a fastcgi transport",
                ));
            }
        };

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let (ops_tx, ops_rx) = bounded(QUEUE_CAPACITY);

        Ok(Self {
            poll,
            listener,
            connections: Slab::new(),
            conn_index: HashMap::new(),
            next_conn_id: 0,
            limits: Limits::new(config),
            publish_tx,
            ops_tx,
            ops_rx,
            signal_rx,
            waker,
            finished: Arc::new(AtomicBool::new(false)),
            backlog: VecDeque::new(),
            held_op: None,
        })
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub fn finished(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some(stream)) => {
                    if let Err(e) = self.add_connection(stream) {
                        error!("failed to register accepted connection: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn add_connection(&mut self, mut stream: Stream) -> Result<()> {
        let id = self.next_conn_id;
        self.next_conn_id += 1;

        let entry = self.connections.vacant_entry();
        let key = entry.key();
        self.poll
            .registry()
            .register(&mut stream, Token(key), Interest::READABLE)?;

        entry.insert(Connection {
            id,
            stream,
            demux: Demux::new(self.limits),
            wbuf: BytesMut::new(),
            closing: false,
            write_interest: false,
        });
        self.conn_index.insert(id, key);
        Ok(())
    }

    fn close_connection(&mut self, key: usize) {
        if let Some(mut conn) = self.connections.try_remove(key) {
            conn.demux.disconnect();
            let _ = self.poll.registry().deregister(&mut conn.stream);
            self.conn_index.remove(&conn.id);
        }
    }

    /// Drains readable bytes into the connection's demultiplexer and
    /// publishes any requests that completed.
    fn readable(&mut self, key: usize) {
        let mut close = false;
        let mut published: Vec<(u64, Published)> = Vec::new();

        if let Some(conn) = self.connections.get_mut(key) {
            let mut buf = [0u8; READ_CHUNK];
            loop {
                match conn.stream.read(&mut buf) {
                    Ok(0) => {
                        close = true;
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = conn.demux.receive(&buf[..n]) {
                            warn!("closing connection: {}", e);
                            close = true;
                            break;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("read error: {}", e);
                        close = true;
                        break;
                    }
                }
            }

            while let Some(p) = conn.demux.next_published() {
                published.push((conn.id, p));
            }
        } else {
            return;
        }

        for (conn_id, p) in published {
            self.publish(conn_id, p);
        }

        if close {
            self.close_connection(key);
        } else {
            self.flush(key);
        }
    }

    fn publish(&mut self, conn_id: u64, published: Published) {
        let sink = NativeSink {
            conn_id,
            request_id: published.request.request_id(),
            aborted: published.aborted,
            ops: self.ops_tx.clone(),
            waker: self.waker.clone(),
        };
        let ready = ReadyRequest {
            request: published.request,
            response: ResponseWriter::new(Box::new(sink)),
        };

        self.backlog.push_back(ready);
        self.drain_backlog();
    }

    /// Hands backlogged requests to the worker queue without ever blocking.
    /// This thread is the sole drainer of the response ops channel, and the
    /// workers it would wait for may themselves be waiting on that channel;
    /// blocking here wedges both sides. The remainder is retried on every
    /// loop iteration.
    fn drain_backlog(&mut self) {
        while let Some(ready) = self.backlog.pop_front() {
            match self.publish_tx.try_send(ready) {
                Ok(()) => {}
                Err(TrySendError::Full(ready)) => {
                    self.backlog.push_front(ready);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("worker queue is gone; dropping request");
                }
            }
        }
    }

    /// Moves pending outbound records to the socket. Registers write
    /// interest when the socket cannot take everything, and closes the
    /// connection once a final response has fully drained.
    fn flush(&mut self, key: usize) {
        let mut close = false;

        if let Some(conn) = self.connections.get_mut(key) {
            let outbound = conn.demux.outbound();
            if !outbound.is_empty() {
                let pending = outbound.split();
                conn.wbuf.extend_from_slice(&pending);
            }

            while !conn.wbuf.is_empty() {
                match conn.stream.write(&conn.wbuf) {
                    Ok(0) => {
                        close = true;
                        break;
                    }
                    Ok(n) => {
                        conn.wbuf.advance(n);
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("write error: {}", e);
                        close = true;
                        break;
                    }
                }
            }

            if !close {
                if conn.wbuf.is_empty() {
                    if conn.closing {
                        close = true;
                    } else if conn.write_interest {
                        conn.write_interest = false;
                        let _ = self.poll.registry().reregister(
                            &mut conn.stream,
                            Token(key),
                            Interest::READABLE,
                        );
                    }
                } else if !conn.write_interest {
                    conn.write_interest = true;
                    let _ = self.poll.registry().reregister(
                        &mut conn.stream,
                        Token(key),
                        Interest::READABLE | Interest::WRITABLE,
                    );
                }
            }
        }

        if close {
            self.close_connection(key);
        }
    }

    /// Applies one response op, or hands it back when the target connection
    /// is over the write high-water mark and the socket has not caught up. A
    /// held op pauses the ops drain, and a full ops channel blocks the
    /// workers, so a slow peer stalls its writer instead of growing the
    /// outbound buffer without bound.
    fn response_op(&mut self, op: ResponseOp) -> Option<ResponseOp> {
        let Some(&key) = self.conn_index.get(&op.conn_id()) else {
            // connection already closed; the abort flag tells the writer on
            // its next write
            return None;
        };

        if self.over_hiwat(key) {
            self.flush(key);
            if self.over_hiwat(key) {
                return Some(op);
            }
            if !self.conn_index.contains_key(&op.conn_id()) {
                // the flush closed it
                return None;
            }
        }

        match op {
            ResponseOp::Write {
                request_id, data, ..
            } => {
                if let Some(conn) = self.connections.get_mut(key) {
                    conn.demux.write_stdout(request_id, &data);
                }
            }
            ResponseOp::End {
                request_id,
                app_status,
                ..
            } => {
                if let Some(conn) = self.connections.get_mut(key) {
                    if conn.demux.end_request(request_id, app_status) {
                        conn.closing = true;
                    }
                }
            }
        }
        self.flush(key);
        None
    }

    fn over_hiwat(&self, key: usize) -> bool {
        self.connections
            .get(key)
            .map(|conn| conn.wbuf.len() > WRITE_HIWAT)
            .unwrap_or(false)
    }
}

impl Transport for NativeTransport {
    fn run(&mut self) {
        info!("fastcgi transport running");
        let mut events = Events::with_capacity(NEVENT);

        'run: loop {
            if let Err(e) = self.poll.poll(&mut events, Some(TIMEOUT)) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                fatal!("transport poll failed: {}", e);
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept(),
                    WAKER_TOKEN => {
                        // channels are drained below
                    }
                    token => {
                        if event.is_readable() {
                            self.readable(token.0);
                        }
                        if event.is_writable() {
                            self.flush(token.0);
                        }
                    }
                }
            }

            // a held op pauses the drain until its connection's socket
            // catches up
            if let Some(op) = self.held_op.take() {
                self.held_op = self.response_op(op);
            }
            while self.held_op.is_none() {
                match self.ops_rx.try_recv() {
                    Ok(op) => self.held_op = self.response_op(op),
                    Err(_) => break,
                }
            }

            self.drain_backlog();

            while let Ok(signal) = self.signal_rx.try_recv() {
                match signal {
                    Signal::Shutdown => {
                        info!("fastcgi transport shutting down");
                        break 'run;
                    }
                }
            }
        }

        self.finished.store(true, Ordering::Release);
    }
}

/// Routes response bytes for one published request back to the event loop
/// that owns its connection.
struct NativeSink {
    conn_id: u64,
    request_id: u16,
    aborted: Arc<AtomicBool>,
    ops: Sender<ResponseOp>,
    waker: Arc<Waker>,
}

impl ResponseSink for NativeSink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(Error::new(
                ErrorKind::BrokenPipe,
                "request was aborted by the peer",
            ));
        }

        self.ops
            .send(ResponseOp::Write {
                conn_id: self.conn_id,
                request_id: self.request_id,
                data: data.to_vec(),
            })
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "transport has stopped"))?;
        self.waker.wake()
    }

    fn finish(&mut self, app_status: u32) -> Result<()> {
        if self.aborted.load(Ordering::Acquire) {
            // nothing to deliver; the request slot is already gone
            return Ok(());
        }

        self.ops
            .send(ResponseOp::End {
                conn_id: self.conn_id,
                request_id: self.request_id,
                app_status,
            })
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "transport has stopped"))?;
        self.waker.wake()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_fastcgi::Role;
    use session::Request;

    fn transport(publish_capacity: usize) -> (NativeTransport, Receiver<ReadyRequest>, u16) {
        // port 0 requests an ephemeral port; the public constructor rejects
        // it by design, so bind via std here
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = std_listener.local_addr().unwrap().port();
        std_listener.set_nonblocking(true).unwrap();
        let mut listener = Listener::Tcp(gateway_net::net::TcpListener::from_std(std_listener));

        let poll = Poll::new().unwrap();
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).unwrap());

        let (publish_tx, publish_rx) = bounded(publish_capacity);
        let (ops_tx, ops_rx) = bounded(QUEUE_CAPACITY);
        // no signals are delivered in these tests
        let (_signal_tx, signal_rx) = bounded(1);

        let transport = NativeTransport {
            poll,
            listener,
            connections: Slab::new(),
            conn_index: HashMap::new(),
            next_conn_id: 0,
            limits: Limits::default(),
            publish_tx,
            ops_tx,
            ops_rx,
            signal_rx,
            waker,
            finished: Arc::new(AtomicBool::new(false)),
            backlog: VecDeque::new(),
            held_op: None,
        };
        (transport, publish_rx, port)
    }

    fn published(request_id: u16) -> Published {
        Published {
            request: Request::new(request_id, Role::Responder, true),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn full_worker_queue_never_blocks_the_event_loop() {
        let (mut transport, publish_rx, _port) = transport(1);

        // returns immediately even though the queue only holds one
        for id in 1..=3 {
            transport.publish(7, published(id));
        }
        assert_eq!(publish_rx.len(), 1);
        assert_eq!(transport.backlog.len(), 2);

        // as workers drain the queue, the backlog follows
        publish_rx.recv().unwrap();
        transport.drain_backlog();
        assert_eq!(publish_rx.len(), 1);
        assert_eq!(transport.backlog.len(), 1);
    }

    #[test]
    fn response_ops_hold_while_a_connection_is_backlogged() {
        let (mut transport, _publish_rx, port) = transport(QUEUE_CAPACITY);

        let mut client = std::net::TcpStream::connect(("127.0.0.1", port)).expect("connect");
        let mut accepted = false;
        for _ in 0..100 {
            transport.accept();
            if !transport.connections.is_empty() {
                accepted = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(accepted);

        let key = *transport.conn_index.values().next().unwrap();
        let conn_id = transport.connections.get(key).unwrap().id;

        // far more than the socket buffers can absorb while the peer reads
        // nothing
        transport
            .connections
            .get_mut(key)
            .unwrap()
            .wbuf
            .extend_from_slice(&vec![0u8; 32 * 1024 * 1024]);

        let held = transport.response_op(ResponseOp::Write {
            conn_id,
            request_id: 1,
            data: vec![1],
        });
        assert!(held.is_some());

        // once the peer drains the backlog, the held op applies
        client
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let mut buf = [0u8; 65536];
        for _ in 0..10_000 {
            transport.flush(key);
            if !transport.over_hiwat(key) {
                break;
            }
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => panic!("client read failed: {}", e),
            }
        }
        assert!(!transport.over_hiwat(key));
        assert!(transport.response_op(held.unwrap()).is_none());
    }
}
