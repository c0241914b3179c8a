// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The seam between the process and the transport implementations. A
//! transport owns its listening socket and connections, publishes completed
//! requests to the worker queue, and runs until told to shut down. The
//! process interacts with it only through this trait and its handle.

use crate::http::HttpTransport;
use crate::native::NativeTransport;
use crate::Signal;

use config::{Backend, FastcgiConfig, ServerConfig};
use crossbeam_channel::{Receiver, Sender};
use session::ReadyRequest;

use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A request transport. `run` blocks on the calling thread until a shutdown
/// signal is delivered.
pub trait Transport: Send {
    fn run(&mut self);
}

/// Observes and pokes a running transport from other threads.
#[derive(Clone)]
pub struct TransportHandle {
    finished: Arc<AtomicBool>,
    waker: Arc<dyn Fn() + Send + Sync>,
}

impl TransportHandle {
    /// True once the transport's event loop has returned.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Interrupts the transport's wait so it notices pending work or a
    /// shutdown signal.
    pub fn wake(&self) {
        (self.waker)()
    }
}

/// The transport backend identifiers this build supports.
pub fn supported_backends() -> &'static [&'static str] {
    &["fastcgi-unix", "fastcgi-tcp", "http"]
}

/// Constructs the configured transport. Backend selection is a startup
/// decision; an unusable selection fails here.
pub fn transport<T: ServerConfig + FastcgiConfig>(
    config: &T,
    publish_tx: Sender<ReadyRequest>,
    signal_rx: Receiver<Signal>,
) -> Result<(Box<dyn Transport>, TransportHandle)> {
    let backend = config
        .server()
        .backend()
        .map_err(|e| Error::new(ErrorKind::InvalidInput, e.to_string()))?;

    match backend {
        Backend::FastcgiUnix | Backend::FastcgiTcp { .. } => {
            let transport = NativeTransport::new(config, backend, publish_tx, signal_rx)?;
            let waker = transport.waker();
            let handle = TransportHandle {
                finished: transport.finished(),
                waker: Arc::new(move || {
                    let _ = waker.wake();
                }),
            };
            Ok((Box::new(transport), handle))
        }
        Backend::Http { port } => {
            let transport = HttpTransport::new(port, publish_tx, signal_rx)?;
            let server = transport.server();
            let handle = TransportHandle {
                finished: transport.finished(),
                waker: Arc::new(move || server.unblock()),
            };
            Ok((Box::new(transport), handle))
        }
    }
}
