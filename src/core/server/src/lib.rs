// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The core threads of the gateway: a transport event loop that owns the
//! listening socket and its connections, and a pool of worker threads that
//! run the application handler over published requests. Transports hand
//! completed requests to the workers over a bounded queue; response bytes
//! travel back to the owning transport through each request's response sink.

mod demux;
mod http;
mod native;
mod process;
mod transport;
mod workers;

pub use demux::{Demux, Limits, Published};
pub use process::{Process, ProcessBuilder};
pub use transport::{supported_backends, transport, Transport, TransportHandle};
pub use workers::WorkersBuilder;

pub use session::{BodyReader, ReadyRequest, Request, ResponseWriter, StreamError};

use metriken::*;

use std::io::Result;

/// Capacity of the bounded queues between the transport and worker threads.
pub const QUEUE_CAPACITY: usize = 1024;

const THREAD_PREFIX: &str = "gw";

#[metric(name = "request", description = "requests dispatched to the handler")]
pub static REQUEST: Counter = Counter::new();

#[metric(
    name = "request_ex",
    description = "requests for which the handler returned an error"
)]
pub static REQUEST_EX: Counter = Counter::new();

#[metric(
    name = "request_abort",
    description = "requests aborted by the peer before completion"
)]
pub static REQUEST_ABORT: Counter = Counter::new();

/// Control messages delivered to the transport thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

/// The application seam: one call per published request, on a worker thread.
/// The response stream is finalized after the call returns, so handlers may
/// stream a body or simply set headers and return.
pub trait Handle: Send + Sync {
    fn handle(&self, request: &Request, response: &mut ResponseWriter) -> Result<()>;
}
