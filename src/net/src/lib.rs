// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Networking for the gateway's non-blocking event loops: ownership of the
//! one listening descriptor (TCP or the supervisor-provided unix-domain
//! socket), advisory locking around accept so sibling worker processes can
//! share that descriptor, and the accepted-connection [`Stream`].

mod listener;
mod stream;

pub use listener::*;
pub use stream::*;

pub mod event {
    pub use mio::event::*;
}

pub use mio::*;

use metriken::*;

// stats

#[metric(
    name = "tcp_accept",
    description = "number of TCP streams passively opened with accept"
)]
pub static TCP_ACCEPT: Counter = Counter::new();

#[metric(name = "stream_accept", description = "number of calls to accept")]
pub static STREAM_ACCEPT: Counter = Counter::new();

#[metric(
    name = "stream_accept_ex",
    description = "number of times calling accept resulted in an exception"
)]
pub static STREAM_ACCEPT_EX: Counter = Counter::new();

#[metric(name = "stream_close", description = "number of streams closed")]
pub static STREAM_CLOSE: Counter = Counter::new();
