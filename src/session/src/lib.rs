// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The request model shared by all transports: a [`Request`] accumulates one
//! logical request's parameters, query data, and body bytes as they are
//! reassembled from the wire, and a published request is handed to the
//! application as a read-only body view plus a write-only response view.

mod request;
mod stream;

pub use request::*;
pub use stream::*;

/// A fully reassembled request as delivered to the application: the request
/// data and the response stream writing back through the owning transport.
pub struct ReadyRequest {
    pub request: Request,
    pub response: ResponseWriter,
}
