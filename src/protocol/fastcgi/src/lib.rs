// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Wire-level types and codecs for the FastCGI record protocol: the fixed
//! 8-byte record header, the record bodies with a defined layout, and the
//! length-prefixed name/value pair encoding used for parameter streams.
//!
//! Parsers are written against possibly-short buffers: they signal when more
//! bytes are needed instead of failing, so callers can buffer partial records
//! and retry on the next read.

mod nvpair;
mod record;

pub use nvpair::*;
pub use record::*;

use thiserror::Error;

/// The only protocol version this implementation speaks.
pub const VERSION_1: u8 = 1;

/// A record header is always exactly this many bytes.
pub const HEADER_LEN: usize = 8;

/// Hard limit on record payload size, from the u16 contentLength field.
pub const MAX_CONTENT_LEN: usize = 65535;

/// Largest payload the framing helpers place in a single record. Chosen so
/// that header + payload is already a multiple of 8 and no padding is needed
/// for full frames.
pub const MAX_FRAME_LEN: usize = 65528;

/// Records with requestId 0 are addressed to the connection itself.
pub const MANAGEMENT_ID: u16 = 0;

/// BeginRequest flag: keep the connection open after the request completes.
pub const KEEP_CONN: u8 = 1;

/// Recognized GetValues parameter names.
pub const MAX_CONNS: &[u8] = b"FCGI_MAX_CONNS";
pub const MAX_REQS: &[u8] = b"FCGI_MAX_REQS";
pub const MPXS_CONNS: &[u8] = b"FCGI_MPXS_CONNS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peer sent a record with a version we do not speak. The connection
    /// carrying it must be closed.
    #[error("malformed record header: unsupported version {0}")]
    MalformedHeader(u8),
}
