// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use bytes::Bytes;
use thiserror::Error;

use std::io::{Error, ErrorKind, Read, Result, Write};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Setting a header after the first body write is a programming error;
    /// the request continues.
    #[error("response headers were already sent")]
    HeadersAlreadySent,
}

/// The seam between the response view and the transport that owns the
/// request: body bytes flow in through `write_all`, and `finish` triggers
/// the transport's end-of-request sequence.
pub trait ResponseSink: Send {
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
    fn finish(&mut self, app_status: u32) -> Result<()>;
}

/// Read-only view over a request body. Reads drain the body bytes; once
/// exhausted, reads report `WouldBlock` until the body-complete marker has
/// been observed, after which they report end-of-stream.
pub struct BodyReader {
    content: Bytes,
    complete: bool,
}

impl BodyReader {
    pub fn new(content: Bytes, complete: bool) -> Self {
        Self { content, complete }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.content.is_empty() {
            if self.complete {
                return Ok(0);
            }
            return Err(Error::new(ErrorKind::WouldBlock, "no body bytes available yet"));
        }

        let len = std::cmp::min(buf.len(), self.content.len());
        buf[..len].copy_from_slice(&self.content.split_to(len));
        Ok(len)
    }
}

/// Write-only response view. Headers are buffered, case-preserving and in
/// insertion order, until the first write of body bytes or close; they are
/// then serialized as `Name: Value\r\n` lines followed by a blank line, with
/// the body bytes following in the same sink write.
pub struct ResponseWriter {
    headers: Vec<(String, String)>,
    headers_sent: bool,
    finished: bool,
    sink: Box<dyn ResponseSink>,
}

impl ResponseWriter {
    pub fn new(sink: Box<dyn ResponseSink>) -> Self {
        Self {
            headers: Vec::new(),
            headers_sent: false,
            finished: false,
            sink,
        }
    }

    /// Sets a header, replacing any previous value for the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> std::result::Result<(), StreamError> {
        if self.headers_sent {
            return Err(StreamError::HeadersAlreadySent);
        }
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    /// Adds a header, keeping any previous values for the same name.
    pub fn add_header(&mut self, name: &str, value: &str) -> std::result::Result<(), StreamError> {
        if self.headers_sent {
            return Err(StreamError::HeadersAlreadySent);
        }
        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn serialize_headers(&self) -> Vec<u8> {
        let mut head = Vec::new();
        for (name, value) in &self.headers {
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    /// Closes the stream, emitting the header block if no body was written,
    /// and triggers the transport's end-of-request sequence.
    pub fn finish(&mut self, app_status: u32) -> Result<()> {
        if self.finished {
            return Ok(());
        }

        if !self.headers_sent {
            self.headers_sent = true;
            let head = self.serialize_headers();
            self.sink.write_all(&head)?;
        }

        self.finished = true;
        self.sink.finish(app_status)
    }
}

impl Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.finished {
            return Err(Error::new(ErrorKind::BrokenPipe, "response stream is closed"));
        }

        if self.headers_sent {
            self.sink.write_all(buf)?;
        } else {
            self.headers_sent = true;
            let mut head = self.serialize_headers();
            head.extend_from_slice(buf);
            self.sink.write_all(&head)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish(0);
        }
    }
}
