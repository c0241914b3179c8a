// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The direct-HTTP transport, for running the gateway without a front-end
//! web server. Each HTTP request is translated into the same published
//! request shape the FastCGI transport produces, with a synthesized CGI
//! environment, so the application cannot tell the transports apart. The
//! response sink parses the CGI-style response head back into an HTTP
//! status and headers, exactly as a front-end web server would.

use crate::transport::Transport;
use crate::Signal;

use crossbeam_channel::{Receiver, Sender};
use logger::*;
use protocol_fastcgi::Role;
use session::{ReadyRequest, Request, ResponseSink, ResponseWriter};

use std::io::{Cursor, Error, ErrorKind, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct HttpTransport {
    server: Arc<tiny_http::Server>,
    publish_tx: Sender<ReadyRequest>,
    signal_rx: Receiver<Signal>,
    finished: Arc<AtomicBool>,
    next_request_id: u16,
}

impl HttpTransport {
    pub fn new(
        port: u16,
        publish_tx: Sender<ReadyRequest>,
        signal_rx: Receiver<Signal>,
    ) -> Result<Self> {
        let server = tiny_http::Server::http(("0.0.0.0", port))
            .map_err(|e| Error::new(ErrorKind::AddrInUse, e.to_string()))?;

        Ok(Self {
            server: Arc::new(server),
            publish_tx,
            signal_rx,
            finished: Arc::new(AtomicBool::new(false)),
            next_request_id: 0,
        })
    }

    /// A handle the process uses to break the blocking receive loop.
    pub fn server(&self) -> Arc<tiny_http::Server> {
        self.server.clone()
    }

    pub fn finished(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }

    fn next_request_id(&mut self) -> u16 {
        // id 0 addresses the connection in the record protocol; skip it so
        // the synthesized ids look like the real thing
        self.next_request_id = self.next_request_id.wrapping_add(1);
        if self.next_request_id == 0 {
            self.next_request_id = 1;
        }
        self.next_request_id
    }

    fn dispatch(&mut self, mut http_request: tiny_http::Request) {
        let request_id = self.next_request_id();
        let mut request = Request::new(request_id, Role::Responder, false);

        let url = http_request.url().to_string();
        let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));

        request.add_param("REQUEST_METHOD".into(), http_request.method().to_string());
        request.add_param("REQUEST_URI".into(), url.clone());
        request.add_param("SCRIPT_NAME".into(), path.to_string());
        request.add_param("QUERY_STRING".into(), query.to_string());
        request.add_param(
            "SERVER_PROTOCOL".into(),
            format!("HTTP/{}", http_request.http_version()),
        );
        request.add_param("SERVER_SOFTWARE".into(), "fastcgi-gateway".into());
        if let Some(addr) = http_request.remote_addr() {
            request.add_param("REMOTE_ADDR".into(), addr.ip().to_string());
            request.add_param("REMOTE_PORT".into(), addr.port().to_string());
        }

        for header in http_request.headers() {
            let name = header.field.as_str().as_str();
            let value = header.value.as_str().to_string();
            match cgi_meta_name(name) {
                MetaName::ContentType => request.add_param("CONTENT_TYPE".into(), value),
                MetaName::ContentLength => request.add_param("CONTENT_LENGTH".into(), value),
                MetaName::Http(name) => request.add_param(name, value),
            }
        }

        let mut body = Vec::new();
        if let Err(e) = std::io::copy(http_request.as_reader(), &mut body) {
            warn!("failed to read http request body: {}", e);
            let _ = http_request.respond(tiny_http::Response::empty(400));
            return;
        }
        request.append_content(&body);
        request.set_params_complete();
        request.set_content_complete();

        let sink = HttpSink {
            responder: Some(http_request),
            buffer: Vec::new(),
        };
        let ready = ReadyRequest {
            request,
            response: ResponseWriter::new(Box::new(sink)),
        };
        if self.publish_tx.send(ready).is_err() {
            warn!("worker queue is gone; dropping request");
        }
    }
}

impl Transport for HttpTransport {
    fn run(&mut self) {
        info!("http transport running");

        loop {
            match self.server.recv() {
                Ok(http_request) => self.dispatch(http_request),
                Err(e) => {
                    // recv is broken by unblock() on shutdown
                    if self.signal_rx.try_recv() == Ok(Signal::Shutdown) {
                        break;
                    }
                    warn!("http receive failed: {}", e);
                }
            }

            if self.signal_rx.try_recv() == Ok(Signal::Shutdown) {
                break;
            }
        }

        info!("http transport shutting down");
        self.finished.store(true, Ordering::Release);
    }
}

enum MetaName {
    ContentType,
    ContentLength,
    Http(String),
}

/// Maps an HTTP header name to its CGI meta-variable name.
fn cgi_meta_name(name: &str) -> MetaName {
    if name.eq_ignore_ascii_case("content-type") {
        MetaName::ContentType
    } else if name.eq_ignore_ascii_case("content-length") {
        MetaName::ContentLength
    } else {
        let mut meta = String::with_capacity(5 + name.len());
        meta.push_str("HTTP_");
        for c in name.chars() {
            if c == '-' {
                meta.push('_');
            } else {
                meta.push(c.to_ascii_uppercase());
            }
        }
        MetaName::Http(meta)
    }
}

/// Buffers the response byte stream, then on finish splits the CGI-style
/// head from the body and answers the HTTP request.
struct HttpSink {
    responder: Option<tiny_http::Request>,
    buffer: Vec<u8>,
}

impl HttpSink {
    fn respond(&mut self) -> Result<()> {
        let Some(responder) = self.responder.take() else {
            return Ok(());
        };

        let split = self
            .buffer
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|at| at + 4)
            .unwrap_or(self.buffer.len());
        let (head, body) = self.buffer.split_at(split);

        let mut status = 200;
        let mut headers = Vec::new();
        for line in head.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            let name = &line[..colon];
            let value = line[colon + 1..]
                .strip_prefix(b" ")
                .unwrap_or(&line[colon + 1..]);

            if name.eq_ignore_ascii_case(b"status") {
                // "Status: 404 Not Found" pseudo-header selects the code
                let digits: Vec<u8> = value
                    .iter()
                    .copied()
                    .take_while(u8::is_ascii_digit)
                    .collect();
                if let Ok(code) = String::from_utf8_lossy(&digits).parse::<u16>() {
                    status = code;
                }
            } else if let Ok(header) = tiny_http::Header::from_bytes(name, value) {
                headers.push(header);
            }
        }

        let response = tiny_http::Response::new(
            tiny_http::StatusCode(status),
            headers,
            Cursor::new(body.to_vec()),
            Some(body.len()),
            None,
        );
        responder
            .respond(response)
            .map_err(|e| Error::new(ErrorKind::BrokenPipe, e))
    }
}

impl ResponseSink for HttpSink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.responder.is_none() {
            return Err(Error::new(
                ErrorKind::BrokenPipe,
                "http response was already sent",
            ));
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self, _app_status: u32) -> Result<()> {
        self.respond()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_names_map_to_cgi_meta_variables() {
        assert!(matches!(cgi_meta_name("Content-Type"), MetaName::ContentType));
        assert!(matches!(
            cgi_meta_name("content-length"),
            MetaName::ContentLength
        ));
        match cgi_meta_name("Accept-Encoding") {
            MetaName::Http(name) => assert_eq!(name, "HTTP_ACCEPT_ENCODING"),
            _ => panic!("expected HTTP_ mapping"),
        }
    }
}
