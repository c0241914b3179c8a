// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A FastCGI application gateway: it sits behind a front-end web server
//! speaking the FastCGI record protocol (or, for development, serves HTTP
//! directly) and runs an application handler over fully reassembled
//! requests. This library crate wires the configured transport, the worker
//! pool, and the cache backend into a running process.

use config::GatewayConfig;
use entrystore::{cache, CacheBackend, CacheEntry};
use logger::*;
use server::{Handle, Process, ProcessBuilder, Request, ResponseWriter};

use std::io::Write;
use std::sync::Arc;

/// This structure represents a running `Gateway` process.
pub struct Gateway {
    process: Process,
}

impl Gateway {
    /// Creates a new [Gateway] process from the given [GatewayConfig].
    pub fn new(config: GatewayConfig) -> Result<Self, std::io::Error> {
        // initialize logging
        let log_drain = configure_logging(&config);

        // initialize the cache backend
        let cache = cache(&config)?;

        // initialize the handler
        let handler = Arc::new(EchoHandler::new(cache));

        // initialize process
        let process_builder = ProcessBuilder::new(&config, log_drain, handler)?;

        // spawn threads
        let process = process_builder.spawn();

        Ok(Self { process })
    }

    /// Wait for all threads to complete. Blocks until the process has fully
    /// terminated. Under normal conditions, this will block indefinitely.
    pub fn wait(self) {
        self.process.wait()
    }

    /// Triggers a shutdown of the process and blocks until the process has
    /// fully terminated. This is more likely to be used for running
    /// integration tests or other automated testing.
    pub fn shutdown(self) {
        self.process.shutdown()
    }
}

/// The default application handler: a text/plain reflection of the request
/// line. GET responses are memoized through the cache backend, keyed by the
/// request URI.
pub struct EchoHandler {
    cache: Box<dyn CacheBackend>,
}

impl EchoHandler {
    pub fn new(cache: Box<dyn CacheBackend>) -> Self {
        Self { cache }
    }

    fn render(&self, request: &Request) -> Vec<u8> {
        let mut body = Vec::new();
        let _ = writeln!(
            body,
            "method: {}",
            request.param("REQUEST_METHOD").unwrap_or("-")
        );
        let _ = writeln!(
            body,
            "uri: {}",
            request.param("REQUEST_URI").unwrap_or("-")
        );

        let mut names: Vec<&String> = request.get_data().keys().collect();
        names.sort();
        for name in names {
            let _ = writeln!(body, "query {}: {}", name, request.get_value(name).unwrap_or("-"));
        }

        if !request.content().is_empty() {
            let _ = writeln!(body, "body bytes: {}", request.content().len());
        }
        body
    }
}

impl Handle for EchoHandler {
    fn handle(&self, request: &Request, response: &mut ResponseWriter) -> std::io::Result<()> {
        let method = request.param("REQUEST_METHOD").unwrap_or("GET");

        let body = if method == "GET" {
            let key = request.param("REQUEST_URI").unwrap_or("/").to_string();
            match self.cache.value(&key) {
                Some(entry) => {
                    debug!("cache hit for {}", key);
                    entry.data().to_vec()
                }
                None => {
                    let body = self.render(request);
                    self.cache
                        .set_value(&key, CacheEntry::now(body.clone().into()));
                    body
                }
            }
        } else {
            self.render(request)
        };

        let _ = response.set_header("Content-Type", "text/plain");
        let _ = response.set_header("Content-Length", &body.len().to_string());
        response.write_all(&body)
    }
}
