// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The worker pool: threads that take published requests off the queue, run
//! the application handler, and finalize the response stream. Workers exit
//! when the publishing side of the queue is gone.

use crate::{Handle, THREAD_PREFIX, REQUEST, REQUEST_EX};

use config::WorkerConfig;
use crossbeam_channel::Receiver;
use logger::*;
use session::ReadyRequest;

use std::sync::Arc;
use std::thread::JoinHandle;

pub struct WorkersBuilder {
    threads: usize,
}

impl WorkersBuilder {
    pub fn new<T: WorkerConfig>(config: &T) -> Self {
        Self {
            threads: config.worker().threads(),
        }
    }

    pub fn spawn(
        self,
        handler: Arc<dyn Handle>,
        queue: Receiver<ReadyRequest>,
    ) -> Vec<JoinHandle<()>> {
        (0..self.threads)
            .map(|id| {
                let handler = handler.clone();
                let queue = queue.clone();
                std::thread::Builder::new()
                    .name(format!("{}_worker_{}", THREAD_PREFIX, id))
                    .spawn(move || worker(handler, queue))
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }
}

fn worker(handler: Arc<dyn Handle>, queue: Receiver<ReadyRequest>) {
    while let Ok(ReadyRequest {
        request,
        mut response,
    }) = queue.recv()
    {
        REQUEST.increment();
        match handler.handle(&request, &mut response) {
            Ok(()) => {
                if let Err(e) = response.finish(0) {
                    debug!("response stream closed early: {}", e);
                }
            }
            Err(e) => {
                REQUEST_EX.increment();
                error!(
                    "handler failed for request {}: {}",
                    request.request_id(),
                    e
                );
                let _ = response.finish(1);
            }
        }
    }
}
