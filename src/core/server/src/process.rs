// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::transport::{transport, TransportHandle};
use crate::workers::WorkersBuilder;
use crate::{Handle, Signal, QUEUE_CAPACITY, THREAD_PREFIX};

use config::{FastcgiConfig, ServerConfig, WorkerConfig};
use crossbeam_channel::{bounded, Sender};
use libc::c_int;
use logger::*;
use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;

use std::io::Result;
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct ProcessBuilder {
    transport: Box<dyn crate::Transport>,
    transport_handle: TransportHandle,
    signal_tx: Sender<Signal>,
    workers: WorkersBuilder,
    handler: Arc<dyn Handle>,
    publish_rx: crossbeam_channel::Receiver<session::ReadyRequest>,
    log_drain: Box<dyn Drain>,
}

impl ProcessBuilder {
    pub fn new<T: ServerConfig + WorkerConfig + FastcgiConfig>(
        config: &T,
        log_drain: Box<dyn Drain>,
        handler: Arc<dyn Handle>,
    ) -> Result<Self> {
        // channel for the parent `Process` to send `Signal`s to the
        // transport thread
        let (signal_tx, signal_rx) = bounded(QUEUE_CAPACITY);

        // queue for the transport to publish completed requests to the
        // worker threads
        let (publish_tx, publish_rx) = bounded(QUEUE_CAPACITY);

        let (transport, transport_handle) = transport(config, publish_tx, signal_rx)?;
        let workers = WorkersBuilder::new(config);

        Ok(Self {
            transport,
            transport_handle,
            signal_tx,
            workers,
            handler,
            publish_rx,
            log_drain,
        })
    }

    pub fn spawn(self) -> Process {
        let mut transport = self.transport;
        let transport_thread = std::thread::Builder::new()
            .name(format!("{THREAD_PREFIX}_transport"))
            .spawn(move || transport.run())
            .expect("failed to spawn transport thread");

        let workers = self.workers.spawn(self.handler, self.publish_rx);

        let signal_tx = self.signal_tx.clone();
        let transport_handle = self.transport_handle.clone();

        // the signal handler thread lives as long as the OS process; its
        // join handle is not kept
        let _signal_handler = std::thread::Builder::new()
            .name(format!("{THREAD_PREFIX}_signal"))
            .spawn(move || Process::signal_handler(&signal_tx, &transport_handle));

        Process {
            transport: transport_thread,
            transport_handle: self.transport_handle,
            signal_tx: self.signal_tx,
            workers,
            log_drain: self.log_drain,
        }
    }
}

pub struct Process {
    transport: JoinHandle<()>,
    transport_handle: TransportHandle,
    signal_tx: Sender<Signal>,
    workers: Vec<JoinHandle<()>>,
    log_drain: Box<dyn Drain>,
}

impl Process {
    /// Attempts to gracefully shutdown the `Process` by sending a shutdown
    /// signal to the transport and then waiting to join all threads.
    ///
    /// This function will block until all threads have terminated.
    pub fn shutdown(self) {
        Process::shutdown_signal(&self.signal_tx, &self.transport_handle);
        self.wait()
    }

    fn shutdown_signal(signal_tx: &Sender<Signal>, transport_handle: &TransportHandle) {
        if signal_tx.try_send(Signal::Shutdown).is_err() {
            fatal!("error sending shutdown signal to transport thread");
        }
        // break the transport out of its wait so it sees the signal
        transport_handle.wake();
    }

    /// Relays process-level signals as shutdown messages to the transport.
    fn signal_handler(signal_tx: &Sender<Signal>, transport_handle: &TransportHandle) {
        const SIGNALS: &[c_int] = &[SIGHUP, SIGINT, SIGTERM, SIGQUIT];
        let mut signals = Signals::new(SIGNALS).expect("Couldn't instantiate Signals");

        for signal in &mut signals {
            match signal {
                SIGTERM | SIGINT | SIGQUIT => {
                    Process::shutdown_signal(signal_tx, transport_handle);
                    break;
                }
                _ => (),
            }
        }
    }

    /// Will block until all threads terminate. This should be used to keep
    /// the process alive while the child threads run.
    pub fn wait(mut self) {
        // once the transport returns, its side of the publish queue drops
        // and the workers drain and exit
        let _ = self.transport.join();
        for thread in self.workers {
            let _ = thread.join();
        }
        let _ = self.log_drain.flush();
    }
}
