// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Configuration for the gateway. Each section has serde defaults so an
//! empty (or absent) config file yields a runnable instance, and each
//! section is exposed through a per-concern trait so sibling crates depend
//! only on the slice of configuration they consume.

mod backend;

pub use backend::{Backend, BackendError};

use serde::{Deserialize, Serialize};

use std::io::Read;

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub worker: Worker,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub fastcgi: Fastcgi,
}

impl GatewayConfig {
    pub fn load(file: &str) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let config: GatewayConfig = match toml::from_str(&content) {
            Ok(t) => t,
            Err(e) => {
                log::error!("{}", e);
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "error parsing config",
                ));
            }
        };

        // transport selection is a startup decision; surface a bad
        // identifier here rather than at runtime
        if let Err(e) = config.server.backend() {
            log::error!("{}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "invalid transport selection",
            ));
        }

        Ok(config)
    }

    pub fn print(&self) {
        match toml::to_string_pretty(self) {
            Ok(contents) => println!("{}", contents),
            Err(e) => {
                log::error!("failed to serialize config: {}", e);
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Server {
    #[serde(default = "transport")]
    pub transport: String,
    #[serde(default = "host")]
    pub host: String,
    #[serde(default = "backlog")]
    pub backlog: i32,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            transport: transport(),
            host: host(),
            backlog: backlog(),
        }
    }
}

impl Server {
    /// The configured transport backend. Invalid or unconfigured selection
    /// is a startup failure, not a runtime one.
    pub fn backend(&self) -> Result<Backend, BackendError> {
        self.transport.parse()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn backlog(&self) -> i32 {
        self.backlog
    }
}

fn transport() -> String {
    "fastcgi-tcp:9000".into()
}

fn host() -> String {
    "127.0.0.1".into()
}

fn backlog() -> i32 {
    128
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Worker {
    #[serde(default = "threads")]
    pub threads: usize,
}

impl Default for Worker {
    fn default() -> Self {
        Self { threads: threads() }
    }
}

impl Worker {
    pub fn threads(&self) -> usize {
        std::cmp::max(1, self.threads)
    }
}

fn threads() -> usize {
    4
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Debug {
    #[serde(default = "log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<String>,
}

impl Default for Debug {
    fn default() -> Self {
        Self {
            log_level: log_level(),
            log_file: None,
        }
    }
}

impl Debug {
    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }

    pub fn log_file(&self) -> Option<&str> {
        self.log_file.as_deref()
    }
}

fn log_level() -> String {
    "info".into()
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Cache {
    #[serde(default = "cache_backend")]
    pub backend: String,
    #[serde(default = "cache_name")]
    pub name: String,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            backend: cache_backend(),
            name: cache_name(),
        }
    }
}

impl Cache {
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn cache_backend() -> String {
    "memory".into()
}

fn cache_name() -> String {
    "gateway".into()
}

/// Implementation limits advertised in response to GetValues management
/// queries.
#[derive(Serialize, Deserialize, Debug)]
pub struct Fastcgi {
    #[serde(default = "max_conns")]
    pub max_conns: usize,
    #[serde(default = "max_reqs")]
    pub max_reqs: usize,
    #[serde(default = "mpxs_conns")]
    pub mpxs_conns: bool,
}

impl Default for Fastcgi {
    fn default() -> Self {
        Self {
            max_conns: max_conns(),
            max_reqs: max_reqs(),
            mpxs_conns: mpxs_conns(),
        }
    }
}

fn max_conns() -> usize {
    1024
}

fn max_reqs() -> usize {
    1024
}

fn mpxs_conns() -> bool {
    true
}

pub trait ServerConfig {
    fn server(&self) -> &Server;
}

pub trait WorkerConfig {
    fn worker(&self) -> &Worker;
}

pub trait DebugConfig {
    fn debug(&self) -> &Debug;
}

pub trait CacheConfig {
    fn cache(&self) -> &Cache;
}

pub trait FastcgiConfig {
    fn fastcgi(&self) -> &Fastcgi;
}

impl ServerConfig for GatewayConfig {
    fn server(&self) -> &Server {
        &self.server
    }
}

impl WorkerConfig for GatewayConfig {
    fn worker(&self) -> &Worker {
        &self.worker
    }
}

impl DebugConfig for GatewayConfig {
    fn debug(&self) -> &Debug {
        &self.debug
    }
}

impl CacheConfig for GatewayConfig {
    fn cache(&self) -> &Cache {
        &self.cache
    }
}

impl FastcgiConfig for GatewayConfig {
    fn fastcgi(&self) -> &Fastcgi {
        &self.fastcgi
    }
}
