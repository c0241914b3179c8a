// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// A transport backend identifier. Selected once at startup; only one
/// transport is active in a given process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// FastCGI over the pre-bound unix-domain socket on descriptor 0.
    FastcgiUnix,
    /// FastCGI over a TCP socket bound to the given port.
    FastcgiTcp { port: u16 },
    /// Direct HTTP termination on the given port.
    Http { port: u16 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("unknown transport backend: {0:?}")]
    Unknown(String),
    #[error("transport {0:?} requires a nonzero port, eg \"{0}:9000\"")]
    MissingPort(&'static str),
}

impl FromStr for Backend {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, port) = match s.split_once(':') {
            Some((name, port)) => (name, Some(port)),
            None => (s, None),
        };

        let port = |kind: &'static str| -> Result<u16, BackendError> {
            port.and_then(|p| p.parse::<u16>().ok())
                .filter(|p| *p != 0)
                .ok_or(BackendError::MissingPort(kind))
        };

        match name {
            "fastcgi-unix" => Ok(Backend::FastcgiUnix),
            "fastcgi-tcp" => Ok(Backend::FastcgiTcp {
                port: port("fastcgi-tcp")?,
            }),
            "http" => Ok(Backend::Http { port: port("http")? }),
            _ => Err(BackendError::Unknown(s.to_string())),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::FastcgiUnix => write!(f, "fastcgi-unix"),
            Backend::FastcgiTcp { port } => write!(f, "fastcgi-tcp:{}", port),
            Backend::Http { port } => write!(f, "http:{}", port),
        }
    }
}
