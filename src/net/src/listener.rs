// Copyright 2024 FastCGI Gateway Contributors.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::{Stream, STREAM_ACCEPT, STREAM_ACCEPT_EX, TCP_ACCEPT};

use mio::net::{TcpListener, UnixListener};
use mio::{event::Source, Interest, Registry, Token};

use std::io::{Error, ErrorKind, Result};
use std::net::Ipv4Addr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// The descriptor a process supervisor passes the pre-bound listening socket
/// on, per the FastCGI convention.
pub const LISTENSOCK_FILENO: RawFd = 0;

/// Owns exactly one listening descriptor and hands off accepted connections
/// as opaque byte-stream handles.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// Creates a TCP listening socket bound to `host:port` with the
    /// configured backlog. Misconfiguration (zero port, non-positive
    /// backlog) and bind/listen failures are reported here, at startup, not
    /// per-accept.
    pub fn tcp(host: &str, port: u16, backlog: i32) -> Result<Self> {
        if port == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "tcp transport configured without a valid port number",
            ));
        }
        if backlog <= 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "tcp transport requires a positive listen backlog",
            ));
        }
        let ip: Ipv4Addr = host
            .parse()
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "invalid listen host"))?;

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }

        // closes the descriptor on any error below
        let guard = FdGuard(fd);

        let one: libc::c_int = 1;
        syscall(unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &one as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        })?;

        let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        sa.sin_family = libc::AF_INET as libc::sa_family_t;
        sa.sin_port = port.to_be();
        sa.sin_addr = libc::in_addr {
            s_addr: u32::from(ip).to_be(),
        };

        syscall(unsafe {
            libc::bind(
                fd,
                &sa as *const libc::sockaddr_in as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        })?;
        syscall(unsafe { libc::listen(fd, backlog) })?;
        set_nonblocking(fd)?;

        std::mem::forget(guard);
        let listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        Ok(Self::Tcp(TcpListener::from_std(listener)))
    }

    /// Adopts the pre-bound unix-domain socket a FastCGI process supervisor
    /// passes on descriptor 0. The recommended check for running under a
    /// supervisor is that `getpeername` on that descriptor fails with
    /// `ENOTCONN`.
    pub fn from_listensock() -> Result<Self> {
        let mut sa: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;

        let rc = unsafe {
            libc::getpeername(
                LISTENSOCK_FILENO,
                &mut sa as *mut libc::sockaddr_un as *mut libc::sockaddr,
                &mut len,
            )
        };
        if rc != -1 || Error::last_os_error().raw_os_error() != Some(libc::ENOTCONN) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "descriptor 0 is not a listening socket; not started by a fastcgi supervisor",
            ));
        }

        set_nonblocking(LISTENSOCK_FILENO)?;
        let listener = unsafe { std::os::unix::net::UnixListener::from_raw_fd(LISTENSOCK_FILENO) };
        Ok(Self::Unix(UnixListener::from_std(listener)))
    }

    /// Attempts to accept one pending connection. The accept syscall is
    /// wrapped in an exclusive advisory lock on the listening descriptor so
    /// that sibling processes sharing the descriptor never race for the same
    /// connection; the lock is released whether or not a connection was
    /// obtained. `Ok(None)` means another process won this round or there
    /// was no pending connection; that is absence of work, not an error.
    pub fn accept(&self) -> Result<Option<Stream>> {
        let fd = self.as_raw_fd();

        lock_socket(fd)?;
        let result = match self {
            Self::Tcp(listener) => listener.accept().map(|(stream, _addr)| {
                TCP_ACCEPT.increment();
                Stream::from(stream)
            }),
            Self::Unix(listener) => listener.accept().map(|(stream, _addr)| Stream::from(stream)),
        };
        release_socket(fd);

        match result {
            Ok(stream) => {
                STREAM_ACCEPT.increment();
                Ok(Some(stream))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::ECONNABORTED) => Ok(None),
            Err(e) => {
                STREAM_ACCEPT_EX.increment();
                Err(e)
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(listener) => listener.as_raw_fd(),
            Self::Unix(listener) => listener.as_raw_fd(),
        }
    }
}

impl Source for Listener {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> Result<()> {
        match self {
            Self::Tcp(listener) => listener.register(registry, token, interests),
            Self::Unix(listener) => listener.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> Result<()> {
        match self {
            Self::Tcp(listener) => listener.reregister(registry, token, interests),
            Self::Unix(listener) => listener.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        match self {
            Self::Tcp(listener) => listener.deregister(registry),
            Self::Unix(listener) => listener.deregister(registry),
        }
    }
}

struct FdGuard(RawFd);

impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

fn syscall(rc: libc::c_int) -> Result<()> {
    if rc < 0 {
        Err(Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::last_os_error());
    }
    syscall(unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) })
}

fn lock_socket(fd: RawFd) -> Result<()> {
    loop {
        if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
            return Ok(());
        }
        let e = Error::last_os_error();
        if e.raw_os_error() != Some(libc::EINTR) {
            return Err(e);
        }
    }
}

fn release_socket(fd: RawFd) {
    unsafe {
        libc::flock(fd, libc::LOCK_UN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    fn tcp_listener() -> (Listener, u16) {
        // port 0 requests an ephemeral port from the OS; the public
        // constructor rejects it by design, so bind via std here
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = std_listener.local_addr().unwrap().port();
        std_listener.set_nonblocking(true).unwrap();
        (
            Listener::Tcp(TcpListener::from_std(std_listener)),
            port,
        )
    }

    #[test]
    fn zero_port_fails_fast() {
        assert!(Listener::tcp("127.0.0.1", 0, 128).is_err());
        assert!(Listener::tcp("127.0.0.1", 9000, 0).is_err());
    }

    /// Reserves an ephemeral port for the public constructor to rebind.
    /// The std socket drops before the rebind, and SO_REUSEADDR keeps the
    /// window from mattering.
    fn reserve_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn bind_and_accept() {
        let port = reserve_port();
        let listener = Listener::tcp("127.0.0.1", port, 16).expect("bind");

        // nothing pending: absence of work, not an error
        assert!(listener.accept().expect("accept").is_none());

        let mut client = std::net::TcpStream::connect(("127.0.0.1", port)).expect("connect");
        client.write_all(b"x").unwrap();

        // the pending connection is claimed under the advisory lock
        let mut accepted = None;
        for _ in 0..100 {
            accepted = listener.accept().expect("accept");
            if accepted.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(accepted.is_some());
    }

    #[test]
    fn one_pending_connection_has_exactly_one_winner() {
        let (listener, port) = tcp_listener();
        let listener = Arc::new(listener);

        let _client = std::net::TcpStream::connect(("127.0.0.1", port)).expect("connect");
        // let the connection land in the accept queue
        std::thread::sleep(std::time::Duration::from_millis(100));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let listener = listener.clone();
            handles.push(std::thread::spawn(move || {
                listener.accept().expect("accept").is_some()
            }));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn accept_lock_excludes_other_descriptions() {
        use std::sync::atomic::{AtomicBool, Ordering};

        // flock identity is the open file description, not the descriptor
        // number, so contention needs two separate descriptions. Sibling
        // gateway processes each hold their own; two opens of one path
        // stand in for them here.
        let path = std::env::temp_dir().join(format!("gateway-accept-lock-{}", std::process::id()));
        let first = std::fs::File::create(&path).unwrap();
        let second = std::fs::OpenOptions::new().read(true).open(&path).unwrap();

        lock_socket(first.as_raw_fd()).unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let observed = released.clone();
        let waiter = std::thread::spawn(move || {
            // blocks until the first description releases
            lock_socket(second.as_raw_fd()).unwrap();
            let after_release = observed.load(Ordering::Acquire);
            release_socket(second.as_raw_fd());
            after_release
        });

        std::thread::sleep(std::time::Duration::from_millis(200));
        released.store(true, Ordering::Release);
        release_socket(first.as_raw_fd());

        assert!(waiter.join().unwrap());
        let _ = std::fs::remove_file(&path);
    }
}
