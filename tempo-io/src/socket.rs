//! UDP socket wrapper
//!
//! The transport is driven by a readiness loop and must never block on a
//! socket: a send or receive that would block is a non-event, surfaced as
//! `Ok(None)` rather than an error.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use thiserror::Error;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid socket address")]
    InvalidAddress,
}

/// Non-blocking UDP socket for media datagrams.
pub struct MediaSocket {
    inner: Socket,
}

impl MediaSocket {
    /// Bind a non-blocking socket to the given address.
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;

        tracing::debug!(%addr, "bound media socket");
        Ok(MediaSocket { inner: socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Send one datagram; `Ok(None)` means the socket wasn't ready.
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<Option<usize>, SocketError> {
        match self.inner.send_to(buf, &target.into()) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Receive one datagram; `Ok(None)` means nothing was waiting.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        // socket2 takes MaybeUninit; the caller's initialized buffer is a
        // valid view of one
        let uninit = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<MaybeUninit<u8>>(), buf.len())
        };

        match self.inner.recv_from(uninit) {
            Ok((n, addr)) => {
                let addr = addr.as_socket().ok_or(SocketError::InvalidAddress)?;
                Ok(Some((n, addr)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_recv_buffer_size(size)?;
        Ok(())
    }

    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_send_buffer_size(size)?;
        Ok(())
    }
}
