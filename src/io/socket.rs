//! Descriptor-level transport: would-block aware reads, complete writes,
//! vectored writes and guaranteed teardown.

use crate::errors::SocketError;
use socket2::SockRef;
use std::{
    future::Future,
    io::{self, IoSlice},
    net::Shutdown,
    time::Duration,
};
use tokio::{net::TcpStream, time::timeout};

/// A non-blocking, descriptor-like byte transport.
///
/// The `try_*` methods never wait: they return [`io::ErrorKind::WouldBlock`]
/// when the descriptor is not ready. The readiness futures are the only
/// suspension points of the connection code.
///
/// Implemented for [`tokio::net::TcpStream`] (and `UnixStream` on unix).
/// The type is move-only: the descriptor is never duplicated, and dropping
/// the value closes it.
pub trait Socket: Send + 'static {
    /// Reads available bytes; `Ok(0)` means the peer closed the stream.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Waits until the descriptor may be readable.
    fn readable(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Writes some prefix of `buf`.
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Writes some prefix of the concatenation of `bufs` in one call.
    ///
    /// The default writes only the first non-empty slice.
    fn try_write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        match bufs.iter().find(|buf| !buf.is_empty()) {
            Some(buf) => self.try_write(buf),
            None => Ok(0),
        }
    }

    /// Waits until the descriptor may be writable.
    fn writable(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Shuts down both directions of the stream.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Socket for TcpStream {
    #[inline]
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }

    #[inline]
    fn readable(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        TcpStream::readable(self)
    }

    #[inline]
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    #[inline]
    fn try_write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        TcpStream::try_write_vectored(self, bufs)
    }

    #[inline]
    fn writable(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        TcpStream::writable(self)
    }

    #[inline]
    fn shutdown(&mut self) -> io::Result<()> {
        SockRef::from(&*self).shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl Socket for tokio::net::UnixStream {
    #[inline]
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        tokio::net::UnixStream::try_read(self, buf)
    }

    #[inline]
    fn readable(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        tokio::net::UnixStream::readable(self)
    }

    #[inline]
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        tokio::net::UnixStream::try_write(self, buf)
    }

    #[inline]
    fn try_write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        tokio::net::UnixStream::try_write_vectored(self, bufs)
    }

    #[inline]
    fn writable(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        tokio::net::UnixStream::writable(self)
    }

    #[inline]
    fn shutdown(&mut self) -> io::Result<()> {
        SockRef::from(&*self).shutdown(Shutdown::Both)
    }
}

/// Single non-blocking read.
///
/// Returns `Ok(0)` when the read would block, which is not an error, and
/// [`SocketError::Closed`] when the peer has closed or reset the stream.
#[inline]
pub fn read_buffer<S: Socket>(socket: &mut S, buf: &mut [u8]) -> Result<usize, SocketError> {
    if buf.is_empty() {
        return Ok(0);
    }

    match socket.try_read(buf) {
        Ok(0) => Err(SocketError::Closed),
        Ok(n) => Ok(n),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Err(SocketError::Closed),
        Err(e) => Err(SocketError::Read(e)),
    }
}

/// Reads at least one byte, waiting for readiness at most `time` per wait.
pub(crate) async fn read_ready<S: Socket>(
    socket: &mut S,
    buf: &mut [u8],
    time: Duration,
) -> Result<usize, SocketError> {
    if buf.is_empty() {
        return Ok(0);
    }

    loop {
        match read_buffer(socket, buf)? {
            0 => timeout(time, socket.readable())
                .await
                .map_err(|_| SocketError::TimedOut)?
                .map_err(SocketError::Read)?,
            n => return Ok(n),
        }
    }
}

/// Writes all of `buf`, retrying partial writes.
pub async fn write_buffer<S: Socket>(
    socket: &mut S,
    mut buf: &[u8],
    time: Duration,
) -> Result<(), SocketError> {
    while !buf.is_empty() {
        match socket.try_write(buf) {
            Ok(0) => return Err(SocketError::Write(io::ErrorKind::WriteZero.into())),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                wait_writable(socket, time).await?;
            }
            Err(e) => return Err(SocketError::Write(e)),
        }
    }

    Ok(())
}

/// Writes the concatenation of `bufs` with vectored writes, retrying
/// partial writes from the exact byte where the previous call stopped.
pub async fn write_buffers<S: Socket>(
    socket: &mut S,
    bufs: &[&[u8]],
    time: Duration,
) -> Result<(), SocketError> {
    let mut index = 0;
    let mut offset = 0;

    while index < bufs.len() {
        if offset == bufs[index].len() {
            index += 1;
            offset = 0;
            continue;
        }

        let written = {
            let mut slices = Vec::with_capacity(bufs.len() - index);
            slices.push(IoSlice::new(&bufs[index][offset..]));
            slices.extend(bufs[index + 1..].iter().map(|buf| IoSlice::new(buf)));

            socket.try_write_vectored(&slices)
        };

        match written {
            Ok(0) => return Err(SocketError::Write(io::ErrorKind::WriteZero.into())),
            Ok(mut n) => {
                while n > 0 {
                    let rest = bufs[index].len() - offset;
                    if n < rest {
                        offset += n;
                        break;
                    }
                    n -= rest;
                    index += 1;
                    offset = 0;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                wait_writable(socket, time).await?;
            }
            Err(e) => return Err(SocketError::Write(e)),
        }
    }

    Ok(())
}

#[inline]
async fn wait_writable<S: Socket>(socket: &mut S, time: Duration) -> Result<(), SocketError> {
    timeout(time, socket.writable())
        .await
        .map_err(|_| SocketError::TimedOut)?
        .map_err(SocketError::Write)
}

//

/// Owns an accepted descriptor and guarantees that it is shut down for
/// read+write and closed exactly once.
///
/// Calling [`close`](ConnectionGuard::close) performs the teardown eagerly;
/// otherwise it happens on drop, including when the connection task is
/// aborted or a responder fails mid-dispatch.
#[derive(Debug)]
pub struct ConnectionGuard<S: Socket> {
    socket: S,
    closed: bool,
}

impl<S: Socket> ConnectionGuard<S> {
    #[inline]
    pub fn new(socket: S) -> Self {
        Self {
            socket,
            closed: false,
        }
    }

    #[inline(always)]
    pub fn socket(&mut self) -> &mut S {
        &mut self.socket
    }

    /// Shuts down and closes the descriptor.
    #[inline]
    pub fn close(mut self) -> Result<(), SocketError> {
        self.closed = true;
        self.socket.shutdown().map_err(SocketError::Shutdown)
        // `self.socket` is dropped (closed) here
    }
}

impl<S: Socket> Drop for ConnectionGuard<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.socket.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockSocket;

    const TIME: Duration = Duration::from_secs(1);

    #[test]
    fn read_would_block_is_zero() {
        let mut socket = MockSocket::new("abc").would_block(1);
        let mut buf = [0; 8];

        assert_eq!(read_buffer(&mut socket, &mut buf).unwrap(), 0);
        assert_eq!(read_buffer(&mut socket, &mut buf).unwrap(), 3);
        assert!(matches!(
            read_buffer(&mut socket, &mut buf),
            Err(SocketError::Closed)
        ));
    }

    #[tokio::test]
    async fn read_ready_waits_through_would_block() {
        let mut socket = MockSocket::new("hello").would_block(3);
        let mut buf = [0; 8];

        assert_eq!(read_ready(&mut socket, &mut buf, TIME).await.unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[tokio::test]
    async fn partial_writes_are_retried() {
        let mut socket = MockSocket::new("").max_write(3);

        write_buffer(&mut socket, b"HTTP/1.1 200 OK\r\n", TIME)
            .await
            .unwrap();
        assert_eq!(socket.written(), b"HTTP/1.1 200 OK\r\n");
    }

    #[tokio::test]
    async fn vectored_writes_resume_mid_slice() {
        let mut socket = MockSocket::new("").max_write(4).would_block_writes(2);

        let parts: [&[u8]; 4] = [b"HTTP/1.1 ", b"", b"200 OK\r\n", b"\r\nbody"];
        write_buffers(&mut socket, &parts, TIME).await.unwrap();

        assert_eq!(socket.written(), b"HTTP/1.1 200 OK\r\n\r\nbody");
    }

    #[test]
    fn guard_closes_once() {
        let socket = MockSocket::new("");
        let stats = socket.stats();

        let guard = ConnectionGuard::new(socket);
        guard.close().unwrap();

        assert_eq!(stats.shutdowns(), 1);
        assert_eq!(stats.closes(), 1);
    }

    #[test]
    fn guard_closes_on_drop() {
        let socket = MockSocket::new("");
        let stats = socket.stats();

        {
            let mut guard = ConnectionGuard::new(socket);
            let _ = guard.socket();
        }

        assert_eq!(stats.shutdowns(), 1);
        assert_eq!(stats.closes(), 1);
    }
}
