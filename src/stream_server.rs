//! Local sequenced-packet fan-out server shared by the frame and point
//! streams: every `emit` delivers one datagram per subscriber, and slow
//! subscribers lose packets instead of blocking the pipeline.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;

const LISTEN_BACKLOG: i32 = 8;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("\"{0}\" exists but is not a socket, delete it manually")]
    NotASocket(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Remove a leftover socket file from an earlier run; anything else at the
/// path is refused.
fn unlink_stale_socket(path: &Path) -> Result<(), StreamError> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(StreamError::NotASocket(path.to_path_buf()));
            }
            fs::remove_file(path)?;
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Bind a world-connectable, non-blocking sequenced-packet listener,
/// replacing any stale socket file at `path`.
pub(crate) fn bind_listener(path: &Path) -> Result<Socket, StreamError> {
    unlink_stale_socket(path)?;

    let listener = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    listener.set_nonblocking(true)?;

    // clear the file creation mask so any local consumer may connect
    let previous_umask = unsafe { libc::umask(0) };
    let bound = listener.bind(&SockAddr::unix(path)?);
    unsafe { libc::umask(previous_umask) };
    bound?;

    listener.listen(LISTEN_BACKLOG)?;
    info!("listening on \"{}\"", path.display());
    Ok(listener)
}

pub struct SeqPacketServer {
    path: PathBuf,
    listener: Socket,
    subscribers: Vec<Socket>,
    largest_payload: usize,
}

impl SeqPacketServer {
    /// Bind a world-connectable sequenced-packet socket at `path`.
    pub fn bind(path: PathBuf) -> Result<Self, StreamError> {
        let listener = bind_listener(&path)?;
        Ok(SeqPacketServer {
            path,
            listener,
            subscribers: Vec::new(),
            largest_payload: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Take on all pending connections, then send `payload` as one datagram
    /// to every subscriber.
    ///
    /// Gone subscribers (`EPIPE`/`ECONNRESET`, or a short send) are removed;
    /// subscribers with a full send buffer miss this packet. Any other socket
    /// error is fatal.
    pub fn emit(&mut self, payload: &[u8]) -> Result<(), StreamError> {
        if payload.is_empty() {
            return Ok(());
        }

        self.accept_pending(payload.len())?;

        if payload.len() > self.largest_payload {
            debug!(
                "\"{}\": packet size grew to {} bytes",
                self.path.display(),
                payload.len()
            );
            self.largest_payload = payload.len();
            for subscriber in &self.subscribers {
                let _ = subscriber.set_send_buffer_size(self.largest_payload);
            }
        }

        let mut i = 0;
        while i < self.subscribers.len() {
            match send_packet(&self.subscribers[i], payload) {
                Ok(sent) if sent == payload.len() => {
                    i += 1;
                }
                Ok(sent) => {
                    warn!(
                        "\"{}\": incomplete transfer ({sent} of {} bytes), dropping subscriber",
                        self.path.display(),
                        payload.len()
                    );
                    self.subscribers.swap_remove(i);
                }
                Err(e)
                    if e.kind() == io::ErrorKind::BrokenPipe
                        || e.kind() == io::ErrorKind::ConnectionReset =>
                {
                    debug!("\"{}\": subscriber disconnected", self.path.display());
                    self.subscribers.swap_remove(i);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    warn!(
                        "\"{}\": subscriber too slow, skipping packet",
                        self.path.display()
                    );
                    i += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn accept_pending(&mut self, payload_len: usize) -> Result<(), StreamError> {
        loop {
            match self.listener.accept() {
                Ok((subscriber, _)) => {
                    subscriber.set_nonblocking(true)?;
                    let _ = subscriber.set_send_buffer_size(self.largest_payload.max(payload_len));
                    debug!("\"{}\": subscriber connected", self.path.display());
                    self.subscribers.push(subscriber);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn send_packet(subscriber: &Socket, payload: &[u8]) -> io::Result<usize> {
    subscriber.send_with_flags(payload, libc::MSG_NOSIGNAL)
}

impl Drop for SeqPacketServer {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not unlink \"{}\": {e}", self.path.display());
            }
        }
    }
}

/// Connect to a sequenced-packet server, for consumers and tests.
pub fn connect(path: &Path) -> io::Result<std::os::unix::net::UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::SEQPACKET, None)?;
    socket.connect(&SockAddr::unix(path)?)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn emits_one_datagram_per_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.socket");
        let mut server = SeqPacketServer::bind(path.clone()).unwrap();

        let mut client = connect(&path).unwrap();
        server.emit(b"hello").unwrap();
        assert_eq!(server.subscriber_count(), 1);

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        server.emit(b"second").unwrap();
        let n = client.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"second");
    }

    #[test]
    fn gone_subscribers_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.socket");
        let mut server = SeqPacketServer::bind(path.clone()).unwrap();

        let client = connect(&path).unwrap();
        server.emit(b"one").unwrap();
        assert_eq!(server.subscriber_count(), 1);

        drop(client);
        // the disconnect surfaces on some send after the peer is gone
        server.emit(b"two").unwrap();
        server.emit(b"three").unwrap();
        assert_eq!(server.subscriber_count(), 0);
    }

    #[test]
    fn slow_subscribers_lose_packets_but_stay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.socket");
        let mut server = SeqPacketServer::bind(path.clone()).unwrap();

        let _client = connect(&path).unwrap();
        let payload = vec![0x55u8; 64 * 1024];
        for _ in 0..64 {
            server.emit(&payload).unwrap();
        }
        assert_eq!(server.subscriber_count(), 1);
    }

    #[test]
    fn refuses_non_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.socket");
        fs::write(&path, b"not a socket").unwrap();
        assert!(matches!(
            SeqPacketServer::bind(path),
            Err(StreamError::NotASocket(_))
        ));
    }

    #[test]
    fn replaces_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.socket");
        {
            // closing the listener leaves the socket file behind
            let _stale = bind_listener(&path).unwrap();
        }
        assert!(path.exists());
        let _server = SeqPacketServer::bind(path.clone()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unbinding_removes_the_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.socket");
        {
            let _server = SeqPacketServer::bind(path.clone()).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
