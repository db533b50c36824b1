//! TCP transport.
//!
//! Thin wrapper around `tokio::net` that hands the client a read half, a
//! write half, and the read buffer size to use. The client drives both
//! halves from its own tasks through [`read_loop`] and [`write_loop`].

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;

use crate::config::ServerUri;
use crate::constants::DEFAULT_READ_BUFFER_SIZE;

/// An established connection, not yet split into tasks.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
    read_buffer_size: usize,
}

impl Connection {
    /// Split into read half, write half, and read buffer size.
    pub fn into_parts(self) -> (OwnedReadHalf, OwnedWriteHalf, usize) {
        let (reader, writer) = self.stream.into_split();
        (reader, writer, self.read_buffer_size)
    }
}

/// Open a TCP connection to `uri`.
///
/// Every resolved address is tried in order; the error of the last attempt
/// is returned if none accepts. The read buffer is sized from the socket's
/// receive buffer unless `read_buffer_size` overrides it.
pub(crate) async fn connect(
    uri: &ServerUri,
    read_buffer_size: Option<usize>,
) -> io::Result<Connection> {
    let mut last_err = None;

    for addr in tokio::net::lookup_host(uri.socket_addr()).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        let size = read_buffer_size
            .or_else(|| {
                socket
                    .recv_buffer_size()
                    .ok()
                    .and_then(|size| usize::try_from(size).ok())
            })
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_READ_BUFFER_SIZE);

        match socket.connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("[Transport] Could not set TCP_NODELAY: {}", e);
                }
                log::debug!("[Transport] Connected to {} (read buffer {} bytes)", addr, size);
                return Ok(Connection {
                    stream,
                    read_buffer_size: size,
                });
            }
            Err(e) => {
                log::debug!("[Transport] Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {}", uri.socket_addr()),
        )
    }))
}

/// Read until EOF or error, handing each chunk to `on_bytes`.
///
/// Returns `Ok(())` when the peer closes the connection.
pub(crate) async fn read_loop<F>(
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    mut on_bytes: F,
) -> io::Result<()>
where
    F: FnMut(&[u8]),
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        on_bytes(&buf[..n]);
    }
}

/// Write every queued chunk in order, then shut the socket down once the
/// channel closes.
pub(crate) async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut commands: mpsc::UnboundedReceiver<Bytes>,
) -> io::Result<()> {
    while let Some(chunk) = commands.recv().await {
        writer.write_all(&chunk).await?;
    }
    writer.shutdown().await
}

// ─── Tests ──────────────────────────────────────────────────────────────────
