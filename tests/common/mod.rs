//! Scripted in-process server for integration tests.
//!
//! Each test drives the server side by hand: read the lines the client
//! wrote, assert on them, write frames back.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::time::Duration;

use subline::{Client, ConnectionState};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;

/// Upper bound for any single wait in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Listening fake server.
pub struct FakeServer {
    listener: TcpListener,
    port: u16,
}

impl FakeServer {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub fn uri(&self) -> String {
        format!("nats://127.0.0.1:{}", self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept the next client connection.
    pub async fn accept(&self) -> ServerConn {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("client did not connect")
            .unwrap();
        let (reader, writer) = stream.into_split();
        ServerConn {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// True if a client connects within `within`.
    pub async fn try_accept(&self, within: Duration) -> bool {
        tokio::time::timeout(within, self.listener.accept())
            .await
            .is_ok()
    }
}

/// Server side of one accepted connection.
pub struct ServerConn {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ServerConn {
    /// Next line without its CRLF, or `None` at EOF.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a line from the client")
            .unwrap();
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches("\r\n").to_string())
    }

    /// Read one line and assert its content.
    pub async fn expect_line(&mut self, expected: &str) {
        assert_eq!(self.read_line().await.as_deref(), Some(expected));
    }

    /// Read lines up to and including the next `PING`; returns the lines
    /// before it.
    pub async fn read_until_ping(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await.expect("connection closed before PING");
            if line == "PING" {
                return lines;
            }
            lines.push(line);
        }
    }

    /// Complete the client handshake; returns the lines sent before the
    /// handshake `PING` (starting with `CONNECT`).
    pub async fn handshake(&mut self) -> Vec<String> {
        let lines = self.read_until_ping().await;
        assert!(
            lines.first().is_some_and(|l| l.starts_with("CONNECT {")),
            "first command must be CONNECT, got {lines:?}"
        );
        self.send("PONG\r\n").await;
        lines
    }

    pub async fn send(&mut self, data: impl AsRef<[u8]>) {
        self.writer.write_all(data.as_ref()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Answer the client's next round trip.
    pub async fn answer_ping(&mut self) {
        self.expect_line("PING").await;
        self.send("PONG\r\n").await;
    }

    /// True once the client has closed its side.
    pub async fn closed_by_client(&mut self) -> bool {
        self.read_line().await.is_none()
    }
}

/// Poll until the client reaches `state`.
pub async fn wait_for_state(client: &Client, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while client.state() != state {
        assert!(
            tokio::time::Instant::now() < deadline,
            "client stuck in {:?}, expected {:?}",
            client.state(),
            state
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Start `client` against `server` and complete the handshake.
pub async fn connect(client: &Client, server: &FakeServer) -> ServerConn {
    let uri = server.uri();
    let (started, conn) = tokio::join!(client.start(&uri), async {
        let mut conn = server.accept().await;
        conn.handshake().await;
        conn
    });
    started.unwrap();
    conn
}
