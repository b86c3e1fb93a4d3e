//! Connection Handler
//!
//! Drives one TCP client. The loop waits on three sources at once:
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!  socket ──>│ read → parse → Session::handle → write reply │
//!            │                                              │
//!  pushes ──>│ write push frame                             │──> socket
//!            │                                              │
//! evicted ──>│ write "-ERR push buffer overflow", close     │
//!            └──────────────────────────────────────────────┘
//! ```
//!
//! Replies for a pipelined batch are buffered and flushed once the batch is
//! drained. A reply to `<CMD>.WATCH` is always flushed before the initial
//! push of that subscription, since pushes are only picked up between
//! batches.

use crate::connection::session::{PushStream, Session};
use crate::database::Database;
use crate::protocol::{parse_frame, ParseError, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Sent right before an evicted session is closed.
pub const EVICTED_MESSAGE: &str = "ERR push buffer overflow";

#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub connections_accepted: AtomicU64,
    pub active_connections: AtomicU64,
    pub commands_processed: AtomicU64,
    pub pushes_sent: AtomicU64,
    pub bytes_read: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("connection closed with a partial frame buffered")]
    UnexpectedEof,

    #[error("evicted for not draining pushes")]
    Evicted,
}

pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    session: Session,
    push_stream: PushStream,
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        db: Arc<Database>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        let (session, push_stream) = Session::open(db);

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            session,
            push_stream,
            stats,
        }
    }

    /// Serves the client until it disconnects, sends `QUIT`, or fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.addr, "Client quit"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::Evicted) => {
                info!(client = %self.addr, "Client evicted, push buffer overflow")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            if self.drain_requests().await? {
                self.stream.flush().await?;
                return Ok(());
            }
            self.stream.flush().await?;

            tokio::select! {
                read = self.stream.get_mut().read_buf(&mut self.buffer) => {
                    let n = read?;
                    if n == 0 {
                        return Err(if self.buffer.is_empty() {
                            ConnectionError::ClientDisconnected
                        } else {
                            ConnectionError::UnexpectedEof
                        });
                    }
                    self.stats.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
                    trace!(client = %self.addr, bytes = n, "Read data");
                }
                Some(push) = self.push_stream.pushes.recv() => {
                    self.write_frame(&RespValue::push(&push)).await?;
                    self.stats.pushes_sent.fetch_add(1, Ordering::Relaxed);
                    // Batch whatever else is already queued
                    while let Ok(push) = self.push_stream.pushes.try_recv() {
                        self.write_frame(&RespValue::push(&push)).await?;
                        self.stats.pushes_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(()) = self.push_stream.evicted.changed() => {
                    if *self.push_stream.evicted.borrow() {
                        self.write_frame(&RespValue::error(EVICTED_MESSAGE)).await?;
                        self.stream.flush().await?;
                        return Err(ConnectionError::Evicted);
                    }
                }
            }
        }
    }

    /// Executes every complete request in the buffer.
    ///
    /// Returns true if the client asked to quit.
    async fn drain_requests(&mut self) -> Result<bool, ConnectionError> {
        loop {
            let frame = match parse_frame(&self.buffer) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.buffer.split_to(consumed);
                    frame
                }
                Ok(None) => return Ok(false),
                Err(e) => {
                    let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                    self.write_frame(&reply).await?;
                    self.stream.flush().await?;
                    return Err(e.into());
                }
            };

            // Blank inline line
            if matches!(&frame, RespValue::Array(items) if items.is_empty()) {
                continue;
            }

            let Some((name, args)) = frame.into_command() else {
                let reply = RespValue::error("ERR Protocol error: expected an array of bulk strings");
                self.write_frame(&reply).await?;
                continue;
            };

            self.stats.commands_processed.fetch_add(1, Ordering::Relaxed);

            if name.eq_ignore_ascii_case("QUIT") {
                self.write_frame(&RespValue::simple_string("OK")).await?;
                return Ok(true);
            }

            let reply = self.session.handle(&name, &args);
            self.write_frame(&reply).await?;
        }
    }

    async fn write_frame(&mut self, frame: &RespValue) -> Result<(), ConnectionError> {
        let bytes = frame.serialize();
        self.stream.write_all(&bytes).await?;
        self.stats
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Runs a [`ConnectionHandler`] to completion, logging only unusual endings.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    db: Arc<Database>,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, db, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected | ConnectionError::Evicted => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => debug!(client = %addr, error = %e, "Connection ended with error"),
        }
    }
}
