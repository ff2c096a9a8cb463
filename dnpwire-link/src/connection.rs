//! Connection management.

use crate::error::LinkError;
use bytes::{Buf, BytesMut};
use dnpwire_protocol::{FeedStatus, Message, ParseStats};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Minimum read buffer size.
pub const MIN_READ_BUFFER_SIZE: usize = 64;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Bytes a receive may discard before giving up on the stream.
pub const DEFAULT_MAX_RESYNC_BYTES: u64 = 4096;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outstation address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long to wait for a complete response.
    pub response_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Noise tolerated while waiting for one message.
    pub max_resync_bytes: u64,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_max_resync_bytes(mut self, bytes: u64) -> Self {
        self.max_resync_bytes = bytes;
        self
    }
}

/// Sends and receives whole messages over a byte stream.
///
/// Bytes read past the end of one message are kept for the next
/// [`Link::receive`].
pub struct Link<S> {
    stream: S,
    pending: BytesMut,
    read_buf: Vec<u8>,
    timeout: Option<Duration>,
    max_resync_bytes: u64,
    stats: ParseStats,
}

impl Link<TcpStream> {
    /// Connects to an outstation.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, LinkError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                LinkError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                LinkError::Io(e)
            })?;

        // Small frames; do not batch them.
        stream.set_nodelay(true).ok();

        Ok(Link::new(stream)
            .with_timeout(Some(config.response_timeout))
            .with_read_buffer_size(config.read_buffer_size)
            .with_max_resync_bytes(config.max_resync_bytes))
    }
}

impl<S> Link<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an established stream. Receives wait forever until a timeout
    /// is set.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: BytesMut::with_capacity(DEFAULT_READ_BUFFER_SIZE),
            read_buf: vec![0u8; DEFAULT_READ_BUFFER_SIZE],
            timeout: None,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
            stats: ParseStats::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buf = vec![0u8; size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE)];
        self
    }

    pub fn with_max_resync_bytes(mut self, bytes: u64) -> Self {
        self.max_resync_bytes = bytes;
        self
    }

    /// Builds `msg` and writes its fragments.
    pub async fn send(&mut self, msg: &mut Message) -> Result<(), LinkError> {
        msg.build()?;
        tracing::debug!(
            dest = msg.dest,
            control = ?msg.control,
            seq = msg.application_seq,
            bytes = msg.wire().len(),
            "sending message"
        );
        self.stream.write_all(msg.wire()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Waits for the next complete message.
    pub async fn receive(&mut self) -> Result<Message, LinkError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.receive_inner())
                .await
                .map_err(|_| {
                    tracing::debug!("Receive timeout");
                    LinkError::Timeout
                })?,
            None => self.receive_inner().await,
        }
    }

    async fn receive_inner(&mut self) -> Result<Message, LinkError> {
        let mut msg = Message::new();
        let mut before = msg.stats();

        loop {
            if !self.pending.is_empty() {
                let feed = msg.feed(&self.pending);
                self.pending.advance(feed.consumed);

                let now = msg.stats();
                self.stats.resyncs += now.resyncs - before.resyncs;
                self.stats.discarded_bytes += now.discarded_bytes - before.discarded_bytes;
                before = now;

                match feed.status {
                    FeedStatus::Complete => {
                        tracing::debug!(
                            source = msg.source,
                            control = ?msg.control,
                            fragments = msg.fragment_count(),
                            "received message"
                        );
                        return Ok(msg);
                    }
                    FeedStatus::Corrupt => {
                        tracing::warn!("Peer sent an oversized message");
                        return Err(LinkError::Corrupt);
                    }
                    FeedStatus::Incomplete => {}
                }

                if now.discarded_bytes > self.max_resync_bytes {
                    tracing::warn!(discarded = now.discarded_bytes, "Resync limit reached");
                    return Err(LinkError::ResyncLimit {
                        discarded: now.discarded_bytes,
                    });
                }
            }

            let n = self.stream.read(&mut self.read_buf).await?;
            if n == 0 {
                tracing::debug!("Connection closed (0 bytes)");
                return Err(LinkError::ConnectionClosed);
            }
            self.pending.extend_from_slice(&self.read_buf[..n]);
        }
    }

    /// Resync counters accumulated over every receive.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Shuts down the write side of the stream.
    pub async fn close(&mut self) -> Result<(), LinkError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
