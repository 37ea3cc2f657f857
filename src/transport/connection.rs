//! Obfuscated connection over a byte stream

use super::{TransportConfig, TransportError};
use crate::obfuscation::{Obfs, Role};
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Disguise handshake in progress
    Handshake,
    /// Ready for data
    Connected,
    /// Peer finished sending
    Closed,
}

/// A stream wrapped in an obfuscation session
pub struct ObfsConnection<S> {
    stream: S,
    obfs: Box<dyn Obfs>,
    role: Role,
    state: ConnectionState,
    config: TransportConfig,
    read_buf: Vec<u8>,
    /// Our write half has been shut down
    write_closed: bool,
    /// Payload that arrived together with handshake bytes
    pending: Option<Bytes>,
}

impl<S> ObfsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S, obfs: Box<dyn Obfs>, role: Role, config: TransportConfig) -> Self {
        let read_buf = vec![0u8; config.read_buffer_size.max(1)];
        Self {
            stream,
            obfs,
            role,
            state: ConnectionState::Handshake,
            config,
            read_buf,
            write_closed: false,
            pending: None,
        }
    }

    /// Run the client handshake over `stream`
    pub async fn connect(
        stream: S,
        obfs: Box<dyn Obfs>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.handshake_timeout);
        let mut conn = Self::new(stream, obfs, Role::Client, config);

        tokio::time::timeout(timeout, conn.client_handshake())
            .await
            .map_err(|_| TransportError::Timeout)??;

        conn.state = ConnectionState::Connected;
        Ok(conn)
    }

    /// Run the server handshake over `stream`
    pub async fn accept(
        stream: S,
        obfs: Box<dyn Obfs>,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.handshake_timeout);
        let mut conn = Self::new(stream, obfs, Role::Server, config);

        tokio::time::timeout(timeout, conn.server_handshake())
            .await
            .map_err(|_| TransportError::Timeout)??;

        conn.state = ConnectionState::Connected;
        Ok(conn)
    }

    async fn client_handshake(&mut self) -> Result<(), TransportError> {
        let hello = self.obfs.client_encode(&[])?;
        self.write_wire(&hello).await?;

        let mut early = Vec::new();
        while !self.obfs.is_established() {
            let n = self.read_wire().await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            let decoded = self.obfs.client_decode(&self.read_buf[..n])?;
            early.extend_from_slice(&decoded.payload);
        }

        // Flushes the Finished flight
        let finish = self.obfs.client_encode(&[])?;
        self.write_wire(&finish).await?;

        if !early.is_empty() {
            self.pending = Some(Bytes::from(early));
        }
        debug!("Client handshake complete");
        Ok(())
    }

    async fn server_handshake(&mut self) -> Result<(), TransportError> {
        let mut early = Vec::new();
        while !self.obfs.is_established() {
            let n = self.read_wire().await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            let decoded = self.obfs.server_decode(&self.read_buf[..n])?;
            early.extend_from_slice(&decoded.payload);

            if decoded.needs_reply {
                let flight = self.obfs.server_encode(&[])?;
                self.write_wire(&flight).await?;
                // The client's Finished arrives with its first data
                break;
            }
        }

        if !early.is_empty() {
            self.pending = Some(Bytes::from(early));
        }
        debug!("Server handshake complete");
        Ok(())
    }

    async fn read_wire(&mut self) -> Result<usize, TransportError> {
        let n = self.stream.read(&mut self.read_buf).await?;
        trace!(bytes = n, "Read from wire");
        Ok(n)
    }

    async fn write_wire(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Ok(());
        }

        let timeout = Duration::from_secs(self.config.write_timeout);
        tokio::time::timeout(timeout, self.stream.write_all(data))
            .await
            .map_err(|_| TransportError::Timeout)??;
        trace!(bytes = data.len(), "Wrote to wire");
        Ok(())
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Role of this end
    pub fn role(&self) -> Role {
        self.role
    }

    /// Send payload bytes
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.write_closed {
            return Err(TransportError::Closed);
        }

        let wire = match self.role {
            Role::Client => self.obfs.client_encode(data)?,
            Role::Server => self.obfs.server_encode(data)?,
        };
        self.write_wire(&wire).await
    }

    /// Receive the next non-empty payload, or `None` once the peer closes
    ///
    /// Cancel safe: the only await point is the socket read.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }

        loop {
            if self.state == ConnectionState::Closed {
                return Ok(None);
            }

            let n = self.read_wire().await?;
            if n == 0 {
                self.state = ConnectionState::Closed;
                return Ok(None);
            }

            let payload = match self.role {
                Role::Client => self.obfs.client_decode(&self.read_buf[..n])?.payload,
                Role::Server => self.obfs.server_decode(&self.read_buf[..n])?.payload,
            };
            if !payload.is_empty() {
                return Ok(Some(payload));
            }
        }
    }

    /// Shut down the write half of the stream
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.write_closed = true;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Unwrap the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}
