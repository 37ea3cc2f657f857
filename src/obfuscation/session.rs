//! `tls1.2_ticket_auth` session state machine
//!
//! Client: `Init → HelloSent → Established`
//! Server: `Init → HelloReceived → HelloSent → Established`
//!
//! Transitions happen only inside the four `Obfs` operations and never go
//! backwards.

use super::auth::{pack_auth_data, verify_auth_data, ObfsAuthData};
use super::clock::{Clock, SystemClock};
use super::hello::{
    build_client_finish, build_client_hello, build_server_hello, parse_client_finish,
    parse_client_hello, parse_server_hello, MAX_HANDSHAKE_LEN, SESSION_TICKET_LEN,
};
use super::record::{RecordFramer, RECORD_HEADER_LEN};
use super::{ClientDecoded, Obfs, ObfsError, Role, ServerDecoded, ServerInfo};
use crate::crypto::random_bytes;
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing exchanged yet
    Init,
    /// Server: ClientHello verified, ServerHello not yet sent
    HelloReceived,
    /// Our hello flight is on the wire
    HelloSent,
    /// Handshake complete, records only
    Established,
}

/// One connection's TLS disguise
pub struct ObfsTls {
    info: ServerInfo,
    role: Role,
    state: HandshakeState,
    auth: ObfsAuthData,
    framer: RecordFramer,
    clock: Arc<dyn Clock>,
    /// SNI host chosen for this session (client)
    host: String,
    /// Session ticket sent in the ClientHello (client)
    ticket: Vec<u8>,
    /// Records held back until the handshake completes (client)
    send_buffer: BytesMut,
    recv_buffer: BytesMut,
}

impl ObfsTls {
    /// Create a client session
    pub fn client(info: ServerInfo) -> Self {
        let host = info.disguise_host();
        let mut ticket = vec![0u8; SESSION_TICKET_LEN];
        random_bytes(&mut ticket);
        Self::new(info, Role::Client, host, ticket)
    }

    /// Create a server session
    pub fn server(info: ServerInfo) -> Self {
        Self::new(info, Role::Server, String::new(), Vec::new())
    }

    fn new(info: ServerInfo, role: Role, host: String, ticket: Vec<u8>) -> Self {
        Self {
            framer: RecordFramer::from_info(&info),
            info,
            role,
            state: HandshakeState::Init,
            auth: ObfsAuthData::new(),
            clock: Arc::new(SystemClock),
            host,
            ticket,
            send_buffer: BytesMut::new(),
            recv_buffer: BytesMut::new(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Current handshake state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Role of this session
    pub fn role(&self) -> Role {
        self.role
    }

    /// Per-connection authentication state
    pub fn auth_data(&self) -> &ObfsAuthData {
        &self.auth
    }

    /// Connection parameters
    pub fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    fn expect_role(&self, role: Role) -> Result<(), ObfsError> {
        if self.role == role {
            Ok(())
        } else {
            Err(ObfsError::WrongRole(self.role))
        }
    }

    fn check_handshake_buffer(&self) -> Result<(), ObfsError> {
        if self.recv_buffer.len() > MAX_HANDSHAKE_LEN + RECORD_HEADER_LEN {
            return Err(ObfsError::InvalidRecord(format!(
                "Handshake exceeds {} bytes",
                MAX_HANDSHAKE_LEN
            )));
        }
        Ok(())
    }

    /// Decode every complete record in the receive buffer
    fn drain_records(&mut self) -> Result<Bytes, ObfsError> {
        let decoded = self.framer.decode_stream(&self.recv_buffer)?;
        self.recv_buffer.advance(decoded.consumed);
        if decoded.need_more {
            trace!(buffered = self.recv_buffer.len(), "waiting for rest of record");
        }
        Ok(decoded.payload)
    }

    fn encode_records(&self, buf: &[u8]) -> Bytes {
        let mut out = BytesMut::new();
        self.framer.encode(buf, &mut out);
        out.freeze()
    }
}

impl Obfs for ObfsTls {
    fn client_encode(&mut self, buf: &[u8]) -> Result<Bytes, ObfsError> {
        self.expect_role(Role::Client)?;

        match self.state {
            HandshakeState::Init => {
                self.framer.encode(buf, &mut self.send_buffer);

                let now = self.clock.unix_time();
                let tag = pack_auth_data(&self.info.key, &self.auth.client_id, now);
                self.auth.timestamp = now;

                let hello = build_client_hello(&tag, &self.auth.client_id, &self.host, &self.ticket);
                debug!(
                    host = %self.host,
                    port = self.info.port,
                    len = hello.len(),
                    "Sending ClientHello"
                );
                self.state = HandshakeState::HelloSent;
                Ok(hello.freeze())
            }
            HandshakeState::HelloSent => {
                self.framer.encode(buf, &mut self.send_buffer);
                Ok(Bytes::new())
            }
            HandshakeState::Established => {
                let mut out = BytesMut::new();
                if !self.auth.sent {
                    out.extend_from_slice(&build_client_finish(&self.info.key, &self.auth.client_id));
                    out.extend_from_slice(&self.send_buffer.split());
                    self.auth.sent = true;
                    trace!(len = out.len(), "Sending Finished with buffered data");
                }
                self.framer.encode(buf, &mut out);
                Ok(out.freeze())
            }
            HandshakeState::HelloReceived => Err(ObfsError::OutOfOrder("client in server state")),
        }
    }

    fn client_decode(&mut self, buf: &[u8]) -> Result<ClientDecoded, ObfsError> {
        self.expect_role(Role::Client)?;

        match self.state {
            HandshakeState::Init | HandshakeState::HelloReceived => {
                Err(ObfsError::OutOfOrder("data received before ClientHello was sent"))
            }
            HandshakeState::HelloSent => {
                self.recv_buffer.extend_from_slice(buf);

                let Some(consumed) =
                    parse_server_hello(&self.recv_buffer, &self.info.key, &self.auth.client_id)?
                else {
                    self.check_handshake_buffer()?;
                    return Ok(ClientDecoded::default());
                };

                self.recv_buffer.advance(consumed);
                self.auth.received = true;
                self.state = HandshakeState::Established;
                debug!(flight = consumed, "Server handshake verified");

                Ok(ClientDecoded {
                    payload: self.drain_records()?,
                    handshake_done: true,
                })
            }
            HandshakeState::Established => {
                self.recv_buffer.extend_from_slice(buf);
                Ok(ClientDecoded {
                    payload: self.drain_records()?,
                    handshake_done: false,
                })
            }
        }
    }

    fn server_encode(&mut self, buf: &[u8]) -> Result<Bytes, ObfsError> {
        self.expect_role(Role::Server)?;

        match self.state {
            HandshakeState::Init => Err(ObfsError::OutOfOrder(
                "ServerHello requested before a ClientHello arrived",
            )),
            HandshakeState::HelloReceived => {
                let now = self.clock.unix_time();
                let tag = pack_auth_data(&self.info.key, &self.auth.client_id, now);

                let mut out = build_server_hello(&self.info.key, &self.auth.client_id, &tag);
                trace!(len = out.len(), "Sending ServerHello flight");
                self.auth.sent = true;
                self.state = HandshakeState::HelloSent;

                self.framer.encode(buf, &mut out);
                Ok(out.freeze())
            }
            HandshakeState::HelloSent | HandshakeState::Established => Ok(self.encode_records(buf)),
        }
    }

    fn server_decode(&mut self, buf: &[u8]) -> Result<ServerDecoded, ObfsError> {
        self.expect_role(Role::Server)?;
        self.recv_buffer.extend_from_slice(buf);

        match self.state {
            HandshakeState::Init => {
                let Some((hello, consumed)) = parse_client_hello(&self.recv_buffer)? else {
                    self.check_handshake_buffer()?;
                    return Ok(ServerDecoded::default());
                };

                let now = self.clock.unix_time();
                let timestamp = verify_auth_data(
                    &self.info.key,
                    &hello.client_id,
                    &hello.auth,
                    now,
                    self.info.max_time_skew(),
                )
                .map_err(|e| {
                    warn!(error = %e, "Rejecting ClientHello");
                    e
                })?;

                // Anything after the hello waits for the client's Finished
                self.recv_buffer.advance(consumed);
                self.auth.client_id = hello.client_id;
                self.auth.timestamp = timestamp;
                self.auth.received = true;
                self.state = HandshakeState::HelloReceived;
                debug!(sni = ?hello.server_name, timestamp, "ClientHello accepted");

                Ok(ServerDecoded {
                    payload: Bytes::new(),
                    handshake_done: false,
                    needs_reply: true,
                })
            }
            HandshakeState::HelloReceived => {
                self.check_handshake_buffer()?;
                Ok(ServerDecoded::default())
            }
            HandshakeState::HelloSent => {
                let Some(consumed) =
                    parse_client_finish(&self.recv_buffer, &self.info.key, &self.auth.client_id)?
                else {
                    self.check_handshake_buffer()?;
                    return Ok(ServerDecoded::default());
                };

                self.recv_buffer.advance(consumed);
                self.state = HandshakeState::Established;
                debug!("Client Finished verified");

                Ok(ServerDecoded {
                    payload: self.drain_records()?,
                    handshake_done: true,
                    needs_reply: false,
                })
            }
            HandshakeState::Established => Ok(ServerDecoded {
                payload: self.drain_records()?,
                handshake_done: false,
                needs_reply: false,
            }),
        }
    }

    fn overhead(&self) -> usize {
        RECORD_HEADER_LEN
    }

    fn is_established(&self) -> bool {
        self.state == HandshakeState::Established
    }
}
