//! Disguise handshake messages
//!
//! Builds and parses the three flights of the fake TLS 1.2 handshake:
//!
//! ```text
//! client                                         server
//!   ClientHello (tag in random, id in session_id) ->
//!                      <- ServerHello (tag keyed with the client id)
//!                      <- [NewSessionTicket]
//!                      <- ChangeCipherSpec
//!                      <- Finished (HMAC over the flight)
//!   ChangeCipherSpec                              ->
//!   Finished (HMAC over the flight)               ->
//! ```
//!
//! The ClientHello layout is fixed down to the byte. Only the tag, the
//! client id, the SNI name and the session ticket contents vary.

use super::auth::{sign, verify_signature, AUTH_DATA_LEN, AUTH_HMAC_LEN, CLIENT_ID_LEN};
use super::record::{put_record, ContentType, RecordHeader, RECORD_HEADER_LEN, TLS_VERSION};
use super::ObfsError;
use crate::crypto::{random_bytes, random_u16};
use bytes::{BufMut, BytesMut};

/// Length of the session ticket carried in the ClientHello
pub const SESSION_TICKET_LEN: usize = 384;

/// Largest handshake flight we are willing to buffer
pub const MAX_HANDSHAKE_LEN: usize = 16 * 1024;

/// Longest DNS host name carried in the SNI extension
pub const MAX_HOST_NAME_LEN: usize = 255;

/// Record version of the ClientHello (TLS 1.0, as browsers send it)
const CLIENT_HELLO_RECORD_VERSION: [u8; 2] = [0x03, 0x01];

const HANDSHAKE_HEADER_LEN: usize = 4;

const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const HANDSHAKE_NEW_SESSION_TICKET: u8 = 0x04;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SESSION_TICKET: u16 = 0x0023;

const SNI_HOST_NAME: u8 = 0x00;

/// Cipher suite list, length-prefixed
const CLIENT_CIPHER_SUITES: [u8; 30] = [
    0x00, 0x1c, // length
    0xc0, 0x2b, // ECDHE_ECDSA_AES_128_GCM_SHA256
    0xc0, 0x2f, // ECDHE_RSA_AES_128_GCM_SHA256
    0xcc, 0xa9, // ECDHE_ECDSA_CHACHA20_POLY1305
    0xcc, 0xa8, // ECDHE_RSA_CHACHA20_POLY1305
    0xcc, 0x14, // ECDHE_ECDSA_CHACHA20_POLY1305 (draft)
    0xcc, 0x13, // ECDHE_RSA_CHACHA20_POLY1305 (draft)
    0xc0, 0x0a, // ECDHE_ECDSA_AES_256_CBC_SHA
    0xc0, 0x14, // ECDHE_RSA_AES_256_CBC_SHA
    0xc0, 0x09, // ECDHE_ECDSA_AES_128_CBC_SHA
    0xc0, 0x13, // ECDHE_RSA_AES_128_CBC_SHA
    0x00, 0x9c, // RSA_AES_128_GCM_SHA256
    0x00, 0x35, // RSA_AES_256_CBC_SHA
    0x00, 0x2f, // RSA_AES_128_CBC_SHA
    0x00, 0x0a, // RSA_3DES_EDE_CBC_SHA
];

/// One compression method: null
const COMPRESSION_METHODS: [u8; 2] = [0x01, 0x00];

const EXT_RENEGOTIATION_INFO: [u8; 5] = [0xff, 0x01, 0x00, 0x01, 0x00];

const EXT_EXTENDED_MASTER_SECRET: [u8; 4] = [0x00, 0x17, 0x00, 0x00];

const EXT_SIGNATURE_ALGORITHMS: [u8; 26] = [
    0x00, 0x0d, 0x00, 0x16, 0x00, 0x14, //
    0x06, 0x01, 0x06, 0x03, 0x05, 0x01, 0x05, 0x03, 0x04, 0x01, //
    0x04, 0x03, 0x03, 0x01, 0x03, 0x03, 0x02, 0x01, 0x02, 0x03,
];

const EXT_STATUS_REQUEST: [u8; 9] = [0x00, 0x05, 0x00, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00];

const EXT_SIGNED_CERT_TIMESTAMP: [u8; 4] = [0x00, 0x12, 0x00, 0x00];

const EXT_CHANNEL_ID: [u8; 4] = [0x75, 0x50, 0x00, 0x00];

const EXT_EC_POINT_FORMATS: [u8; 6] = [0x00, 0x0b, 0x00, 0x02, 0x01, 0x00];

/// secp256r1, secp384r1
const EXT_SUPPORTED_GROUPS: [u8; 10] = [0x00, 0x0a, 0x00, 0x06, 0x00, 0x04, 0x00, 0x17, 0x00, 0x18];

/// ECDHE_RSA_AES_128_GCM_SHA256, null compression, renegotiation_info
const SERVER_HELLO_TAIL: [u8; 10] = [0xc0, 0x2f, 0x00, 0x00, 0x05, 0xff, 0x01, 0x00, 0x01, 0x00];

const CHANGE_CIPHER_SPEC: [u8; 6] = [0x14, 0x03, 0x03, 0x00, 0x01, 0x01];

/// Header of the client Finished record (32-byte body)
const CLIENT_FINISHED_HEADER: [u8; 5] = [0x16, 0x03, 0x03, 0x00, 0x20];

/// Fields of a parsed ClientHello that matter to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Authentication tag from the `random` field
    pub auth: [u8; AUTH_DATA_LEN],
    /// Client identifier from the session-id field
    pub client_id: [u8; CLIENT_ID_LEN],
    /// Host name from the SNI extension, if any
    pub server_name: Option<String>,
}

/// Encode the server_name extension for `host`
pub fn sni(host: &str) -> Vec<u8> {
    let name = host.as_bytes();
    debug_assert!(name.len() <= MAX_HOST_NAME_LEN, "SNI host too long");
    let mut ext = Vec::with_capacity(name.len() + 9);

    ext.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
    ext.extend_from_slice(&((name.len() + 5) as u16).to_be_bytes());
    ext.extend_from_slice(&((name.len() + 3) as u16).to_be_bytes());
    ext.push(SNI_HOST_NAME);
    ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
    ext.extend_from_slice(name);
    ext
}

fn put_handshake_header(out: &mut BytesMut, msg_type: u8, len: usize) {
    out.put_u8(msg_type);
    out.put_u8((len >> 16) as u8);
    out.put_u16(len as u16);
}

/// Build the disguise ClientHello record
pub fn build_client_hello(
    auth: &[u8; AUTH_DATA_LEN],
    client_id: &[u8; CLIENT_ID_LEN],
    host: &str,
    ticket: &[u8],
) -> BytesMut {
    debug_assert!(ticket.len() <= MAX_HANDSHAKE_LEN, "session ticket too long");
    let mut ext = BytesMut::with_capacity(128 + host.len() + ticket.len());
    ext.put_slice(&EXT_RENEGOTIATION_INFO);
    ext.put_slice(&sni(host));
    ext.put_slice(&EXT_EXTENDED_MASTER_SECRET);
    ext.put_u16(EXT_SESSION_TICKET);
    ext.put_u16(ticket.len() as u16);
    ext.put_slice(ticket);
    ext.put_slice(&EXT_SIGNATURE_ALGORITHMS);
    ext.put_slice(&EXT_STATUS_REQUEST);
    ext.put_slice(&EXT_SIGNED_CERT_TIMESTAMP);
    ext.put_slice(&EXT_CHANNEL_ID);
    ext.put_slice(&EXT_EC_POINT_FORMATS);
    ext.put_slice(&EXT_SUPPORTED_GROUPS);

    let body_len = 2 + AUTH_DATA_LEN + 1 + CLIENT_ID_LEN
        + CLIENT_CIPHER_SUITES.len()
        + COMPRESSION_METHODS.len()
        + 2
        + ext.len();
    let record_len = HANDSHAKE_HEADER_LEN + body_len;

    let mut out = BytesMut::with_capacity(RECORD_HEADER_LEN + record_len);
    out.put_u8(ContentType::Handshake as u8);
    out.put_slice(&CLIENT_HELLO_RECORD_VERSION);
    out.put_u16(record_len as u16);
    put_handshake_header(&mut out, HANDSHAKE_CLIENT_HELLO, body_len);
    out.put_slice(&TLS_VERSION);
    out.put_slice(auth);
    out.put_u8(CLIENT_ID_LEN as u8);
    out.put_slice(client_id);
    out.put_slice(&CLIENT_CIPHER_SUITES);
    out.put_slice(&COMPRESSION_METHODS);
    out.put_u16(ext.len() as u16);
    out.put_slice(&ext);
    out
}

/// Bounds-checked cursor over a handshake message
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], ObfsError> {
        if self.buf.len() < n {
            return Err(ObfsError::InvalidRecord(format!("Truncated {}", what)));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self, what: &str) -> Result<u8, ObfsError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, ObfsError> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self, what: &str) -> Result<usize, ObfsError> {
        let b = self.take(3, what)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self, what: &str) -> Result<&'a [u8], ObfsError> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn vec16(&mut self, what: &str) -> Result<&'a [u8], ObfsError> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }
}

/// True if the bytes present so far agree with `expected`
fn matches_prefix(buf: &[u8], expected: &[u8]) -> bool {
    let n = buf.len().min(expected.len());
    buf[..n] == expected[..n]
}

/// Parse a ClientHello from the front of `buf`
///
/// Returns `None` until the whole record has arrived, then the parsed hello
/// and the number of bytes it occupied. The tag is not verified here.
pub fn parse_client_hello(buf: &[u8]) -> Result<Option<(ClientHello, usize)>, ObfsError> {
    let expected = [ContentType::Handshake as u8, 0x03, 0x01];
    if !matches_prefix(buf, &expected) {
        return Err(ObfsError::InvalidRecord("Not a ClientHello record".to_string()));
    }

    let Some(header) = RecordHeader::peek(buf) else {
        return Ok(None);
    };
    if header.length > MAX_HANDSHAKE_LEN {
        return Err(ObfsError::InvalidRecord(format!(
            "ClientHello too large: {}",
            header.length
        )));
    }
    if buf.len() < header.total_len() {
        return Ok(None);
    }

    let mut record = Reader::new(&buf[RECORD_HEADER_LEN..header.total_len()]);
    if record.u8("handshake type")? != HANDSHAKE_CLIENT_HELLO {
        return Err(ObfsError::InvalidRecord("Not a ClientHello message".to_string()));
    }
    let body_len = record.u24("handshake length")?;
    if body_len != record.remaining() {
        return Err(ObfsError::InvalidRecord(format!(
            "ClientHello length mismatch: {} != {}",
            body_len,
            record.remaining()
        )));
    }

    if record.take(2, "version")? != TLS_VERSION {
        return Err(ObfsError::InvalidRecord("Wrong ClientHello version".to_string()));
    }

    let mut auth = [0u8; AUTH_DATA_LEN];
    auth.copy_from_slice(record.take(AUTH_DATA_LEN, "random")?);

    let session_id = record.vec8("session id")?;
    if session_id.len() != CLIENT_ID_LEN {
        return Err(ObfsError::InvalidRecord(format!(
            "Wrong session id length: {}",
            session_id.len()
        )));
    }
    let mut client_id = [0u8; CLIENT_ID_LEN];
    client_id.copy_from_slice(session_id);

    record.vec16("cipher suites")?;
    record.vec8("compression methods")?;

    let mut extensions = Reader::new(record.vec16("extensions")?);
    if record.remaining() != 0 {
        return Err(ObfsError::InvalidRecord("Trailing ClientHello bytes".to_string()));
    }

    let mut server_name = None;
    while extensions.remaining() > 0 {
        let ext_type = extensions.u16("extension type")?;
        let data = extensions.vec16("extension")?;
        if ext_type == EXT_SERVER_NAME {
            server_name = parse_server_name(data)?;
        }
    }

    Ok(Some((
        ClientHello {
            auth,
            client_id,
            server_name,
        },
        header.total_len(),
    )))
}

fn parse_server_name(data: &[u8]) -> Result<Option<String>, ObfsError> {
    let mut list = Reader::new(data);
    let mut entries = Reader::new(list.vec16("server name list")?);

    while entries.remaining() > 0 {
        let name_type = entries.u8("server name type")?;
        let name = entries.vec16("server name")?;
        if name_type == SNI_HOST_NAME && !name.is_empty() {
            return Ok(Some(String::from_utf8_lossy(name).into_owned()));
        }
    }
    Ok(None)
}

/// Build the server's handshake flight
///
/// `auth` is a tag packed for the client's id. The Finished record ends with
/// an HMAC over every byte of the flight before it.
pub fn build_server_hello(
    key: &[u8],
    client_id: &[u8; CLIENT_ID_LEN],
    auth: &[u8; AUTH_DATA_LEN],
) -> BytesMut {
    let mut out = BytesMut::with_capacity(1024);

    let body_len = 2 + AUTH_DATA_LEN + 1 + CLIENT_ID_LEN + SERVER_HELLO_TAIL.len();
    out.put_u8(ContentType::Handshake as u8);
    out.put_slice(&TLS_VERSION);
    out.put_u16((HANDSHAKE_HEADER_LEN + body_len) as u16);
    put_handshake_header(&mut out, HANDSHAKE_SERVER_HELLO, body_len);
    out.put_slice(&TLS_VERSION);
    out.put_slice(auth);
    out.put_u8(CLIENT_ID_LEN as u8);
    out.put_slice(client_id);
    out.put_slice(&SERVER_HELLO_TAIL);

    // Real servers only sometimes issue a ticket
    if random_u16() % 9 == 0 {
        let ticket_len = (random_u16() % 164) as usize * 2 + 64;
        let mut message = BytesMut::with_capacity(HANDSHAKE_HEADER_LEN + ticket_len);
        put_handshake_header(&mut message, HANDSHAKE_NEW_SESSION_TICKET, ticket_len);
        let start = message.len();
        message.resize(start + ticket_len, 0);
        random_bytes(&mut message[start..]);
        put_record(&mut out, ContentType::Handshake, TLS_VERSION, &message);
    }

    out.put_slice(&CHANGE_CIPHER_SPEC);

    let finished_len: usize = if random_u16() & 1 == 0 { 32 } else { 40 };
    out.put_u8(ContentType::Handshake as u8);
    out.put_slice(&TLS_VERSION);
    out.put_u16(finished_len as u16);
    let start = out.len();
    out.resize(start + finished_len - AUTH_HMAC_LEN, 0);
    random_bytes(&mut out[start..]);

    let digest = sign(key, client_id, &out);
    out.put_slice(&digest);
    out
}

/// Parse and verify the server's handshake flight from the front of `buf`
///
/// Returns `None` until the Finished record has arrived, then the length of
/// the flight.
pub fn parse_server_hello(
    buf: &[u8],
    key: &[u8],
    client_id: &[u8; CLIENT_ID_LEN],
) -> Result<Option<usize>, ObfsError> {
    let mut pos = 0;
    let mut seen_hello = false;
    let mut seen_change_cipher_spec = false;

    while let Some(header) = RecordHeader::peek(&buf[pos..]) {
        if header.version != TLS_VERSION {
            return Err(ObfsError::InvalidRecord(
                "Unexpected handshake record version".to_string(),
            ));
        }
        if header.length > MAX_HANDSHAKE_LEN {
            return Err(ObfsError::InvalidRecord(format!(
                "Handshake record too large: {}",
                header.length
            )));
        }
        let end = pos + header.total_len();
        if buf.len() < end {
            return Ok(None);
        }
        let body = &buf[pos + RECORD_HEADER_LEN..end];

        match (ContentType::try_from(header.content_type)?, seen_hello) {
            (ContentType::Handshake, false) => {
                verify_server_hello(body, key, client_id)?;
                seen_hello = true;
            }
            (ContentType::Handshake, true) if seen_change_cipher_spec => {
                if body.len() < AUTH_HMAC_LEN {
                    return Err(ObfsError::InvalidRecord("Finished too short".to_string()));
                }
                let mac_start = end - AUTH_HMAC_LEN;
                if !verify_signature(key, client_id, &buf[..mac_start], &buf[mac_start..end]) {
                    return Err(ObfsError::AuthMismatch);
                }
                return Ok(Some(end));
            }
            (ContentType::Handshake, true) => {
                if body.first() != Some(&HANDSHAKE_NEW_SESSION_TICKET) {
                    return Err(ObfsError::InvalidRecord(
                        "Unexpected message in server flight".to_string(),
                    ));
                }
            }
            (ContentType::ChangeCipherSpec, true) if !seen_change_cipher_spec => {
                seen_change_cipher_spec = true;
            }
            (other, _) => {
                return Err(ObfsError::InvalidRecord(format!(
                    "Unexpected {:?} record in server flight",
                    other
                )))
            }
        }

        pos = end;
    }

    Ok(None)
}

fn verify_server_hello(
    body: &[u8],
    key: &[u8],
    client_id: &[u8; CLIENT_ID_LEN],
) -> Result<(), ObfsError> {
    let mut hello = Reader::new(body);
    if hello.u8("handshake type")? != HANDSHAKE_SERVER_HELLO {
        return Err(ObfsError::InvalidRecord("Not a ServerHello message".to_string()));
    }
    hello.u24("handshake length")?;
    hello.take(2, "version")?;

    let auth = hello.take(AUTH_DATA_LEN, "random")?;
    let signed = AUTH_DATA_LEN - AUTH_HMAC_LEN;
    if !verify_signature(key, client_id, &auth[..signed], &auth[signed..]) {
        return Err(ObfsError::AuthMismatch);
    }

    if hello.vec8("session id")? != client_id {
        return Err(ObfsError::AuthMismatch);
    }
    Ok(())
}

/// Build the client's ChangeCipherSpec + Finished flight
pub fn build_client_finish(key: &[u8], client_id: &[u8; CLIENT_ID_LEN]) -> BytesMut {
    let mut out = BytesMut::with_capacity(CHANGE_CIPHER_SPEC.len() + CLIENT_FINISHED_HEADER.len() + 32);
    out.put_slice(&CHANGE_CIPHER_SPEC);
    out.put_slice(&CLIENT_FINISHED_HEADER);

    let start = out.len();
    out.resize(start + 32 - AUTH_HMAC_LEN, 0);
    random_bytes(&mut out[start..]);

    let digest = sign(key, client_id, &out);
    out.put_slice(&digest);
    out
}

/// Parse and verify the client's Finished flight from the front of `buf`
pub fn parse_client_finish(
    buf: &[u8],
    key: &[u8],
    client_id: &[u8; CLIENT_ID_LEN],
) -> Result<Option<usize>, ObfsError> {
    if !matches_prefix(buf, &CHANGE_CIPHER_SPEC) {
        return Err(ObfsError::InvalidRecord("Expected ChangeCipherSpec".to_string()));
    }

    let rest = &buf[buf.len().min(CHANGE_CIPHER_SPEC.len())..];
    if !matches_prefix(rest, &CLIENT_FINISHED_HEADER[..3]) {
        return Err(ObfsError::InvalidRecord("Expected Finished".to_string()));
    }

    let Some(header) = RecordHeader::peek(rest) else {
        return Ok(None);
    };
    if header.length < AUTH_HMAC_LEN || header.length > MAX_HANDSHAKE_LEN {
        return Err(ObfsError::InvalidRecord(format!(
            "Bad Finished length: {}",
            header.length
        )));
    }

    let end = CHANGE_CIPHER_SPEC.len() + header.total_len();
    if buf.len() < end {
        return Ok(None);
    }

    let mac_start = end - AUTH_HMAC_LEN;
    if !verify_signature(key, client_id, &buf[..mac_start], &buf[mac_start..end]) {
        return Err(ObfsError::AuthMismatch);
    }
    Ok(Some(end))
}
