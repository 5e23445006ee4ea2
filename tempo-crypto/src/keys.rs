//! Key identities and the session key exchange
//!
//! An endpoint is identified by a [`LongLivedKey`]: a name plus an
//! uplink/downlink key pair shared out of band. Session keys are minted per
//! connection: the client seals an empty key request under the long-lived
//! key, and the server replies with a fresh [`KeyMessage`] carrying the
//! session key pair and the client's node id. Replies are throttled so a
//! blind retransmit loop can't make the server grind out key material.

use crate::session::{Base64Key, KeyError, Session};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ring::rand::SystemRandom;
use tracing::debug;

/// Trailing id byte of a key-request datagram.
pub const KEY_REQUEST_ID: u8 = 254;

/// Trailing id byte of a key-reply datagram.
pub const KEY_REPLY_ID: u8 = 255;

/// Minimum spacing between key replies to one requester.
pub const REPLY_INTERVAL_NS: u64 = 250_000_000;

const MAX_NAME_LEN: usize = 63;

/// Uplink/downlink key pair for one direction of a session.
#[derive(Clone)]
pub struct KeyPair {
    pub uplink: Base64Key,
    pub downlink: Base64Key,
}

impl KeyPair {
    pub fn random(rng: &SystemRandom) -> Result<Self, KeyError> {
        Ok(KeyPair {
            uplink: Base64Key::random(rng)?,
            downlink: Base64Key::random(rng)?,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.uplink.as_bytes());
        buf.put_slice(self.downlink.as_bytes());
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self, KeyError> {
        if buf.remaining() < 32 {
            return Err(KeyError::BadLength);
        }
        let uplink = Base64Key::from_bytes(&buf.split_to(16))?;
        let downlink = Base64Key::from_bytes(&buf.split_to(16))?;
        Ok(KeyPair { uplink, downlink })
    }
}

/// A named long-lived identity key, as stored in key files.
#[derive(Clone)]
pub struct LongLivedKey {
    name: String,
    key_pair: KeyPair,
}

impl LongLivedKey {
    pub fn generate(name: &str, rng: &SystemRandom) -> Result<Self, KeyError> {
        if name.len() > MAX_NAME_LEN {
            return Err(KeyError::BadLength);
        }
        Ok(LongLivedKey {
            name: name.to_string(),
            key_pair: KeyPair::random(rng)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(33 + self.name.len());
        self.key_pair.encode(&mut buf);
        buf.put_u8(self.name.len() as u8);
        buf.put_slice(self.name.as_bytes());
        buf.freeze()
    }

    /// Failure to decode a key file is fatal to the caller, unlike packet
    /// parse failures.
    pub fn decode(mut buf: Bytes) -> Result<Self, KeyError> {
        let key_pair = KeyPair::decode(&mut buf)?;
        if buf.remaining() < 1 {
            return Err(KeyError::BadLength);
        }
        let name_len = buf.get_u8() as usize;
        if name_len > MAX_NAME_LEN || buf.remaining() < name_len {
            return Err(KeyError::BadLength);
        }
        let name = String::from_utf8(buf.split_to(name_len).to_vec())
            .map_err(|_| KeyError::BadEncoding)?;
        Ok(LongLivedKey { name, key_pair })
    }
}

/// Payload of a key reply: the assigned node id plus fresh session keys.
#[derive(Clone)]
pub struct KeyMessage {
    pub node_id: u8,
    pub key_pair: KeyPair,
}

impl KeyMessage {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(33);
        buf.put_u8(self.node_id);
        self.key_pair.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, KeyError> {
        if buf.remaining() < 1 {
            return Err(KeyError::BadLength);
        }
        let node_id = buf.get_u8();
        let key_pair = KeyPair::decode(&mut buf)?;
        Ok(KeyMessage { node_id, key_pair })
    }
}

/// Seal a key request: an empty plaintext under the long-lived key, with
/// the request id as associated data and as the trailing byte.
pub fn make_key_request(long_lived: &mut Session) -> Vec<u8> {
    let mut wire = long_lived.seal(&[KEY_REQUEST_ID], &[]);
    wire.push(KEY_REQUEST_ID);
    wire
}

/// Open a key reply received in response to a request.
pub fn open_key_reply(long_lived: &Session, wire: &[u8]) -> Option<KeyMessage> {
    let body = wire.strip_suffix(&[KEY_REPLY_ID])?;
    let plaintext = long_lived.open(&[KEY_REPLY_ID], body)?;
    KeyMessage::decode(Bytes::from(plaintext)).ok()
}

/// Server-side responder for one known client.
///
/// Holds the client's long-lived session and answers authentic key
/// requests with fresh session keys, at most once per
/// [`REPLY_INTERVAL_NS`].
pub struct KeyResponder {
    long_lived: Session,
    node_id: u8,
    next_reply_allowed_ns: u64,
    key_requests: u64,
    key_replies: u64,
}

impl KeyResponder {
    /// `key` is the client's long-lived key as the server holds it, so the
    /// server decrypts the client's uplink and encrypts its downlink.
    pub fn new(key: &LongLivedKey, node_id: u8) -> Self {
        KeyResponder {
            long_lived: Session::new(&key.key_pair().downlink, &key.key_pair().uplink),
            node_id,
            next_reply_allowed_ns: 0,
            key_requests: 0,
            key_replies: 0,
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn request_counts(&self) -> (u64, u64) {
        (self.key_requests, self.key_replies)
    }

    /// Handle a candidate key-request datagram.
    ///
    /// Returns the sealed reply and the freshly minted session keys, or
    /// `None` if the request is inauthentic or arrives inside the throttle
    /// window.
    pub fn handle_request(
        &mut self,
        wire: &[u8],
        now_ns: u64,
        rng: &SystemRandom,
    ) -> Option<(Vec<u8>, KeyPair)> {
        let body = wire.strip_suffix(&[KEY_REQUEST_ID])?;
        let plaintext = self.long_lived.open(&[KEY_REQUEST_ID], body)?;
        if !plaintext.is_empty() {
            return None;
        }
        self.key_requests += 1;

        if now_ns < self.next_reply_allowed_ns {
            debug!(node_id = self.node_id, "key request throttled");
            return None;
        }
        self.next_reply_allowed_ns = now_ns + REPLY_INTERVAL_NS;

        let key_pair = KeyPair::random(rng).ok()?;
        let message = KeyMessage {
            node_id: self.node_id,
            key_pair: key_pair.clone(),
        };

        let mut reply = self.long_lived.seal(&[KEY_REPLY_ID], &message.encode());
        reply.push(KEY_REPLY_ID);
        self.key_replies += 1;

        Some((reply, key_pair))
    }
}
