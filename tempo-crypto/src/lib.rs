//! Tempo Encryption
//!
//! AEAD sessions for the tempo transport: every packet is sealed under a
//! per-session key with the sending node's id as associated data, and a
//! long-lived named key bootstraps fresh session keys via a tiny
//! request/reply exchange. The AEAD backend is Ring (AES-128-GCM).

pub mod keys;
pub mod session;

pub use keys::{KeyMessage, KeyPair, KeyResponder, LongLivedKey, KEY_REPLY_ID, KEY_REQUEST_ID};
pub use session::{Base64Key, KeyError, Session, NONCE_LEN, TAG_LEN};
