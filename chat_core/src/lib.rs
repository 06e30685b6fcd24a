// rsa_chat/chat_core/src/lib.rs

pub mod error;
pub mod framing;
pub mod models;
pub mod protocol;
pub mod rsa;
pub mod session;
pub mod sha256;

// Re-exports for the application crates.
pub use error::ChatError;
pub use framing::{encode_frame, FrameDecoder, HEADER_SIZE};
pub use models::{ChatEnvelope, StoredKeys, KEY_EXCHANGE_PREFIX};
pub use protocol::{recv_loop, ChatEvent, Connection};
pub use rsa::{
    generate_keypair, keypair_from_fields, KeyPair, PrivateKey, PublicKey, DEFAULT_KEY_LENGTH,
};
pub use session::{Role, Session, SharedSession};
pub use sha256::{format_hash_hex, sha256_from_bytes};
