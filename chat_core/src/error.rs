// rsa_chat/chat_core/src/error.rs

/// Errors surfaced by the cryptographic engine and the messaging protocol.
#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    /// Prime search exceeded its retry bound. Should never trip for sane
    /// bit lengths; the bound exists so a broken RNG cannot spin forever.
    #[error("prime generation gave up after {0} attempts")]
    KeyGenerationExhausted(u32),

    /// Requested key or prime size is odd, zero, or too small to generate.
    #[error("unsupported key length of {0} bits")]
    InvalidKeyLength(u64),

    /// An operation needed a key that has not been generated or received.
    #[error("missing key: {0}")]
    State(&'static str),

    /// Send attempted before the key exchange with the peer completed.
    #[error("cannot send: key exchange with the peer is not complete")]
    NotReady,

    /// Malformed frame body, handshake line, or envelope.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The byte stream to the peer is closed.
    #[error("transport closed")]
    TransportClosed,

    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    /// Stored key material is absent or unreadable.
    #[error("no valid stored key: {0}")]
    NoStoredKey(String),

    /// An arithmetic invariant the key generator guarantees was violated.
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}
