// rsa_chat/chat_core/src/session.rs
//
// Shared state for one connection: the local keypair and whatever public
// key the peer has announced. Wrapped in a mutex because the receive task
// writes the remote key while the send path reads it.

use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;

use crate::error::ChatError;
use crate::rsa::{self, KeyPair, PublicKey};

/// Which side of the TCP connection this peer is. The listener re-announces
/// its key when it first learns the peer's; the initiator never does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Listener,
    Initiator,
}

#[derive(Debug)]
pub struct Session {
    role: Role,
    key_pair: Option<KeyPair>,
    remote_key: Option<PublicKey>,
}

pub type SharedSession = Arc<Mutex<Session>>;

impl Session {
    pub fn new(role: Role) -> Self {
        Session {
            role,
            key_pair: None,
            remote_key: None,
        }
    }

    pub fn with_key_pair(role: Role, key_pair: KeyPair) -> Self {
        Session {
            role,
            key_pair: Some(key_pair),
            remote_key: None,
        }
    }

    pub fn shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.key_pair.as_ref()
    }

    /// Installs a fresh keypair, invalidating the previous one as a whole.
    pub fn set_key_pair(&mut self, key_pair: KeyPair) {
        self.key_pair = Some(key_pair);
    }

    pub fn remote_key(&self) -> Option<&PublicKey> {
        self.remote_key.as_ref()
    }

    pub fn has_remote_key(&self) -> bool {
        self.remote_key.is_some()
    }

    /// Stores the peer's announced key (no pinning, a newer announcement
    /// wins). Returns whether a remote key was already known, which drives
    /// the listener's one-time reply.
    pub fn set_remote_key(&mut self, key: PublicKey) -> bool {
        self.remote_key.replace(key).is_some()
    }

    pub fn local_public_key(&self) -> Result<PublicKey, ChatError> {
        self.key_pair
            .as_ref()
            .map(|pair| pair.public_key.clone())
            .ok_or(ChatError::State("local key pair not generated"))
    }

    /// Encrypts outgoing text under the peer's public key.
    pub fn encrypt_for_peer(&self, plaintext: &str) -> Result<Vec<BigUint>, ChatError> {
        let remote = self.remote_key.as_ref().ok_or(ChatError::NotReady)?;
        Ok(rsa::encrypt(plaintext, remote))
    }

    /// Decrypts an incoming unit sequence with the local private key.
    pub fn decrypt(&self, units: &[BigUint]) -> Result<String, ChatError> {
        let pair = self
            .key_pair
            .as_ref()
            .ok_or(ChatError::State("local key pair not generated"))?;
        rsa::decrypt(units, pair)
    }

    /// Signs outgoing text with the local private key.
    pub fn sign(&self, message: &str) -> Result<BigUint, ChatError> {
        let pair = self
            .key_pair
            .as_ref()
            .ok_or(ChatError::State("local key pair not generated"))?;
        rsa::sign(message, pair)
    }

    /// Verifies an incoming signature against the peer's announced key.
    pub fn verify_from_peer(&self, message: &str, signature: &BigUint) -> Result<bool, ChatError> {
        let remote = self
            .remote_key
            .as_ref()
            .ok_or(ChatError::State("no public key received from the peer"))?;
        Ok(rsa::verify(message, signature, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textbook_pair() -> KeyPair {
        rsa::keypair_from_fields("3233", "17", "2753").unwrap()
    }

    #[test]
    fn test_operations_without_keys_fail_with_state_errors() {
        let session = Session::new(Role::Initiator);
        assert!(matches!(session.decrypt(&[]), Err(ChatError::State(_))));
        assert!(matches!(session.sign("hi"), Err(ChatError::State(_))));
        assert!(matches!(
            session.verify_from_peer("hi", &BigUint::from(1u32)),
            Err(ChatError::State(_))
        ));
        assert!(matches!(
            session.encrypt_for_peer("hi"),
            Err(ChatError::NotReady)
        ));
        assert!(matches!(
            session.local_public_key(),
            Err(ChatError::State(_))
        ));
    }

    #[test]
    fn test_remote_key_overwrite_reports_prior_presence() {
        let mut session = Session::new(Role::Listener);
        let key = textbook_pair().public_key;
        assert!(!session.set_remote_key(key.clone()));
        assert!(session.set_remote_key(key.clone()));
        assert_eq!(session.remote_key(), Some(&key));
    }

    #[test]
    fn test_encrypt_decrypt_through_session() {
        let pair = textbook_pair();
        let mut session = Session::with_key_pair(Role::Initiator, pair.clone());
        // talking to a peer with the same textbook key
        session.set_remote_key(pair.public_key);
        let units = session.encrypt_for_peer("A").unwrap();
        assert_eq!(units, vec![BigUint::from(2790u32)]);
        assert_eq!(session.decrypt(&units).unwrap(), "A");
    }
}
