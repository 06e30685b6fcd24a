// rsa_chat/chat_core/src/protocol.rs
//
// Wire protocol on top of the frame codec: the public-key handshake, the
// signed-and-encrypted envelope path, and the receive task that reassembles
// frames and dispatches them against the session.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::framing::{encode_frame, FrameDecoder};
use crate::models::{self, ChatEnvelope, KEY_EXCHANGE_PREFIX};
use crate::session::{Role, SharedSession};

const READ_CHUNK: usize = 4096;

/// What the protocol reports to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A message that decrypted and verified; safe to display.
    Chat { nickname: String, text: String },
    /// A well-formed message whose signature did not check out.
    SignatureInvalid { nickname: String },
    /// Malformed frame, handshake line, or envelope; the loop continues.
    ProtocolError { detail: String },
    /// The peer's public key arrived; sends become possible.
    RemoteKeyReceived,
    /// The byte stream ended or failed. Reported once per connection.
    TransportClosed { detail: Option<String> },
}

/// One peer connection: shared session state, the write half of the
/// transport, and the event channel to the presentation layer.
///
/// Clones share the same writer and session, so the receive task's
/// handshake reply serializes with user-triggered sends.
pub struct Connection<W> {
    session: SharedSession,
    writer: Arc<tokio::sync::Mutex<W>>,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl<W> Clone for Connection<W> {
    fn clone(&self) -> Self {
        Connection {
            session: Arc::clone(&self.session),
            writer: Arc::clone(&self.writer),
            events: self.events.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> Connection<W> {
    pub fn new(session: SharedSession, writer: W, events: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Connection {
            session,
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            events,
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Announces the local public key, the first thing either side sends
    /// after the connection is established.
    pub async fn announce_key(&self) -> Result<(), ChatError> {
        let line = {
            let session = self.session.lock();
            models::format_key_exchange(&session.local_public_key()?)
        };
        debug!("announcing local public key");
        self.send_frame(line.as_bytes()).await
    }

    /// Signs, encrypts, and frames one chat message.
    ///
    /// Requires a local keypair and a known remote key; fails with
    /// `NotReady` before touching the transport otherwise.
    pub async fn send_chat(&self, nickname: &str, text: &str) -> Result<(), ChatError> {
        let envelope = {
            let session = self.session.lock();
            if session.key_pair().is_none() || !session.has_remote_key() {
                return Err(ChatError::NotReady);
            }
            let signature = session.sign(text)?;
            let units = session.encrypt_for_peer(text)?;
            ChatEnvelope::new(nickname, &units, &signature)
        };
        let body = serde_json::to_string(&envelope)?;
        self.send_frame(body.as_bytes()).await
    }

    async fn send_frame(&self, body: &[u8]) -> Result<(), ChatError> {
        let frame = encode_frame(body);
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn emit(&self, event: ChatEvent) {
        if let ChatEvent::ProtocolError { detail } = &event {
            warn!(detail = detail.as_str(), "protocol error");
        }
        // a dropped receiver just means nobody is listening anymore
        let _ = self.events.send(event);
    }
}

/// The dedicated receive task for one connection.
///
/// Blocks on transport reads, reassembles frames strictly in order, and
/// dispatches each one to completion before reading on. Returns after
/// emitting `TransportClosed` (clean EOF or I/O failure) or on a frame
/// header that cannot be parsed, after which the stream offset is lost.
pub async fn recv_loop<R, W>(mut reader: R, conn: Connection<W>) -> Result<(), ChatError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                conn.emit(ChatEvent::TransportClosed { detail: None });
                return Ok(());
            }
            Ok(n) => n,
            Err(err) => {
                conn.emit(ChatEvent::TransportClosed {
                    detail: Some(err.to_string()),
                });
                return Ok(());
            }
        };
        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some(body)) => handle_frame(&conn, &body).await,
                Ok(None) => break,
                Err(err) => {
                    conn.emit(ChatEvent::ProtocolError {
                        detail: err.to_string(),
                    });
                    return Err(err);
                }
            }
        }
    }
}

async fn handle_frame<W: AsyncWrite + Unpin>(conn: &Connection<W>, body: &[u8]) {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(_) => {
            conn.emit(ChatEvent::ProtocolError {
                detail: "frame body is not valid UTF-8".to_string(),
            });
            return;
        }
    };
    debug!(len = body.len(), "received frame");

    if text.starts_with(KEY_EXCHANGE_PREFIX) {
        handle_key_exchange(conn, text).await;
    } else {
        handle_envelope(conn, text);
    }
}

async fn handle_key_exchange<W: AsyncWrite + Unpin>(conn: &Connection<W>, text: &str) {
    let key = match models::parse_key_exchange(text) {
        Ok(key) => key,
        Err(err) => {
            conn.emit(ChatEvent::ProtocolError {
                detail: err.to_string(),
            });
            return;
        }
    };
    let should_reply = {
        let mut session = conn.session.lock();
        let already_known = session.set_remote_key(key);
        session.role() == Role::Listener && !already_known
    };
    conn.emit(ChatEvent::RemoteKeyReceived);
    // The listener answers the first announcement with its own key; the
    // initiator already announced when it connected.
    if should_reply {
        if let Err(err) = conn.announce_key().await {
            conn.emit(ChatEvent::ProtocolError {
                detail: format!("failed to answer key exchange: {}", err),
            });
        }
    }
}

fn handle_envelope<W: AsyncWrite + Unpin>(conn: &Connection<W>, text: &str) {
    let envelope: ChatEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            conn.emit(ChatEvent::ProtocolError {
                detail: format!("envelope is not valid JSON: {}", err),
            });
            return;
        }
    };

    let outcome = {
        let session = conn.session.lock();
        envelope.units().and_then(|units| {
            let signature = envelope.signature()?;
            let plaintext = session.decrypt(&units)?;
            let verified = session.verify_from_peer(&plaintext, &signature)?;
            Ok((plaintext, verified))
        })
    };

    match outcome {
        Ok((text, true)) => conn.emit(ChatEvent::Chat {
            nickname: envelope.nickname,
            text,
        }),
        Ok((_, false)) => conn.emit(ChatEvent::SignatureInvalid {
            nickname: envelope.nickname,
        }),
        Err(err) => conn.emit(ChatEvent::ProtocolError {
            detail: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsa;
    use crate::session::Session;
    use tokio::io::AsyncReadExt;

    fn textbook_pair() -> rsa::KeyPair {
        rsa::keypair_from_fields("3233", "17", "2753").unwrap()
    }

    #[tokio::test]
    async fn test_send_before_handshake_is_not_ready_with_zero_writes() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Session::with_key_pair(Role::Initiator, textbook_pair()).shared();
        let conn = Connection::new(session, local, tx);

        assert!(matches!(
            conn.send_chat("Anonymous", "too early").await,
            Err(ChatError::NotReady)
        ));

        drop(conn);
        let mut leftover = Vec::new();
        remote.read_to_end(&mut leftover).await.unwrap();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn test_announce_without_keys_is_state_error() {
        let (local, _remote) = tokio::io::duplex(1024);
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Session::new(Role::Initiator).shared(), local, tx);
        assert!(matches!(
            conn.announce_key().await,
            Err(ChatError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_envelope_before_key_exchange_fails_visibly() {
        let (local, remote) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(local);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::with_key_pair(Role::Initiator, textbook_pair()).shared();
        let conn = Connection::new(session, write_half, tx);
        let task = tokio::spawn(recv_loop(read_half, conn));

        // a well-formed envelope arrives before any KEYS: announcement
        let pair = textbook_pair();
        let units = rsa::encrypt("hi", &pair.public_key);
        let signature = rsa::sign("hi", &pair).unwrap();
        let envelope = ChatEnvelope::new("Mallory", &units, &signature);
        let body = serde_json::to_string(&envelope).unwrap();
        let (_remote_read, mut remote_write) = tokio::io::split(remote);
        remote_write.write_all(&encode_frame(body.as_bytes())).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, ChatEvent::ProtocolError { .. }));

        drop(remote_write);
        drop(_remote_read);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_frames_are_reported_and_loop_continues() {
        let (local, remote) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(local);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::with_key_pair(Role::Initiator, textbook_pair()).shared();
        let conn = Connection::new(session.clone(), write_half, tx);
        let _task = tokio::spawn(recv_loop(read_half, conn));

        let (_remote_read, mut remote_write) = tokio::io::split(remote);
        // not JSON, not a KEYS: line
        remote_write.write_all(&encode_frame(b"gibberish")).await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ChatEvent::ProtocolError { .. }
        ));

        // the loop survives and still takes a valid handshake afterwards
        remote_write.write_all(&encode_frame(b"KEYS:3127,13")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ChatEvent::RemoteKeyReceived);
        assert!(session.lock().has_remote_key());
    }
}
