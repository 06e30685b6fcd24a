// rsa_chat/chat_core/src/models.rs

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::rsa::{self, KeyPair, PublicKey};

/// Prefix that distinguishes a key-exchange frame from an envelope frame.
pub const KEY_EXCHANGE_PREFIX: &str = "KEYS:";

/// One signed-and-encrypted chat message as it travels inside a frame.
///
/// Big integers cross the wire as decimal strings: JSON parsers are lossy
/// above 2^53, and every peer already speaks decimal for the `KEYS:` line.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatEnvelope {
    #[serde(default = "default_nickname")]
    pub nickname: String,
    pub message: Vec<String>,
    pub signature: String,
}

fn default_nickname() -> String {
    "Unknown".to_string()
}

impl ChatEnvelope {
    pub fn new(nickname: &str, units: &[BigUint], signature: &BigUint) -> Self {
        ChatEnvelope {
            nickname: nickname.to_string(),
            message: units.iter().map(|unit| unit.to_string()).collect(),
            signature: signature.to_string(),
        }
    }

    /// Parses the ciphertext units back into big integers.
    pub fn units(&self) -> Result<Vec<BigUint>, ChatError> {
        self.message
            .iter()
            .map(|unit| {
                unit.parse::<BigUint>().map_err(|_| {
                    ChatError::Protocol(format!("ciphertext unit '{}' is not a decimal integer", unit))
                })
            })
            .collect()
    }

    pub fn signature(&self) -> Result<BigUint, ChatError> {
        self.signature.parse::<BigUint>().map_err(|_| {
            ChatError::Protocol(format!(
                "signature '{}' is not a decimal integer",
                self.signature
            ))
        })
    }
}

/// Formats the public-key announcement line: `KEYS:<N>,<E>`.
pub fn format_key_exchange(key: &PublicKey) -> String {
    format!("{}{},{}", KEY_EXCHANGE_PREFIX, key.n, key.e)
}

/// Parses a `KEYS:<N>,<E>` frame body into the sender's public key.
pub fn parse_key_exchange(body: &str) -> Result<PublicKey, ChatError> {
    let payload = body
        .strip_prefix(KEY_EXCHANGE_PREFIX)
        .ok_or_else(|| ChatError::Protocol("key exchange line missing KEYS: prefix".to_string()))?;
    let (n_str, e_str) = payload
        .split_once(',')
        .ok_or_else(|| ChatError::Protocol("key exchange line missing ',' separator".to_string()))?;
    let n = n_str
        .parse::<BigUint>()
        .map_err(|_| ChatError::Protocol(format!("modulus '{}' is not a decimal integer", n_str)))?;
    let e = e_str
        .parse::<BigUint>()
        .map_err(|_| ChatError::Protocol(format!("exponent '{}' is not a decimal integer", e_str)))?;
    Ok(PublicKey { n, e })
}

/// On-disk key material, all fields decimal strings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StoredKeys {
    pub n: String,
    pub e: String,
    pub d: String,
}

impl StoredKeys {
    pub fn from_keypair(pair: &KeyPair) -> Self {
        StoredKeys {
            n: pair.public_key.n.to_string(),
            e: pair.public_key.e.to_string(),
            d: pair.private_key.d.to_string(),
        }
    }

    pub fn to_keypair(&self) -> Result<KeyPair, ChatError> {
        rsa::keypair_from_fields(&self.n, &self.e, &self.d)
    }

    /// Parses persisted JSON; anything unreadable is "no valid stored key".
    pub fn from_json(data: &str) -> Result<Self, ChatError> {
        serde_json::from_str(data)
            .map_err(|err| ChatError::NoStoredKey(format!("stored key file unreadable: {}", err)))
    }

    pub fn to_json(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_exchange_roundtrip() {
        let key = PublicKey {
            n: BigUint::from(3233u32),
            e: BigUint::from(17u32),
        };
        let line = format_key_exchange(&key);
        assert_eq!(line, "KEYS:3233,17");
        assert_eq!(parse_key_exchange(&line).unwrap(), key);
    }

    #[test]
    fn test_key_exchange_rejects_malformed_lines() {
        for bad in ["3233,17", "KEYS:3233", "KEYS:abc,17", "KEYS:3233,xyz", "KEYS:"] {
            assert!(
                matches!(parse_key_exchange(bad), Err(ChatError::Protocol(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_envelope_json_shape() {
        let envelope = ChatEnvelope::new(
            "Alice",
            &[BigUint::from(2790u32), BigUint::from(65u32)],
            &BigUint::from(123u32),
        );
        let json = serde_json::to_string(&envelope).unwrap();
        let back: ChatEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nickname, "Alice");
        assert_eq!(
            back.units().unwrap(),
            vec![BigUint::from(2790u32), BigUint::from(65u32)]
        );
        assert_eq!(back.signature().unwrap(), BigUint::from(123u32));
    }

    #[test]
    fn test_envelope_missing_nickname_defaults_to_unknown() {
        let envelope: ChatEnvelope =
            serde_json::from_str(r#"{"message":["1"],"signature":"2"}"#).unwrap();
        assert_eq!(envelope.nickname, "Unknown");
    }

    #[test]
    fn test_envelope_rejects_non_decimal_units() {
        let envelope: ChatEnvelope =
            serde_json::from_str(r#"{"nickname":"x","message":["12","no"],"signature":"3"}"#)
                .unwrap();
        assert!(matches!(envelope.units(), Err(ChatError::Protocol(_))));
    }

    #[test]
    fn test_stored_keys_roundtrip_and_corruption() {
        let pair = rsa::keypair_from_fields("3233", "17", "2753").unwrap();
        let stored = StoredKeys::from_keypair(&pair);
        let json = stored.to_json().unwrap();
        assert_eq!(StoredKeys::from_json(&json).unwrap().to_keypair().unwrap(), pair);

        assert!(matches!(
            StoredKeys::from_json("{not json"),
            Err(ChatError::NoStoredKey(_))
        ));
        let corrupt = StoredKeys {
            n: "3233".into(),
            e: "17".into(),
            d: "not-a-number".into(),
        };
        assert!(matches!(corrupt.to_keypair(), Err(ChatError::NoStoredKey(_))));
    }
}
