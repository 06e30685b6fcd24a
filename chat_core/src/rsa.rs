// rsa_chat/chat_core/src/rsa.rs
//
// Textbook RSA: key generation, per-character encryption, hash-then-
// exponentiate signatures. Deliberately unpadded (no OAEP/PSS); the wire
// format carries one big-integer unit per plaintext character and the
// round-trip contract depends on that.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, ToPrimitive, Zero};
use rand::rngs::OsRng;

use crate::error::ChatError;
use crate::sha256::{format_hash_hex, sha256_from_bytes};

/// Miller-Rabin rounds used for key generation (error probability <= 4^-128).
pub const MILLER_RABIN_ROUNDS: u32 = 128;

/// Modulus size used when the caller does not pick one.
pub const DEFAULT_KEY_LENGTH: u64 = 2048;

const MAX_PRIME_ATTEMPTS: u32 = 5000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub n: BigUint,
    pub e: BigUint,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateKey {
    pub d: BigUint,
}

/// A public/private pair generated together. Replacing either half means
/// regenerating the whole pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Miller-Rabin probabilistic primality test.
///
/// Writes `n - 1 = 2^s * r` with `r` odd and challenges `n` with `rounds`
/// random bases from `[2, n-2]`.
pub fn is_probably_prime(n: &BigUint, rounds: u32) -> bool {
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);
    if *n == two || *n == three {
        return true;
    }
    if *n <= BigUint::one() || n.is_even() {
        return false;
    }

    let n_minus_one = n - BigUint::one();
    let mut r = n_minus_one.clone();
    let mut s: u32 = 0;
    while r.is_even() {
        r /= 2u32;
        s += 1;
    }

    let mut rng = OsRng;
    for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&r, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        let mut found_minus_one = false;
        for _ in 0..s.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                found_minus_one = true;
                break;
            }
        }
        if !found_minus_one {
            return false;
        }
    }
    true
}

/// Generates a probable prime of exactly `bit_length` bits.
///
/// The top bit is forced so the product of two such primes has the full
/// modulus width, the bottom bit so candidates are odd.
pub fn generate_prime(bit_length: u64) -> Result<BigUint, ChatError> {
    // below two bits there is nothing to generate, and the top-bit index
    // would wrap
    if bit_length < 2 {
        return Err(ChatError::InvalidKeyLength(bit_length));
    }
    let mut rng = OsRng;
    for _ in 0..MAX_PRIME_ATTEMPTS {
        let mut candidate = rng.gen_biguint(bit_length);
        candidate.set_bit(bit_length - 1, true);
        candidate.set_bit(0, true);
        if is_probably_prime(&candidate, MILLER_RABIN_ROUNDS) {
            return Ok(candidate);
        }
    }
    Err(ChatError::KeyGenerationExhausted(MAX_PRIME_ATTEMPTS))
}

/// Generates a fresh keypair with a `key_length`-bit modulus.
///
/// `totient = lcm(p-1, q-1)`; the public exponent is drawn uniformly from
/// `[2^16, 2^17)` until coprime with the totient, and the private exponent
/// is its inverse modulo the totient.
pub fn generate_keypair(key_length: u64) -> Result<KeyPair, ChatError> {
    if key_length == 0 || key_length % 2 != 0 {
        return Err(ChatError::InvalidKeyLength(key_length));
    }
    let mut rng = OsRng;
    let e_low = BigUint::from(1u32 << 16);
    let e_high = BigUint::from(1u32 << 17);

    loop {
        let p = generate_prime(key_length / 2)?;
        let q = generate_prime(key_length / 2)?;
        if p == q {
            continue;
        }
        let n = &p * &q;
        let totient = (&p - BigUint::one()).lcm(&(&q - BigUint::one()));

        let e = loop {
            let candidate = rng.gen_biguint_range(&e_low, &e_high);
            if candidate.gcd(&totient).is_one() {
                break candidate;
            }
        };
        // The coprimality check above guarantees the inverse exists.
        let d = modinv(&e, &totient)
            .ok_or(ChatError::Internal("public exponent has no modular inverse"))?;

        return Ok(KeyPair {
            public_key: PublicKey { n, e },
            private_key: PrivateKey { d },
        });
    }
}

/// Encrypts each character code point as `m^E mod N` under the recipient's
/// public key. No padding; a code point >= N (impossible with real key
/// sizes) silently produces a non-invertible unit.
pub fn encrypt(plaintext: &str, public_key: &PublicKey) -> Vec<BigUint> {
    plaintext
        .chars()
        .map(|ch| BigUint::from(ch as u32).modpow(&public_key.e, &public_key.n))
        .collect()
}

/// Decrypts a unit sequence produced by [`encrypt`] back into text.
pub fn decrypt(units: &[BigUint], key_pair: &KeyPair) -> Result<String, ChatError> {
    let d = &key_pair.private_key.d;
    let n = &key_pair.public_key.n;
    units
        .iter()
        .map(|unit| {
            let code_point = unit.modpow(d, n);
            code_point
                .to_u32()
                .and_then(char::from_u32)
                .ok_or_else(|| {
                    ChatError::Protocol(format!(
                        "decrypted unit {} is not a valid character",
                        code_point
                    ))
                })
        })
        .collect()
}

/// SHA-256 of the message's UTF-8 bytes as a lowercase hex string.
pub fn hash_message(message: &str) -> String {
    format_hash_hex(&sha256_from_bytes(message.as_bytes()))
}

/// Signs the message hash with the local private key: `h^D mod N`.
///
/// The 256-bit digest is signed as-is, and [`verify`] compares it
/// unreduced, so signatures only round-trip under moduli wider than 256
/// bits.
pub fn sign(message: &str, key_pair: &KeyPair) -> Result<BigUint, ChatError> {
    let digest_hex = hash_message(message);
    let h = BigUint::parse_bytes(digest_hex.as_bytes(), 16)
        .ok_or(ChatError::Internal("digest is not valid hexadecimal"))?;
    Ok(h.modpow(&key_pair.private_key.d, &key_pair.public_key.n))
}

/// Verifies a signature against the presented public key.
pub fn verify(message: &str, signature: &BigUint, public_key: &PublicKey) -> bool {
    let digest_hex = hash_message(message);
    let Some(h) = BigUint::parse_bytes(digest_hex.as_bytes(), 16) else {
        return false;
    };
    signature.modpow(&public_key.e, &public_key.n) == h
}

/// Rebuilds a keypair from decimal-string fields, the load half of the
/// key-persistence boundary.
pub fn keypair_from_fields(n: &str, e: &str, d: &str) -> Result<KeyPair, ChatError> {
    let parse = |label: &str, value: &str| {
        value.parse::<BigUint>().map_err(|_| {
            ChatError::NoStoredKey(format!("field '{}' is not a decimal integer", label))
        })
    };
    Ok(KeyPair {
        public_key: PublicKey {
            n: parse("N", n)?,
            e: parse("E", e)?,
        },
        private_key: PrivateKey { d: parse("D", d)? },
    })
}

fn xgcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut a, mut b) = (a.clone(), b.clone());
    let (mut prev_x, mut x) = (BigInt::one(), BigInt::zero());
    let (mut prev_y, mut y) = (BigInt::zero(), BigInt::one());
    while !b.is_zero() {
        let q = &a / &b;
        let r = &a % &b;
        let next_x = &prev_x - &q * &x;
        prev_x = x;
        x = next_x;
        let next_y = &prev_y - &q * &y;
        prev_y = y;
        y = next_y;
        a = b;
        b = r;
    }
    (a, prev_x, prev_y)
}

pub(crate) fn modinv(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    if m.is_zero() || m.is_one() {
        return None;
    }
    let m_signed = BigInt::from(m.clone());
    let (g, x, _) = xgcd(&BigInt::from(a.clone()), &m_signed);
    if !g.is_one() {
        return None;
    }
    ((&x % &m_signed + &m_signed) % &m_signed).to_biguint()
}
