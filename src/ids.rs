//! Node id generation.
//!
//! Ids are short base36 digests of the document path, the creation instant
//! and a nonce. The length grows with the size of the forest, and every
//! candidate is checked against the ids already in use.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix of every generated node id
pub const NODE_ID_PREFIX: &str = "n";

const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_LENGTH: usize = 10;
const NONCES_PER_LENGTH: u32 = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("could not find a free node id for {file_path} among ~{existing} nodes")]
    Exhausted { file_path: String, existing: usize },
}

/// Encode `data` as exactly `length` base36 digits (zero-padded, keeping the
/// least significant digits when too long)
fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let mut digits = Vec::with_capacity(length);

    while !num.is_zero() && digits.len() < length {
        let idx = (&num % &base)
            .to_u32_digits()
            .first()
            .copied()
            .unwrap_or(0) as usize;
        digits.push(BASE36_ALPHABET[idx]);
        num /= &base;
    }
    while digits.len() < length {
        digits.push(b'0');
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

fn initial_length(existing: usize) -> usize {
    match existing {
        0..=99 => 4,
        100..=999 => 5,
        1000..=9999 => 6,
        10000..=99999 => 7,
        _ => 8,
    }
}

/// A single deterministic id candidate
pub fn node_id_candidate(
    file_path: &str,
    timestamp: DateTime<Utc>,
    length: usize,
    nonce: u32,
) -> String {
    let content = format!(
        "{}|{}|{}",
        file_path,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        nonce
    );
    let digest = Sha256::digest(content.as_bytes());
    // 8 bytes give ~12 base36 digits, more than MAX_LENGTH needs
    format!("{}-{}", NODE_ID_PREFIX, encode_base36(&digest[..8], length))
}

/// Generate an id for a new node referencing `file_path`.
///
/// `in_use` returns true when a candidate is already taken.
pub fn generate_node_id<F>(
    file_path: &str,
    timestamp: DateTime<Utc>,
    existing: usize,
    mut in_use: F,
) -> Result<String, IdError>
where
    F: FnMut(&str) -> bool,
{
    for length in initial_length(existing)..=MAX_LENGTH {
        for nonce in 0..NONCES_PER_LENGTH {
            let candidate = node_id_candidate(file_path, timestamp, length, nonce);
            if !in_use(&candidate) {
                return Ok(candidate);
            }
        }
    }
    Err(IdError::Exhausted {
        file_path: file_path.to_string(),
        existing,
    })
}
