//! Compact ids for external message references.
//!
//! References up to 999999 are shown as-is. Larger ones are split into blocks
//! of 999999: the block count becomes a lowercase letter prefix (`a` = 1,
//! `z` = 26, `aa` = 27, ...) and the position within the block stays decimal.
//! `1000000` encodes as `a1`.

use thiserror::Error;

/// Largest reference shown without a prefix, and the size of each block.
pub const BLOCK_SIZE: u64 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid sequence id: {0:?}")]
    Format(String),
}

/// Encode a positive reference.
///
/// # Errors
/// Returns `CodecError::Format` for zero.
pub fn encode(n: u64) -> Result<String, CodecError> {
    if n == 0 {
        return Err(CodecError::Format(n.to_string()));
    }
    if n <= BLOCK_SIZE {
        return Ok(n.to_string());
    }

    let times = (n - 1) / BLOCK_SIZE;
    let remainder = (n - 1) % BLOCK_SIZE + 1;
    Ok(format!("{}{}", letters(times), remainder))
}

/// Decode an id produced by [`encode`]. Plain positive decimals are accepted as is.
///
/// # Errors
/// Returns `CodecError::Format` when the input is not `digits` or `letters digits`,
/// when the numeric part is zero or out of block range, or on overflow.
pub fn decode(s: &str) -> Result<u64, CodecError> {
    let input = s.trim();
    let malformed = || CodecError::Format(s.to_string());

    let split = input
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(input.len());
    let (prefix, digits) = input.split_at(split);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let number: u64 = digits.parse().map_err(|_| malformed())?;
    if number == 0 {
        return Err(malformed());
    }
    if prefix.is_empty() {
        return Ok(number);
    }
    if number > BLOCK_SIZE {
        return Err(malformed());
    }

    let times = prefix.bytes().try_fold(0u64, |acc, b| {
        acc.checked_mul(26)?.checked_add(u64::from(b - b'a' + 1))
    });
    times
        .and_then(|t| t.checked_mul(BLOCK_SIZE))
        .and_then(|base| base.checked_add(number))
        .ok_or_else(malformed)
}

/// Bijective base-26: 1 -> "a", 26 -> "z", 27 -> "aa".
fn letters(mut times: u64) -> String {
    let mut out = Vec::new();
    while times > 0 {
        let digit = ((times - 1) % 26) as u8;
        out.push(char::from(b'a' + digit));
        times = (times - 1) / 26;
    }
    out.iter().rev().collect()
}
