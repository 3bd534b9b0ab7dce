//! Human-typable fallback codes.
//!
//! Ten symbols from a 31-character alphabet without `0 O 1 I L`, printed as
//! `XXXXX-XXXXX`. The code is a digest of the page triple; resolving it back is
//! a `page_codes` lookup.

use uuid::Uuid;

pub const SHORT_ALPHABET: &[u8; 31] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
const SYMBOLS: usize = 10;
const GROUP: usize = 5;

pub fn encode_short(journey_id: Uuid, user_id: Uuid, page_number: u16) -> String {
    let mut input = Vec::with_capacity(34);
    input.extend_from_slice(journey_id.as_bytes());
    input.extend_from_slice(user_id.as_bytes());
    input.extend_from_slice(&page_number.to_be_bytes());
    let mut value = u128::from_be_bytes(md5::compute(&input).0);

    let base = SHORT_ALPHABET.len() as u128;
    let mut code = String::with_capacity(SYMBOLS + 1);
    for i in 0..SYMBOLS {
        if i == GROUP {
            code.push('-');
        }
        code.push(SHORT_ALPHABET[(value % base) as usize] as char);
        value /= base;
    }
    code
}

/// Canonical form of operator input: case-insensitive, spaces and dashes
/// ignored. `None` when the input cannot be a short code.
pub fn normalize_short(input: &str) -> Option<String> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.len() != SYMBOLS || !cleaned.bytes().all(|b| SHORT_ALPHABET.contains(&b)) {
        return None;
    }
    Some(format!("{}-{}", &cleaned[..GROUP], &cleaned[GROUP..]))
}
