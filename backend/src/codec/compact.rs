//! Compact identifier encoding.
//!
//! Frame layout (version 1, 37 bytes):
//!
//! | bytes | field                                   |
//! |-------|-----------------------------------------|
//! | 0     | schema version                          |
//! | 1-16  | journey id, raw UUID bytes              |
//! | 17-32 | user id, raw UUID bytes                 |
//! | 33-34 | page number, big endian                 |
//! | 35-36 | first two bytes of MD5 over bytes 0..35 |
//!
//! The frame is written as URL-safe base64 without padding, which keeps the QR
//! payload at 50 characters.

use crate::error::DecodeFailure;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use common::model::identifier::{IdentifierPayload, CURRENT_SCHEMA_VERSION};
use uuid::Uuid;

const FRAME_V1_LEN: usize = 37;
const CHECKED_LEN: usize = FRAME_V1_LEN - 2;

/// Length of the text produced by `encode_compact`.
pub const COMPACT_LEN: usize = 50;

fn checksum(bytes: &[u8]) -> [u8; 2] {
    let digest = md5::compute(bytes);
    [digest.0[0], digest.0[1]]
}

pub fn encode_compact(payload: &IdentifierPayload) -> String {
    let mut frame = Vec::with_capacity(FRAME_V1_LEN);
    frame.push(payload.schema_version);
    frame.extend_from_slice(payload.journey_id.as_bytes());
    frame.extend_from_slice(payload.user_id.as_bytes());
    frame.extend_from_slice(&payload.page_number.to_be_bytes());
    let check = checksum(&frame);
    frame.extend_from_slice(&check);
    URL_SAFE_NO_PAD.encode(frame)
}

/// Parses text read off a scanned symbol.
///
/// Never panics. Anything that is not exactly a version-1 frame with a valid
/// checksum and a positive page number is a `DecodeFailure`.
pub fn decode_compact(text: &str) -> Result<IdentifierPayload, DecodeFailure> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeFailure::Empty);
    }
    let frame = URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|_| DecodeFailure::NotBase64)?;

    let version = *frame.first().ok_or(DecodeFailure::Empty)?;
    if version != CURRENT_SCHEMA_VERSION {
        return Err(DecodeFailure::UnknownVersion(version));
    }
    if frame.len() != FRAME_V1_LEN {
        return Err(DecodeFailure::WrongLength {
            expected: FRAME_V1_LEN,
            actual: frame.len(),
        });
    }
    if checksum(&frame[..CHECKED_LEN]) != frame[CHECKED_LEN..] {
        return Err(DecodeFailure::ChecksumMismatch);
    }

    let uuid_at = |start: usize| {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&frame[start..start + 16]);
        Uuid::from_bytes(raw)
    };
    let page_number = u16::from_be_bytes([frame[33], frame[34]]);
    if page_number == 0 {
        return Err(DecodeFailure::InvalidPage(page_number));
    }

    Ok(IdentifierPayload {
        journey_id: uuid_at(1),
        user_id: uuid_at(17),
        page_number,
        schema_version: version,
    })
}
