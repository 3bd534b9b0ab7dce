//! Identifier codecs stamped on booklet pages.
//!
//! - `compact`: the machine form carried by the scannable symbol.
//! - `short`: the human-typable fallback code persisted as a `PageCode`.

mod compact;
mod short;

pub use compact::{decode_compact, encode_compact, COMPACT_LEN};
pub use short::{encode_short, normalize_short, SHORT_ALPHABET};
