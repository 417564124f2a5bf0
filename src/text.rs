//! DVB SI text decoding.
//!
//! SI character fields are not UTF-8. A leading byte ≤ 0x1F selects an
//! alternate character table and is consumed; byte 0x05 in particular
//! selects ISO-8859-9. Absent a selector, bytes default to a Latin-1-style
//! passthrough where solo bytes in 0x80..=0x9F are promoted straight to
//! their Unicode code point (equivalent to prefixing 0xC2 when re-encoded
//! as UTF-8) rather than reinterpreted through Windows-1252's curly-quote
//! block. Grounded on the reference implementation's `decode_arib_string` control-byte
//! sniff in `recisdb-rs/src/ts_analyzer/descriptors.rs`, generalized from
//! its ASCII-only fallback to the DVB character-table convention via
//! `encoding_rs`.
//!
//! No exact ISO-8859-9 table ships in `encoding_rs` (the WHATWG encoding
//! standard folds that label onto `windows-1254`); we use it as the
//! closest available approximation, same as every browser does.
use encoding_rs::WINDOWS_1254;

pub fn decode_si_string(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    if data[0] <= 0x1F {
        let body = &data[1..];
        return if data[0] == 0x05 {
            let (decoded, _, _) = WINDOWS_1254.decode(body);
            decoded.into_owned()
        } else {
            decode_latin1(body)
        };
    }

    decode_latin1(data)
}

/// Byte-for-byte Latin-1 passthrough: every byte is its own Unicode code
/// point, valid for the full 0x00..=0xFF range.
fn decode_latin1(data: &[u8]) -> String {
    data.iter().map(|&b| b as char).collect()
}
