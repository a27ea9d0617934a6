//! Byte-level text normalization for the index alphabet.
//!
//! Every indexed name and every query passes through [`normalize`] before it
//! touches the primary table, the inverted index, or the distance scorer.
//! ASCII letters are case-folded; every other ASCII byte is kept as-is;
//! non-ASCII scalars are reduced into a 31-slot bucket range. Distinct code
//! points may collide in that range, which widens candidate sets a little but
//! never drops a true match, and keeps the whole alphabet in one byte.

/// Codes reserved for the non-ASCII reduction; `1..=31` never collide with
/// printable ASCII.
const FOLD_SLOTS: u32 = 31;

/// Maps one Unicode scalar to its internal one-byte code.
#[inline]
pub fn fold_char(c: char) -> u8 {
    let code = c as u32;
    if code <= 0x7f {
        (code as u8).to_ascii_lowercase()
    } else {
        1 + (code % FOLD_SLOTS) as u8
    }
}

/// Normalizes a string into the internal alphabet, one byte per scalar.
pub fn normalize(input: &str) -> Vec<u8> {
    input.chars().map(fold_char).collect()
}

/// Normalizes raw bytes, tolerating invalid UTF-8.
///
/// On an invalid sequence, one byte is skipped and decoding resumes; the
/// function never fails.
pub fn normalize_bytes(mut input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    while !input.is_empty() {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                out.extend(valid.chars().map(fold_char));
                break;
            }
            Err(err) => {
                let (valid, rest) = input.split_at(err.valid_up_to());
                let valid = std::str::from_utf8(valid).expect("prefix up to the error is valid");
                out.extend(valid.chars().map(fold_char));
                input = &rest[1..];
            }
        }
    }
    out
}
