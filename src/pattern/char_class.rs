//! Byte-level character classes, escapes and UTF-8 stepping.
//!
//! Input is treated as bytes. Structural characters are ASCII; "one character"
//! means one UTF-8 codepoint, with a malformed or truncated sequence counting
//! as a single byte.

use phf::{Map, phf_map};

/// Single-letter escapes understood by patterns and replacement templates.
const ESCAPES: Map<u8, u8> = phf_map! {
    b'a' => 0x07,
    b'e' => 0x1b,
    b'f' => 0x0c,
    b'n' => b'\n',
    b'r' => b'\r',
    b't' => b'\t',
    b'v' => 0x0b,
    b'0' => 0x00,
};

/// Identifier start: ASCII letter, `_`, or any non-ASCII byte.
pub fn is_id_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

/// Identifier continuation: identifier start or ASCII digit.
pub fn is_id_continue(b: u8) -> bool {
    is_id_start(b) || b.is_ascii_digit()
}

/// Characters allowed in rule and capture names (`-` is allowed after the
/// first character, as in `left-paren`).
pub fn is_name_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// End of the name starting at `bytes[pos]`. A `-` is only part of a name
/// when another name character follows it.
pub fn name_end(bytes: &[u8], pos: usize) -> usize {
    let mut end = pos + 1;
    while let Some(&b) = bytes.get(end) {
        let dash_ok = b != b'-' || bytes.get(end + 1).is_some_and(|&n| is_name_continue(n));
        if is_name_continue(b) && dash_ok {
            end += 1;
        } else {
            break;
        }
    }
    end.min(bytes.len())
}

/// Length of the UTF-8 sequence introduced by `lead`, or 1 if `lead` is not a
/// valid lead byte.
pub fn utf8_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7f => 1,
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => 1,
    }
}

/// Offset of the character after the one at `pos`, never beyond `end`.
pub fn next_char(bytes: &[u8], pos: usize, end: usize) -> usize {
    if pos >= end {
        return end;
    }
    let len = utf8_len(bytes[pos]);
    if pos + len > end || !bytes[pos + 1..pos + len].iter().all(|&b| b & 0xc0 == 0x80) {
        return pos + 1;
    }
    pos + len
}

/// Offset of the character before `pos`, never before `start`.
pub fn prev_char(bytes: &[u8], start: usize, pos: usize) -> usize {
    let mut p = pos.saturating_sub(1).max(start);
    while p > start && pos - p < 4 && bytes[p] & 0xc0 == 0x80 {
        p -= 1;
    }
    if next_char(bytes, p, pos) == pos { p } else { pos.saturating_sub(1).max(start) }
}

/// Compare two byte strings, optionally folding ASCII case.
pub fn bytes_eq(a: &[u8], b: &[u8], ignore_case: bool) -> bool {
    if ignore_case { a.eq_ignore_ascii_case(b) } else { a == b }
}

/// Test whether `b` falls within the inclusive range `lo..=hi`.
pub fn range_matches(lo: u8, hi: u8, b: u8, ignore_case: bool) -> bool {
    let within = |c: u8| lo <= c && c <= hi;
    within(b)
        || (ignore_case && (within(b.to_ascii_lowercase()) || within(b.to_ascii_uppercase())))
}

/// Decode the escape whose letter is at `src[pos]` (the backslash has already
/// been consumed). Returns the byte value and the offset after the escape.
pub fn unescape(src: &[u8], pos: usize) -> Option<(u8, usize)> {
    let c = *src.get(pos)?;
    if let Some(&b) = ESCAPES.get(&c) {
        return Some((b, pos + 1));
    }
    match c {
        b'x' => {
            let hex = src.get(pos + 1..pos + 3)?;
            let text = std::str::from_utf8(hex).ok()?;
            let value = u8::from_str_radix(text, 16).ok()?;
            Some((value, pos + 3))
        }
        c if c.is_ascii_punctuation() || c == b' ' => Some((c, pos + 1)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_classes() {
        assert!(is_id_start(b'a'));
        assert!(is_id_start(b'_'));
        assert!(!is_id_start(b'5'));
        assert!(is_id_continue(b'5'));
        assert!(!is_id_continue(b'-'));
        assert!(is_name_continue(b'-'));
        assert_eq!(name_end(b"left-paren x", 0), 10);
        assert_eq!(name_end(b"a- b", 0), 1);
    }

    #[test]
    fn utf8_stepping() {
        let s = "aé€😀".as_bytes();
        let mut pos = 0;
        let mut steps = vec![];
        while pos < s.len() {
            pos = next_char(s, pos, s.len());
            steps.push(pos);
        }
        assert_eq!(steps, vec![1, 3, 6, 10]);
        assert_eq!(prev_char(s, 0, 10), 6);
        assert_eq!(prev_char(s, 0, 3), 1);
        assert_eq!(prev_char(s, 0, 1), 0);
    }

    #[test]
    fn truncated_sequence_steps_one_byte() {
        let s = [0xe2u8, 0x82];
        assert_eq!(next_char(&s, 0, 2), 1);
        let bad = [0xe2u8, b'a', b'b'];
        assert_eq!(next_char(&bad, 0, 3), 1);
    }

    #[test]
    fn case_folding_is_ascii_only() {
        assert!(bytes_eq(b"Hello", b"hELLO", true));
        assert!(!bytes_eq(b"Hello", b"hello", false));
        assert!(!bytes_eq("É".as_bytes(), "é".as_bytes(), true));
    }

    #[test]
    fn ranges() {
        assert!(range_matches(b'a', b'z', b'm', false));
        assert!(!range_matches(b'a', b'z', b'M', false));
        assert!(range_matches(b'a', b'z', b'M', true));
    }

    #[test]
    fn escapes() {
        assert_eq!(unescape(b"n", 0), Some((b'\n', 1)));
        assert_eq!(unescape(b"x41rest", 0), Some((b'A', 3)));
        assert_eq!(unescape(b"\"", 0), Some((b'"', 1)));
        assert_eq!(unescape(b"xZZ", 0), None);
        assert_eq!(unescape(b"q", 0), None);
        assert_eq!(unescape(b"", 0), None);
    }
}
