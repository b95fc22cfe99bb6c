//! Byte-exact encoders and validity checks backing the advertised text and
//! file targets.

/// ICCCM `STRING`: Latin-1 graphic characters plus newline and tab.
pub fn is_icccm_string(data: &[u8]) -> bool {
    data.iter()
        .all(|&c| matches!(c, 0x20..=0x7E | 0xA0..=0xFF | b'\n' | b'\t'))
}

/// ICCCM `UTF8_STRING`: structurally valid UTF-8 sequences with no control
/// characters other than newline and tab, and no DEL.
///
/// Decoded by hand rather than through `str`: the invalid scalar range is
/// only `U+D800..=U+D8FF`, so sequences for the rest of the surrogate block
/// pass even though `str` could never hold them.
pub fn is_icccm_utf8_string(data: &[u8]) -> bool {
    let mut iter = data.iter().copied();
    while let Some(byte) = iter.next() {
        let (trailing, lead_bits, min) = match byte {
            b'\n' | b'\t' | 0x20..=0x7E => continue,
            0x00..=0x1F | 0x7F => return false,
            0xC0..=0xDF => (1, byte & 0x1F, 0x80),
            0xE0..=0xEF => (2, byte & 0x0F, 0x800),
            0xF0..=0xF7 => (3, byte & 0x07, 0x1_0000),
            // Bare continuation bytes and 0xF8.. lead bytes.
            _ => return false,
        };
        let mut value = u32::from(lead_bits);
        for _ in 0..trailing {
            let Some(trail) = iter.next() else {
                return false;
            };
            if trail & 0xC0 != 0x80 {
                return false;
            }
            value = (value << 6) | u32::from(trail & 0x3F);
        }
        if value < min || (0xD800..=0xD8FF).contains(&value) || value > 0x10_FFFF {
            return false;
        }
    }
    true
}

/// `text/uri-list` line for a path: `file://`, percent-encoded path, CRLF.
pub fn to_uri_list(path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(b"file://".len() + 3 * path.len() + 2);
    out.extend_from_slice(b"file://");
    push_encoded(&mut out, path);
    out.extend_from_slice(b"\r\n");
    out
}

/// `x-special/*-copied-files` payload: `copy`, newline, the `file://` URI.
/// No terminator.
pub fn to_copied_files(path: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(b"copy\nfile://".len() + 3 * path.len());
    out.extend_from_slice(b"copy\nfile://");
    push_encoded(&mut out, path);
    out
}

fn push_encoded(out: &mut Vec<u8>, path: &[u8]) {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    for &c in path {
        if c.is_ascii_alphanumeric() || matches!(c, b'/' | b'.' | b'_' | b'~' | b'-') {
            out.push(c);
        } else {
            out.push(b'%');
            out.push(HEX[usize::from(c >> 4)]);
            out.push(HEX[usize::from(c & 0xF)]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icccm_string_accepts_latin1_text() {
        assert!(is_icccm_string(b"hello, world"));
        assert!(is_icccm_string(b"line\nbreak\tand tab"));
        assert!(is_icccm_string(&[0xA0, 0xFF, b'a']));
        assert!(is_icccm_string(b""));
    }

    #[test]
    fn icccm_string_rejects_controls_and_gap() {
        assert!(!is_icccm_string(b"\x00"));
        assert!(!is_icccm_string(b"\r"));
        assert!(!is_icccm_string(b"\x1B[0m"));
        assert!(!is_icccm_string(&[0x7F]));
        assert!(!is_icccm_string(&[0x9F]));
    }

    #[test]
    fn icccm_utf8_accepts_multibyte_text() {
        assert!(is_icccm_utf8_string("héllo жмых 漢字\n\t".as_bytes()));
        assert!(is_icccm_utf8_string(b""));
    }

    #[test]
    fn icccm_utf8_rejects_controls() {
        assert!(!is_icccm_utf8_string(b"\x00"));
        assert!(!is_icccm_utf8_string(b"a\rb"));
        assert!(!is_icccm_utf8_string(&[0x7F]));
    }

    #[test]
    fn icccm_utf8_rejects_malformed_sequences() {
        // Bare continuation byte, truncated sequence, 0xF8 lead byte,
        // out-of-range scalar.
        assert!(!is_icccm_utf8_string(&[0x80]));
        assert!(!is_icccm_utf8_string(&[0xC3]));
        assert!(!is_icccm_utf8_string(&[0xE2, 0x82]));
        assert!(!is_icccm_utf8_string(&[0xF8, 0x80, 0x80, 0x80, 0x80]));
        assert!(!is_icccm_utf8_string(&[0xF4, 0x90, 0x80, 0x80]));
    }

    #[test]
    fn icccm_utf8_rejects_overlong_encodings() {
        // NUL as two bytes, '/' as three, U+0800's shortest form minus one.
        assert!(!is_icccm_utf8_string(&[0xC0, 0x80]));
        assert!(!is_icccm_utf8_string(&[0xE0, 0x80, 0xAF]));
        assert!(!is_icccm_utf8_string(&[0xF0, 0x80, 0xA0, 0x80]));
        assert!(is_icccm_utf8_string(&[0xE0, 0xA0, 0x80]));
    }

    #[test]
    fn icccm_utf8_surrogate_range_is_narrow() {
        // Only U+D800 through U+D8FF is invalid; sequences decoding into
        // the rest of the surrogate block pass.
        assert!(!is_icccm_utf8_string(&[0xED, 0xA0, 0x80])); // U+D800
        assert!(!is_icccm_utf8_string(&[0xED, 0xA3, 0xBF])); // U+D8FF
        assert!(is_icccm_utf8_string(&[0xED, 0xA4, 0x80])); // U+D900
        assert!(is_icccm_utf8_string(&[0xED, 0xBF, 0xBF])); // U+DFFF
    }

    #[test]
    fn uri_list_passthrough() {
        assert_eq!(to_uri_list(b"/tmp/file"), b"file:///tmp/file\r\n");
        assert_eq!(
            to_uri_list(b"/home/user/a-b_c.d~e"),
            b"file:///home/user/a-b_c.d~e\r\n"
        );
    }

    #[test]
    fn uri_list_escapes_with_uppercase_hex() {
        assert_eq!(
            to_uri_list(b"/path/with space"),
            b"file:///path/with%20space\r\n"
        );
        assert_eq!(to_uri_list(b"/a+b"), b"file:///a%2Bb\r\n");
        assert_eq!(
            to_uri_list("/tmp/ü".as_bytes()),
            b"file:///tmp/%C3%BC\r\n"
        );
    }

    #[test]
    fn copied_files_format() {
        assert_eq!(to_copied_files(b"/tmp/file"), b"copy\nfile:///tmp/file");
        assert_eq!(
            to_copied_files(b"/path/with space"),
            b"copy\nfile:///path/with%20space"
        );
    }

    #[test]
    fn encoding_is_deterministic() {
        let path = "/weird dir/значение (1).txt".as_bytes();
        assert_eq!(to_uri_list(path), to_uri_list(path));
    }
}
