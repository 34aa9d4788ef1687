//! RFC 3986 percent-decoding for the request target, as used by the header
//! parser (spec §4.5, rule 2): `%XX` becomes a byte, `+` becomes a space.

/// Decode a percent-encoded URL component in place, returning the decoded
/// byte length. The output is always no longer than the input, so decoding
/// can be done in place over the same buffer.
pub fn decode_in_place(buf: &mut [u8]) -> usize {
    let mut read = 0;
    let mut write = 0;

    while read < buf.len() {
        let b = buf[read];

        if b == b'+' {
            buf[write] = b' ';
            read += 1;
        } else if b == b'%' && read + 2 < buf.len() && is_hex(buf[read + 1]) && is_hex(buf[read + 2])
        {
            let hi = hex_val(buf[read + 1]);
            let lo = hex_val(buf[read + 2]);
            buf[write] = (hi << 4) | lo;
            read += 3;
        } else {
            buf[write] = b;
            read += 1;
        }

        write += 1;
    }

    write
}

/// Decode into a freshly allocated `String`. Used wherever the source bytes
/// aren't conveniently mutable (e.g. a `&str` slice into the request line).
pub fn decode(s: &str) -> String {
    let mut buf = s.as_bytes().to_vec();
    let len = decode_in_place(&mut buf);
    buf.truncate(len);
    // The input was ASCII/UTF-8 and percent-decoding printable-ASCII bytes
    // never produces an invalid sequence for the subset this crate accepts;
    // a non-UTF8 result out of percent-decoded raw bytes is replaced lossily
    // rather than rejected, since the request line must still be usable.
    String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_percent_and_plus() {
        assert_eq!(decode("hello+world"), "hello world");
        assert_eq!(decode("a%2Fb%2Fc"), "a/b/c");
        assert_eq!(decode("100%25"), "100%");
    }

    #[test]
    fn left_inverse_of_encoding_on_printable_ascii() {
        for b in 0x20u8..=0x7e {
            let s = (b as char).to_string();
            let encoded: String = if b == b' ' {
                "+".into()
            } else if b.is_ascii_alphanumeric() {
                s.clone()
            } else {
                format!("%{:02X}", b)
            };

            assert_eq!(decode(&encoded), s);
        }
    }

    #[test]
    fn trailing_percent_is_left_untouched() {
        assert_eq!(decode("abc%"), "abc%");
        assert_eq!(decode("abc%2"), "abc%2");
    }
}
