//-
// Copyright (c) 2026, The Tmpbox Authors
//
// This file is part of Tmpbox.
//
// Tmpbox is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Tmpbox is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Tmpbox. If not, see <http://www.gnu.org/licenses/>.

use std::borrow::Cow;

/// Decodes quoted-printable encoding, as described by RFC 2045.
///
/// Encoded bytes and soft line endings are both handled, the latter by
/// discarding. Whitespace between the `=` and the line ending of a soft line
/// break is tolerated. UNIX line endings are handled as well as DOS line
/// endings. A lone `=` at the very end of the input is treated as a soft line
/// break.
///
/// Returns `None` if an `=` is followed by anything other than two
/// hexadecimal digits or a line ending; callers are expected to fall back to
/// the undecoded text in that case.
pub fn qp_decode(s: &[u8]) -> Option<Cow<'_, [u8]>> {
    if !s.contains(&b'=') {
        return Some(Cow::Borrowed(s));
    }

    let mut split = s.split(|&b| b'=' == b);
    let mut transformed = split.next().unwrap_or_default().to_vec();
    let mut elements = split.peekable();

    while let Some(element) = elements.next() {
        if element.is_empty() {
            if elements.peek().is_none() {
                break;
            }

            // "==" is never valid
            return None;
        }

        if let Some(tail) = soft_line_break(element) {
            transformed.extend_from_slice(tail);
            continue;
        }

        let encoded = element.get(..2)?;
        if !encoded.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }

        // Infallible since both bytes are hex digits
        let ch = (hex_value(encoded[0]) << 4) | hex_value(encoded[1]);
        transformed.push(ch);
        transformed.extend_from_slice(&element[2..]);
    }

    Some(Cow::Owned(transformed))
}

/// If `element` (the text after an `=`) starts a soft line break, return what
/// follows the line ending.
fn soft_line_break(element: &[u8]) -> Option<&[u8]> {
    let start = element
        .iter()
        .position(|&b| b' ' != b && b'\t' != b)
        .unwrap_or(element.len());
    let rest = &element[start..];

    if rest.is_empty() {
        // Only whitespace remained before the end of the input.
        return Some(rest);
    }

    rest.strip_prefix(b"\r\n")
        .or_else(|| rest.strip_prefix(b"\n"))
}

fn hex_value(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        _ => b - b'A' + 10,
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn assert_qp(expected: &[u8], input: &[u8]) {
        let actual = qp_decode(input).expect("decoding failed");
        assert_eq!(expected, &actual[..]);
    }

    #[test]
    fn test_qp_decode() {
        assert_qp(b"hello world", b"hello world");
        assert_qp(b"\xabfoo", b"=ABfoo");
        assert_qp(b"fo\xabo", b"fo=ABo");
        assert_qp(b"foo\xab", b"foo=AB");
        assert_qp(b"foo\xab", b"foo=ab");

        assert_qp(b"foo\xab\xcd", b"foo=AB=CD");
        assert_qp(b"foo\xabbar\xcd", b"foo=ABbar=CD");

        assert_qp(b"foo", b"foo=\n");
        assert_qp(b"foobar", b"foo=\nbar");
        assert_qp(b"foo", b"foo=\r\n");
        assert_qp(b"foobar", b"foo=\r\nbar");
        assert_qp(b"foobar", b"foo= \t\nbar");
        assert_qp(b"foo", b"foo=");

        assert_qp("caf\u{e9}".as_bytes(), b"caf=C3=A9");
    }

    #[test]
    fn invalid_sequences_fail() {
        assert_eq!(None, qp_decode(b"foo=()bar"));
        assert_eq!(None, qp_decode(b"foo==ABbar"));
        assert_eq!(None, qp_decode(b"foo=A"));
        assert_eq!(None, qp_decode(b"foo=+1bar"));
        assert_eq!(None, qp_decode("foo=ゑbar".as_bytes()));
    }

    #[test]
    fn unencoded_input_is_borrowed() {
        assert!(matches!(qp_decode(b"plain text"), Some(Cow::Borrowed(_))));
    }

    proptest! {
        #[test]
        fn qp_decode_never_panics_for_str(s in ".*") {
            qp_decode(s.as_bytes());
        }

        #[test]
        fn qp_decode_never_panics_for_bytes(
            s in prop::collection::vec(prop::num::u8::ANY, 0..20)
        ) {
            qp_decode(&s);
        }
    }
}
