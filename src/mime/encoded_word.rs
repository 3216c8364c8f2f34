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

//! RFC 2047 "encoded word" decoding for display headers such as `Subject`.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use encoding_rs::Encoding;

use super::quoted_printable::qp_decode;

/// Why decoding a single encoded word failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WordError {
    /// The encoded text could not be transfer-decoded. The word is left as
    /// it is.
    Content,
    /// The charset is not one we know. This spoils the whole header.
    Charset,
}

/// Decode all encoded words within the unstructured header value `raw`.
///
/// Whitespace between adjacent encoded words is deleted, as RFC 2047
/// requires; all other text is kept verbatim. Words whose content cannot be
/// decoded are left untouched. If any word names an unknown charset, `raw` is
/// returned unchanged.
pub fn decode_header_value(raw: &str) -> Cow<'_, str> {
    if !raw.contains("=?") {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut between_words = false;

    while let Some(start) = rest.find("=?") {
        let Some((charset, encoding, text, end)) = split_word(&rest[start..])
        else {
            break;
        };

        match ew_decode(charset, encoding, text) {
            Ok(decoded) => {
                let before = &rest[..start];
                if !between_words
                    || before.chars().any(|c| !c.is_ascii_whitespace())
                {
                    out.push_str(before);
                }
                out.push_str(&decoded);
                rest = &rest[start + end..];
                between_words = true;
            },

            Err(WordError::Content) => {
                out.push_str(&rest[..start + 2]);
                rest = &rest[start + 2..];
                between_words = false;
            },

            Err(WordError::Charset) => return Cow::Borrowed(raw),
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

/// Split `=?charset?e?text?=` at the start of `s` into its components and the
/// byte length of the whole word.
fn split_word(s: &str) -> Option<(&str, char, &str, usize)> {
    let body = s.strip_prefix("=?")?;
    let charset_len = body.find('?')?;
    let charset = &body[..charset_len];

    let after_charset = &body[charset_len + 1..];
    let mut chars = after_charset.chars();
    let encoding = chars.next()?;
    if Some('?') != chars.next() {
        return None;
    }

    let text_start = encoding.len_utf8() + 1;
    let text_len = after_charset[text_start..].find("?=")?;
    let text = &after_charset[text_start..text_start + text_len];

    let total = 2 + charset_len + 1 + text_start + text_len + 2;
    Some((charset, encoding, text, total))
}

fn ew_decode(
    charset: &str,
    encoding: char,
    text: &str,
) -> Result<String, WordError> {
    let content = decode_xfer(encoding, text).ok_or(WordError::Content)?;
    decode_charset(charset, &content).ok_or(WordError::Charset)
}

fn decode_xfer(xfer: char, content: &str) -> Option<Vec<u8>> {
    match xfer {
        'q' | 'Q' => {
            // _ in the content (before transfer decoding) stands for ASCII
            // space regardless of charset
            let content = content.replace('_', " ");
            qp_decode(content.as_bytes()).map(Cow::into_owned)
        },
        'b' | 'B' => BASE64.decode(content).ok(),
        _ => None,
    }
}

fn decode_charset(charset: &str, content: &[u8]) -> Option<String> {
    // RFC 2231 allows a language suffix, as in "us-ascii*en"
    let label = charset.split('*').next().unwrap_or(charset);
    Some(
        Encoding::for_label_no_replacement(label.as_bytes())?
            .decode_with_bom_removal(content)
            .0
            .into_owned(),
    )
}
