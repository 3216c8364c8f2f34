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

//! Decoding of message bodies according to `Content-Transfer-Encoding`.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::quoted_printable::qp_decode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEncoding {
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Map an encoding name to a known encoding.
    ///
    /// The match is exact and case-sensitive. Everything else, including the
    /// identity encodings (`7bit` and friends), yields `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "base64" => Some(TransferEncoding::Base64),
            "quoted-printable" => Some(TransferEncoding::QuotedPrintable),
            _ => None,
        }
    }

    fn decode(self, body: &str) -> Option<Vec<u8>> {
        match self {
            TransferEncoding::Base64 => {
                let mut compact = body.as_bytes().to_vec();
                compact.retain(|&b| b'\r' != b && b'\n' != b);
                BASE64.decode(&compact).ok()
            },
            TransferEncoding::QuotedPrintable => {
                qp_decode(body.as_bytes()).map(Cow::into_owned)
            },
        }
    }
}

/// Decode `body` according to the transfer encoding named by `encoding`.
///
/// This never fails. Unknown or absent encodings, as well as content which
/// cannot be decoded, yield `body` unchanged. Decoded bytes which are not
/// valid UTF-8 are converted lossily.
pub fn decode_body<'a>(body: &'a str, encoding: &str) -> Cow<'a, str> {
    let decoded = TransferEncoding::from_name(encoding)
        .and_then(|encoding| encoding.decode(body));

    match decoded {
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Cow::Owned(s),
            Err(e) => {
                Cow::Owned(String::from_utf8_lossy(e.as_bytes()).into_owned())
            },
        },
        None => Cow::Borrowed(body),
    }
}
