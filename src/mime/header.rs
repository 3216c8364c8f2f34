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

//! Reading of RFC 5322 header blocks into a case-insensitive multimap.

use std::borrow::Cow;

use nom::{
    bytes::complete::take_while1, character::complete::char,
    sequence::terminated, IResult,
};
use thiserror::Error;

use super::encoded_word::decode_header_value;

/// A header block which could not be tokenised.
///
/// Line numbers are 1-based and count from the start of the block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderParseError {
    #[error("line {0}: continuation line without a preceding header")]
    ContinuationWithoutHeader(usize),
    #[error("line {0}: header line has no ':'")]
    MissingColon(usize),
    #[error("line {0}: invalid header field name")]
    InvalidName(usize),
    #[error("line {0}: end of input before the blank line ending the headers")]
    Unterminated(usize),
}

/// The headers of a message, in the order they appeared.
///
/// Lookups ignore ASCII case in the field name. Folded values are unfolded,
/// with each line break and its surrounding whitespace collapsed into a single
/// space.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    /// Return the first value of the named header, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Return every value of the named header, in order of appearance.
    pub fn get_all<'a: 'n, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + 'n {
        self.fields
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The `Subject` header with encoded words resolved.
    ///
    /// Missing subjects are empty. If the encoded words cannot be decoded,
    /// the raw value is returned.
    pub fn subject(&self) -> Cow<'_, str> {
        decode_header_value(self.get("Subject").unwrap_or(""))
    }
}

// RFC 5322 2.2 "ftext": printable US-ASCII except ':'
fn is_ftext(c: char) -> bool {
    ('!'..='~').contains(&c) && ':' != c
}

fn field_name(line: &str) -> IResult<&str, &str> {
    terminated(take_while1(is_ftext), char(':'))(line)
}

/// Read the header block at the start of `text`.
///
/// Reading stops at the first empty line. Running out of input before that
/// line is an error. Only `\n` (optionally preceded by `\r`) is recognised as
/// a line ending.
pub fn read_headers(text: &str) -> Result<Headers, HeaderParseError> {
    let mut headers = Headers::default();
    let mut lines = text.split('\n').enumerate().peekable();

    while let Some((ix, line)) = lines.next() {
        let line_no = ix + 1;
        // The final piece has no line ending, so it cannot end the block
        if lines.peek().is_none() {
            return Err(HeaderParseError::Unterminated(line_no));
        }

        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Ok(headers);
        }

        if line.starts_with(|c| ' ' == c || '\t' == c) {
            let (_, value) = headers
                .fields
                .last_mut()
                .ok_or(HeaderParseError::ContinuationWithoutHeader(line_no))?;
            let continuation = line.trim();
            if !continuation.is_empty() {
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(continuation);
            }
            continue;
        }

        match field_name(line) {
            Ok((value, name)) => {
                headers.fields.push((name.to_owned(), value.trim().to_owned()))
            },
            Err(_) if line.contains(':') => {
                return Err(HeaderParseError::InvalidName(line_no))
            },
            Err(_) => return Err(HeaderParseError::MissingColon(line_no)),
        }
    }

    // split() always yields at least one piece
    Err(HeaderParseError::Unterminated(1))
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn simple_headers() {
        let headers = read_headers(
            "From: zim@irk.example\n\
             To: dib@example.com\n\
             Subject: Greetings\n\
             \n\
             Body: not a header\n",
        )
        .unwrap();

        assert_eq!(3, headers.len());
        assert_eq!(Some("zim@irk.example"), headers.get("from"));
        assert_eq!(Some("dib@example.com"), headers.get("TO"));
        assert_eq!(Some("Greetings"), headers.get("Subject"));
        assert_eq!(None, headers.get("Body"));
        assert_eq!("Greetings", headers.subject());
    }

    #[test]
    fn repeated_headers() {
        let headers = read_headers(
            "Received: from a\nReceived: from b\nreceived: from c\n\n",
        )
        .unwrap();
        assert_eq!(Some("from a"), headers.get("Received"));
        assert_eq!(
            vec!["from a", "from b", "from c"],
            headers.get_all("RECEIVED").collect::<Vec<_>>()
        );
    }

    #[test]
    fn folded_headers() {
        let headers = read_headers(
            "Subject: a rather\r\n  long\r\n\tsubject  \r\n\
             Content-Type: multipart/alternative;\r\n \
             boundary=\"xyz\"\r\n\r\n",
        )
        .unwrap();
        assert_eq!(Some("a rather long subject"), headers.get("subject"));
        assert_eq!(
            Some("multipart/alternative; boundary=\"xyz\""),
            headers.get("content-type")
        );
    }

    #[test]
    fn encoded_subject() {
        let headers =
            read_headers("Subject: =?UTF-8?B?SGVsbG8=?=\n\nHello body")
                .unwrap();
        assert_eq!("Hello", headers.subject());
    }

    #[test]
    fn missing_subject_is_empty() {
        let headers = read_headers("From: zim@irk.example\n\n").unwrap();
        assert_eq!("", headers.subject());
    }

    #[test]
    fn unterminated_block_is_rejected() {
        assert_eq!(
            Err(HeaderParseError::Unterminated(1)),
            read_headers("Subject: hi")
        );
        assert_eq!(
            Err(HeaderParseError::Unterminated(2)),
            read_headers("Subject: hi\r\n")
        );
        assert_eq!(
            Err(HeaderParseError::Unterminated(3)),
            read_headers("Subject: a\n folded\n")
        );
        assert_eq!(Err(HeaderParseError::Unterminated(1)), read_headers(""));
    }

    #[test]
    fn empty_block_before_body() {
        assert!(read_headers("\n").unwrap().is_empty());
        assert!(read_headers("\r\nbody").unwrap().is_empty());
        assert_eq!(
            Some("hi"),
            read_headers("Subject: hi\n\n").unwrap().get("subject")
        );
    }

    #[test]
    fn lookup_result_outlives_name() {
        let headers = read_headers("Subject: hi\n\n").unwrap();
        let value = {
            let name = "SUBJECT".to_owned();
            headers.get(&name)
        };
        assert_eq!(Some("hi"), value);

        let all = {
            let name = String::from("subject");
            headers.get_all(&name).collect::<Vec<_>>()
        };
        assert_eq!(vec!["hi"], all);
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(
            Err(HeaderParseError::ContinuationWithoutHeader(1)),
            read_headers(" folded: nothing\n\n")
        );
        assert_eq!(
            Err(HeaderParseError::MissingColon(2)),
            read_headers("Subject: hi\nthis is not a header\n\n")
        );
        assert_eq!(
            Err(HeaderParseError::InvalidName(1)),
            read_headers("Bad Name: value\n\n")
        );
        assert_eq!(
            Err(HeaderParseError::InvalidName(1)),
            read_headers(": value\n\n")
        );
    }

    proptest! {
        #[test]
        fn read_headers_never_panics(s in ".*") {
            let _ = read_headers(&s);
        }
    }
}
