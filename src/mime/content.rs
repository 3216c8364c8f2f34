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

//! Best-effort extraction of a readable body from an arbitrary message.
//!
//! This does not attempt to understand MIME in any depth. It looks at the
//! `Content-Type` declarations found anywhere in the message, and if the
//! message looks like a top-level `multipart/alternative` or `multipart/mixed`
//! body, picks the most readable part out of it. Anything else degrades to
//! treating everything after the first blank line as the body.
//!
//! Nothing here fails. An empty body in the result means nothing usable was
//! found.

use std::borrow::Cow;
use std::fmt;

use log::{debug, trace};
use memchr::memmem;

use super::transfer_encoding::decode_body;

/// At most this many `Content-Type` declarations are considered.
const MAX_CONTENT_TYPES: usize = 10;
/// Boundaries longer than this are truncated.
const MAX_BOUNDARY_LEN: usize = 512;

/// Part types to pick, in descending order of preference.
static PREFERRED_TYPES: &[&str] = &["text/html", "text/plain"];

/// A message as received, with line endings normalised to `\n`.
///
/// `\r\n` and bare `\r` both become `\n`. Bytes which are not valid UTF-8 are
/// replaced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage(String);

impl RawMessage {
    pub fn new(data: &[u8]) -> Self {
        RawMessage(normalize_newlines(&String::from_utf8_lossy(data)).into_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn normalize_newlines(s: &str) -> Cow<'_, str> {
    if s.contains('\r') {
        Cow::Owned(s.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(s)
    }
}

/// The result of parsing a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedMail {
    /// The decoded body; empty if nothing usable was found.
    pub body: String,
    /// The raw header block of the outer message.
    pub headers: String,
}

/// A `Content-Type` declaration found somewhere in a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentTypeDescriptor<'a> {
    /// `type/subtype`, lower-cased.
    pub mime_type: String,
    /// The `boundary` parameter, if there is one.
    pub boundary: Option<&'a str>,
    /// Byte offset of the declaration within the scanned text.
    pub offset: usize,
}

impl ContentTypeDescriptor<'_> {
    fn delimits_alternatives(&self) -> bool {
        matches!(
            self.mime_type.as_str(),
            "multipart/alternative" | "multipart/mixed"
        )
    }
}

/// Emits the parser's decisions to the log.
///
/// Traced parsing logs at debug level; ordinary parsing logs the same lines at
/// trace level so they are normally invisible.
struct Tracer {
    enabled: bool,
}

impl Tracer {
    fn log(&self, args: fmt::Arguments<'_>) {
        if self.enabled {
            debug!("[PARSER]: {}", args);
        } else {
            trace!("[PARSER]: {}", args);
        }
    }
}

/// Extract the body and outer header block from `message`.
pub fn parse_message(message: &RawMessage) -> ParsedMail {
    parse_message_traced(message, false)
}

/// Like `parse_message`, but with `trace` set, logs every decision made along
/// the way at debug level.
pub fn parse_message_traced(message: &RawMessage, trace: bool) -> ParsedMail {
    let tracer = Tracer { enabled: trace };
    let text = message.as_str();

    let content_types = scan_content_types(text, MAX_CONTENT_TYPES);
    tracer.log(format_args!("Detected content-types: {:?}", content_types));

    if content_types.is_empty() {
        tracer.log(format_args!(
            "Falling back to dumb parser due to no content-type"
        ));
    } else if let Some(parsed) =
        parse_alternatives(text, &content_types, &tracer)
    {
        return parsed;
    }

    dumb_parse(text, &tracer)
}

fn parse_alternatives(
    text: &str,
    content_types: &[ContentTypeDescriptor<'_>],
    tracer: &Tracer,
) -> Option<ParsedMail> {
    let mut boundary = None::<&str>;
    let mut leaf_types = Vec::<&str>::new();
    for ct in content_types {
        if ct.delimits_alternatives() {
            // A nested alternative set carries the interesting parts, so
            // later declarations win.
            if let Some(b) = ct.boundary {
                tracer.log(format_args!(
                    "{} boundary found ({})",
                    ct.mime_type, b
                ));
                boundary = Some(b);
            }
        } else {
            leaf_types.push(&ct.mime_type);
        }
    }

    let (Some(boundary), Some(&first_leaf)) = (boundary, leaf_types.first())
    else {
        tracer.log(format_args!(
            "No alternative boundary and/or leaf type, using dumb parser"
        ));
        return None;
    };

    let target = PREFERRED_TYPES
        .iter()
        .copied()
        .find(|preferred| leaf_types.contains(preferred))
        .unwrap_or(first_leaf);
    tracer.log(format_args!("Target MIME type: \"{}\"", target));

    let Some(segment) = find_segment(text, boundary, target) else {
        tracer.log(format_args!("Body not found, resorting to dumb parser"));
        return None;
    };
    tracer.log(format_args!("Body base string: {:?}", segment));

    let split = segment.find("\n\n")?;
    let body = trim_body(&segment[split + 2..]);
    tracer.log(format_args!("Detected body: {:?}", body));
    if body.is_empty() {
        tracer.log(format_args!("Body empty, resorting to dumb parser"));
        return None;
    }

    let encoding = transfer_encoding_of(&segment[..split]);
    tracer.log(format_args!("Detected body encoding: \"{}\"", encoding));

    Some(ParsedMail {
        body: decode_body(body, encoding).into_owned(),
        headers: header_block(text).to_owned(),
    })
}

/// Walk the parts delimited by `boundary` in document order and return the
/// content (including part headers) of the first whose type is `target`.
///
/// The walk stops at the closing delimiter, or when the delimiters run out.
fn find_segment<'a>(
    text: &'a str,
    boundary: &str,
    target: &str,
) -> Option<&'a str> {
    let delimiter = format!("--{}", boundary);
    let positions = memmem::find_iter(text.as_bytes(), delimiter.as_bytes())
        .collect::<Vec<_>>();

    for (ix, &position) in positions.iter().enumerate() {
        let start = position + delimiter.len();
        if text[start..].starts_with("--") {
            break;
        }

        let end = positions.get(ix + 1).copied().unwrap_or(text.len());
        let segment = &text[start..end];
        let matches = scan_content_types(segment, 1)
            .first()
            .is_some_and(|ct| ct.mime_type == target);
        if matches {
            return Some(segment);
        }
    }

    None
}

/// Treat everything after the first blank line as the body.
fn dumb_parse(text: &str, tracer: &Tracer) -> ParsedMail {
    tracer.log(format_args!("Starting dumb parser..."));

    let Some(split) = text.find("\n\n") else {
        tracer.log(format_args!("No blank line found; no body"));
        return ParsedMail::default();
    };

    let headers = &text[..split];
    let body = trim_body(&text[split + 2..]);
    let encoding = transfer_encoding_of(headers);
    tracer.log(format_args!("Detected encoding: \"{}\"", encoding));

    ParsedMail {
        body: decode_body(body, encoding).into_owned(),
        headers: headers.to_owned(),
    }
}

/// Everything before the first blank line, or nothing if there is none.
pub fn header_block(text: &str) -> &str {
    text.find("\n\n").map_or("", |split| &text[..split])
}

fn trim_body(s: &str) -> &str {
    s.trim_matches(|c| '\t' == c || ' ' == c || '\n' == c)
}

/// Iterate the lines of `text` along with their byte offsets.
fn lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split('\n').scan(0usize, |pos, line| {
        let start = *pos;
        *pos += line.len() + 1;
        Some((start, line))
    })
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &s[prefix.len()..])
}

fn is_continuation(line: &str) -> bool {
    line.starts_with(|c| ' ' == c || '\t' == c) && !line.trim().is_empty()
}

/// Find up to `limit` `Content-Type` declarations in `text` in one pass.
///
/// Declarations are recognised at the start of any line, not only within the
/// outer header block, so the declarations of the parts of a multipart body
/// are found too.
pub fn scan_content_types(
    text: &str,
    limit: usize,
) -> Vec<ContentTypeDescriptor<'_>> {
    let mut found = Vec::new();
    let mut lines = lines(text).peekable();

    while found.len() < limit {
        let Some((start, line)) = lines.next() else {
            break;
        };

        let Some(mime_type) = strip_prefix_ignore_case(line, "content-type:")
            .and_then(mime_type_of)
        else {
            continue;
        };

        let mut end = start + line.len();
        while let Some(&(next_start, next)) = lines.peek() {
            if !is_continuation(next) {
                break;
            }
            end = next_start + next.len();
            lines.next();
        }

        found.push(ContentTypeDescriptor {
            mime_type,
            boundary: boundary_param(&text[start..end]),
            offset: start,
        });
    }

    found
}

/// Extract the lower-cased `type/subtype` from a `Content-Type` value.
fn mime_type_of(value: &str) -> Option<String> {
    let value = value.trim_start();
    let end = value
        .find(|c: char| ';' == c || c.is_whitespace())
        .unwrap_or(value.len());
    let token = &value[..end];
    let (typ, subtype) = token.split_once('/')?;
    if typ.is_empty() || subtype.is_empty() {
        return None;
    }

    Some(token.to_ascii_lowercase())
}

/// Extract the `boundary` parameter from a whole `Content-Type` declaration,
/// quoted or not.
fn boundary_param(declaration: &str) -> Option<&str> {
    const PARM: &str = "boundary=";

    let position = declaration.to_ascii_lowercase().find(PARM)?;
    let rest = &declaration[position + PARM.len()..];
    let (value, terminators): (&str, &[char]) = match rest.strip_prefix('"') {
        Some(quoted) => (quoted, &['"', '\n', '\r'][..]),
        None => (rest, &[';', ' ', '\t', '\n', '\r'][..]),
    };

    let end = value.find(terminators).unwrap_or(value.len());
    let value = truncate_chars(&value[..end], MAX_BOUNDARY_LEN);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    s.char_indices().nth(max).map_or(s, |(end, _)| &s[..end])
}

/// The value of the first `Content-Transfer-Encoding` header in
/// `header_span`, or the empty string.
fn transfer_encoding_of(header_span: &str) -> &str {
    lines(header_span)
        .find_map(|(_, line)| {
            strip_prefix_ignore_case(line, "content-transfer-encoding:")
        })
        .map_or("", str::trim)
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn parse(s: &str) -> ParsedMail {
        parse_message(&RawMessage::new(s.as_bytes()))
    }

    #[test]
    fn newline_normalisation() {
        assert_eq!("a\nb\nc\n\nd", RawMessage::new(b"a\r\nb\rc\r\n\r\nd").as_str());
        assert_eq!("a\n\nb", RawMessage::new(b"a\n\nb").as_str());
    }

    #[test]
    fn simple_message_uses_dumb_parsing() {
        let parsed = parse(
            "From: zim@irk.example\r\n\
             Subject: Hello\r\n\
             \r\n\
             \tThe body.  \r\n\r\n",
        );
        assert_eq!("The body.", parsed.body);
        assert_eq!("From: zim@irk.example\nSubject: Hello", parsed.headers);
    }

    #[test]
    fn encoded_subject_message() {
        let parsed = parse("Subject: =?UTF-8?B?SGVsbG8=?=\n\nHello body");
        assert_eq!("Hello body", parsed.body);
        assert_eq!("Subject: =?UTF-8?B?SGVsbG8=?=", parsed.headers);
    }

    #[test]
    fn no_blank_line_yields_nothing() {
        assert_eq!(ParsedMail::default(), parse("Subject: hi\nno body here"));
        assert_eq!(ParsedMail::default(), parse(""));
    }

    #[test]
    fn single_part_transfer_encoding() {
        let parsed = parse(
            "Content-Type: text/plain; charset=utf-8\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             SGVsbG8g\n\
             d29ybGQ=\n",
        );
        assert_eq!("Hello world", parsed.body);

        let parsed = parse(
            "Content-Transfer-Encoding: quoted-printable\n\
             \n\
             caf=C3=A9 =\n\
             cr=C3=A8me\n",
        );
        assert_eq!("café crème", parsed.body);
    }

    const ALTERNATIVE: &str = "\
From: zim@irk.example
Subject: Alternatives
MIME-Version: 1.0
Content-Type: multipart/alternative; boundary=\"b1\"

This is a multi-part message in MIME format.

--b1
Content-Type: text/plain; charset=utf-8

Plain text
--b1
Content-Type: text/html; charset=utf-8
Content-Transfer-Encoding: quoted-printable

<p>HTML =E2=9C=93</p>
--b1--
";

    #[test]
    fn html_is_preferred() {
        let parsed = parse(ALTERNATIVE);
        assert_eq!("<p>HTML \u{2713}</p>", parsed.body);
        assert_eq!(
            "From: zim@irk.example\n\
             Subject: Alternatives\n\
             MIME-Version: 1.0\n\
             Content-Type: multipart/alternative; boundary=\"b1\"",
            parsed.headers
        );
    }

    #[test]
    fn html_is_preferred_regardless_of_order() {
        let parsed = parse(
            "Content-Type: multipart/alternative; boundary=xyz\n\
             \n\
             --xyz\n\
             Content-Type: text/html\n\
             \n\
             <b>bold</b>\n\
             --xyz\n\
             Content-Type: text/plain\n\
             \n\
             plain\n\
             --xyz--\n",
        );
        assert_eq!("<b>bold</b>", parsed.body);
    }

    #[test]
    fn first_of_same_type_wins() {
        let parsed = parse(
            "Content-Type: multipart/mixed; boundary=\"m\"\n\
             \n\
             --m\n\
             Content-Type: text/plain\n\
             \n\
             first\n\
             --m\n\
             Content-Type: text/plain\n\
             \n\
             second\n\
             --m--\n",
        );
        assert_eq!("first", parsed.body);
    }

    #[test]
    fn first_leaf_is_default_target() {
        let parsed = parse(
            "Content-Type: multipart/mixed; boundary=\"m\"\n\
             \n\
             --m\n\
             Content-Type: application/json\n\
             \n\
             {\"a\": 1}\n\
             --m\n\
             Content-Type: image/png\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             iVBORw0KGgo=\n\
             --m--\n",
        );
        assert_eq!("{\"a\": 1}", parsed.body);
    }

    #[test]
    fn part_encoding_is_not_taken_from_outer_headers() {
        let parsed = parse(
            "Content-Type: multipart/alternative; boundary=\"b\"\n\
             Content-Transfer-Encoding: base64\n\
             \n\
             --b\n\
             Content-Type: text/plain\n\
             \n\
             SGVsbG8=\n\
             --b--\n",
        );
        assert_eq!("SGVsbG8=", parsed.body);
    }

    #[test]
    fn nested_alternative_in_mixed() {
        let parsed = parse(
            "Content-Type: multipart/mixed; boundary=\"outer\"\n\
             \n\
             --outer\n\
             Content-Type: multipart/alternative; boundary=\"inner\"\n\
             \n\
             --inner\n\
             Content-Type: text/plain\n\
             \n\
             plain\n\
             --inner\n\
             Content-Type: text/html\n\
             \n\
             <i>html</i>\n\
             --inner--\n\
             --outer\n\
             Content-Type: application/pdf\n\
             \n\
             JVBERi0=\n\
             --outer--\n",
        );
        assert_eq!("<i>html</i>", parsed.body);
    }

    #[test]
    fn empty_target_part_falls_back() {
        let message = "Content-Type: multipart/alternative; boundary=\"b\"\n\
                       Subject: unterminated\n\
                       \n\
                       --b\n\
                       Content-Type: text/plain\n\
                       \n\
                       --b\n";
        let parsed = parse(message);
        assert_eq!(
            "--b\nContent-Type: text/plain\n\n--b",
            parsed.body
        );
        assert_eq!(
            "Content-Type: multipart/alternative; boundary=\"b\"\n\
             Subject: unterminated",
            parsed.headers
        );
    }

    #[test]
    fn unclosed_walk_with_empty_target_uses_dumb_body() {
        let parsed = parse(
            "Content-Type: multipart/alternative; boundary=\"b\"\n\
             \n\
             intro\n\
             --b\n\
             Content-Type: text/plain\n\
             \n\
             plain\n\
             --b\n\
             Content-Type: text/html\n\
             \n\
             --b\n",
        );
        assert_eq!(
            "intro\n--b\nContent-Type: text/plain\n\nplain\n\
             --b\nContent-Type: text/html\n\n--b",
            parsed.body
        );
        assert_eq!(
            "Content-Type: multipart/alternative; boundary=\"b\"",
            parsed.headers
        );

        // Same again with the empty target as the last part.
        let parsed = parse(
            "Content-Type: multipart/alternative; boundary=\"b\"\n\
             \n\
             --b\n\
             Content-Type: text/plain\n\
             \n\
             plain\n\
             --b\n\
             Content-Type: text/html\n\
             \n",
        );
        assert_eq!(
            "--b\nContent-Type: text/plain\n\nplain\n\
             --b\nContent-Type: text/html",
            parsed.body
        );
    }

    #[test]
    fn parts_after_closing_delimiter_are_ignored() {
        let parsed = parse(
            "Content-Type: multipart/alternative; boundary=\"b\"\n\
             \n\
             --b\n\
             Content-Type: text/plain\n\
             \n\
             plain\n\
             --b--\n\
             --b\n\
             Content-Type: text/html\n\
             \n\
             <p>late</p>\n",
        );
        // text/html is still the target, but it only appears after the end.
        assert_eq!(
            "--b\nContent-Type: text/plain\n\nplain\n--b--\n--b\n\
             Content-Type: text/html\n\n<p>late</p>",
            parsed.body
        );
    }

    #[test]
    fn multipart_without_boundary_falls_back() {
        let parsed = parse(
            "Content-Type: multipart/alternative\n\
             \n\
             Content-Type: text/plain\n\
             \n\
             body\n",
        );
        assert_eq!("Content-Type: text/plain\n\nbody", parsed.body);
        assert_eq!("Content-Type: multipart/alternative", parsed.headers);
    }

    #[test]
    fn content_type_scanning() {
        let text = "Subject: x\n\
                    CONTENT-TYPE: Multipart/Alternative;\n \
                    boundary=\"abc def\"; charset=us-ascii\n\
                    content-type:text/html\n\
                    Content-Type: garbage\n\
                    X-Content-Type: text/plain\n";
        let found = scan_content_types(text, 10);
        assert_eq!(2, found.len());
        assert_eq!("multipart/alternative", found[0].mime_type);
        assert_eq!(Some("abc def"), found[0].boundary);
        assert_eq!(11, found[0].offset);
        assert_eq!("text/html", found[1].mime_type);
        assert_eq!(None, found[1].boundary);

        assert_eq!(1, scan_content_types(text, 1).len());
    }

    #[test]
    fn boundary_parameters() {
        assert_eq!(
            Some("simple"),
            boundary_param("Content-Type: multipart/mixed; boundary=simple")
        );
        assert_eq!(
            Some("simple"),
            boundary_param(
                "Content-Type: multipart/mixed; boundary=simple; x=y"
            )
        );
        assert_eq!(
            Some("with space"),
            boundary_param(
                "Content-Type: multipart/mixed; BOUNDARY=\"with space\""
            )
        );
        assert_eq!(
            None,
            boundary_param("Content-Type: multipart/mixed; boundary=\"\"")
        );
        let long = format!("Content-Type: multipart/mixed; boundary={}", "x".repeat(600));
        assert_eq!(Some(&"x".repeat(512)[..]), boundary_param(&long));
    }

    #[test]
    fn transfer_encoding_lookup() {
        assert_eq!(
            "base64",
            transfer_encoding_of(
                "Content-Type: text/plain\ncontent-transfer-encoding:  base64 "
            )
        );
        assert_eq!("", transfer_encoding_of("Content-Type: text/plain"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 1024,
            ..ProptestConfig::default()
        })]

        #[test]
        fn parse_never_panics(s in "[-a-zA-Z:;=\" \n/]{0,200}") {
            parse(&s);
        }

        #[test]
        fn parse_never_panics_on_multipart(
            parts in prop::collection::vec("(--b(--)?\n)?[a-z:/ \n]{0,40}", 0..8)
        ) {
            let message = format!(
                "Content-Type: multipart/alternative; boundary=b\n\
                 Content-Type: text/plain\n\n{}",
                parts.concat()
            );
            parse(&message);
        }

        #[test]
        fn headers_are_text_before_first_blank_line(
            headers in "[A-Za-z]{1,10}: [a-z ]{0,20}",
            body in "[a-z\n]{0,100}",
        ) {
            let message = format!("{}\n\n{}", headers, body);
            let parsed = parse(&message);
            prop_assert_eq!(headers, parsed.headers);
        }
    }
}
