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

use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

/// A command line sent by an SMTP client, without its line ending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// HELO|EHLO origin-host ignored...
    Helo { extended: bool, origin: String },
    /// AUTH mechanism [initial-response]
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    /// MAIL FROM:<return-path> [SIZE=sz] [BODY=encoding] ...
    ///
    /// Unrecognised parameters are ignored and reported in `warnings`.
    MailFrom {
        return_path: String,
        size: Option<u64>,
        warnings: Vec<String>,
    },
    /// RCPT TO:<[@route,...:]forward-path> ...
    Recipient {
        forward_path: String,
        warnings: Vec<String>,
    },
    /// DATA
    Data,
    /// RSET
    Reset,
    /// VRFY ignored...
    Verify,
    /// EXPN ignored...
    Expand,
    /// HELP ignored...
    Help,
    /// NOOP
    Noop,
    /// QUIT
    Quit,
    /// Anything that looks like a common HTTP request line.
    Http,
}

const MAX_WARNINGS: usize = 4;
const MAX_QUOTED_PARM: usize = 64;

/// Commands without arguments, or whose arguments are ignored.
///
/// The boolean indicates whether anything may follow the prefix.
static SIMPLE_COMMANDS: &[(&str, Command, bool)] = &[
    ("DATA", Command::Data, false),
    ("RSET", Command::Reset, false),
    ("VRFY ", Command::Verify, true),
    ("EXPN ", Command::Expand, true),
    ("HELP", Command::Help, true),
    ("NOOP", Command::Noop, false),
    ("QUIT", Command::Quit, false),
    ("GET ", Command::Http, true),
    ("HEAD ", Command::Http, true),
    ("POST ", Command::Http, true),
    ("PUT ", Command::Http, true),
];

lazy_static! {
    static ref RX_HELO: Regex =
        Regex::new("^(?i)(HELO|EHLO) ([^ ]+)").unwrap();
    static ref RX_MAIL: Regex =
        Regex::new("^(?i)MAIL FROM: ?<([^>]*)>(.*)$").unwrap();
    static ref RX_MAIL_BODY_PARM: Regex =
        Regex::new("^(?i)BODY=(7BIT|8BITMIME)$").unwrap();
    static ref RX_MAIL_SIZE_PARM: Regex =
        Regex::new("^(?i)SIZE=([0-9]+)$").unwrap();
    static ref RX_RCPT: Regex =
        Regex::new("^(?i)RCPT TO: ?<(?:@[^:]+:)?([^>]+)>(.*)$").unwrap();
    static ref RX_AUTH: Regex =
        Regex::new("^(?i)AUTH ([A-Z0-9-]+)(?: ([0-9A-Za-z+/=]+))?$").unwrap();
    static ref RX_KNOWN_COMMANDS: Regex = Regex::new(
        "^(?i)(DATA|RSET|VRFY|EXPN|HELP|NOOP|QUIT|MAIL|RCPT|HELO|EHLO|AUTH)\
         ( .*)?$"
    )
    .unwrap();
}

/// Whether `s` starts with a command verb we know, even if the rest of the
/// line could not be parsed.
///
/// This distinguishes bad arguments from an unknown command.
pub fn looks_like_known_command(s: &str) -> bool {
    RX_KNOWN_COMMANDS.is_match(s)
}

fn truncate_for_warning(s: &str) -> &str {
    s.char_indices()
        .nth(MAX_QUOTED_PARM)
        .map_or(s, |(ix, _)| &s[..ix])
}

impl FromStr for Command {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let mut warnings = Vec::<String>::new();
        let mut add_warning = |w: String| {
            if warnings.len() < MAX_WARNINGS {
                warnings.push(w);
            }
        };

        for &(prefix, ref cmd, allow_trailing) in SIMPLE_COMMANDS {
            let matches_prefix = s
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
            if matches_prefix && (allow_trailing || s.len() == prefix.len()) {
                return Ok(cmd.clone());
            }
        }

        if let Some(cap) = RX_HELO.captures(s) {
            Ok(Command::Helo {
                extended: cap[1].eq_ignore_ascii_case("EHLO"),
                origin: cap[2].to_owned(),
            })
        } else if let Some(cap) = RX_MAIL.captures(s) {
            let mut size = None::<u64>;
            for parm in cap[2].split(' ').filter(|p| !p.is_empty()) {
                if let Some(size_cap) = RX_MAIL_SIZE_PARM.captures(parm) {
                    match size_cap[1].parse::<u64>() {
                        Ok(sz) => size = Some(sz),
                        Err(_) => add_warning(format!(
                            "Ignoring invalid MAIL FROM parameter {:?}",
                            truncate_for_warning(parm),
                        )),
                    }
                } else if !RX_MAIL_BODY_PARM.is_match(parm) {
                    add_warning(format!(
                        "Ignoring unknown MAIL FROM parameter {:?}",
                        truncate_for_warning(parm),
                    ));
                }
            }

            Ok(Command::MailFrom {
                return_path: cap[1].to_owned(),
                size,
                warnings,
            })
        } else if let Some(cap) = RX_RCPT.captures(s) {
            let extra = cap[2].trim();
            if !extra.is_empty() {
                add_warning(format!(
                    "Ignoring extraneous RCPT TO parameters: {:?}",
                    truncate_for_warning(extra),
                ));
            }

            Ok(Command::Recipient {
                forward_path: cap[1].to_owned(),
                warnings,
            })
        } else if let Some(cap) = RX_AUTH.captures(s) {
            Ok(Command::Auth {
                mechanism: cap[1].to_ascii_uppercase(),
                initial_response: cap.get(2).map(|m| m.as_str().to_owned()),
            })
        } else {
            Err(())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn helo(extended: bool, origin: &str) -> Result<Command, ()> {
        Ok(Command::Helo {
            extended,
            origin: origin.to_owned(),
        })
    }

    fn mail(
        return_path: &str,
        size: Option<u64>,
        warnings: &[&str],
    ) -> Result<Command, ()> {
        Ok(Command::MailFrom {
            return_path: return_path.to_owned(),
            size,
            warnings: warnings.iter().map(|&w| w.to_owned()).collect(),
        })
    }

    fn rcpt(forward_path: &str, warnings: &[&str]) -> Result<Command, ()> {
        Ok(Command::Recipient {
            forward_path: forward_path.to_owned(),
            warnings: warnings.iter().map(|&w| w.to_owned()).collect(),
        })
    }

    #[test]
    fn greetings() {
        assert_eq!(helo(false, "mx.irk.example"), "HELO mx.irk.example".parse());
        assert_eq!(
            helo(true, "mx.irk.example"),
            "ehlo mx.irk.example some client software".parse()
        );
        assert_eq!(Err(()), "EHLO".parse::<Command>());
        assert_eq!(Err(()), "LHLO mx.irk.example".parse::<Command>());
        assert!(looks_like_known_command("EHLO"));
    }

    #[test]
    fn mail_from() {
        assert_eq!(mail("zim@irk.example", None, &[]), "MAIL FROM:<zim@irk.example>".parse());
        assert_eq!(
            mail("zim@irk.example", None, &[]),
            "mail from: <zim@irk.example> BODY=8bitmime".parse()
        );
        assert_eq!(
            mail("zim@irk.example", Some(4096), &[]),
            "MAIL FROM:<zim@irk.example> body=7bit size=4096".parse()
        );
        assert_eq!(mail("", None, &[]), "MAIL FROM:<>".parse());
        assert_eq!(
            mail(
                "zim@irk.example",
                None,
                &["Ignoring unknown MAIL FROM parameter \"SMTPUTF8\""]
            ),
            "MAIL FROM:<zim@irk.example> SMTPUTF8".parse()
        );
        assert_eq!(
            mail(
                "zim@irk.example",
                None,
                &["Ignoring invalid MAIL FROM parameter \
                   \"SIZE=99999999999999999999\""]
            ),
            "MAIL FROM:<zim@irk.example> SIZE=99999999999999999999".parse()
        );
        assert_eq!(Err(()), "MAIL FROM:zim@irk.example".parse::<Command>());
        assert!(looks_like_known_command("MAIL FROM:zim@irk.example"));
    }

    #[test]
    fn mail_from_warnings_are_bounded() {
        let line = format!("MAIL FROM:<a@b> {}", "X=Y ".repeat(20));
        match line.parse::<Command>() {
            Ok(Command::MailFrom { warnings, .. }) => {
                assert_eq!(MAX_WARNINGS, warnings.len())
            },
            r => panic!("Unexpected parse: {:?}", r),
        }

        let line = format!("MAIL FROM:<a@b> {}", "Z".repeat(200));
        match line.parse::<Command>() {
            Ok(Command::MailFrom { warnings, .. }) => {
                assert!(warnings[0].len() < 120);
            },
            r => panic!("Unexpected parse: {:?}", r),
        }
    }

    #[test]
    fn recipient() {
        assert_eq!(rcpt("dib@example.com", &[]), "RCPT TO:<dib@example.com>".parse());
        assert_eq!(
            rcpt("dib@example.com", &[]),
            "rcpt to:<@relay.example,@other.example:dib@example.com>".parse()
        );
        assert_eq!(
            rcpt(
                "dib@example.com",
                &["Ignoring extraneous RCPT TO parameters: \"NOTIFY=NEVER\""]
            ),
            "RCPT TO:<dib@example.com> NOTIFY=NEVER".parse()
        );
        assert_eq!(Err(()), "RCPT TO:<>".parse::<Command>());
    }

    #[test]
    fn simple_commands() {
        assert_eq!(Ok(Command::Data), "DATA".parse());
        assert_eq!(Ok(Command::Data), "data".parse());
        assert_eq!(Err(()), "DATA now".parse::<Command>());
        assert_eq!(Err(()), "DATABASE".parse::<Command>());
        assert_eq!(Ok(Command::Reset), "RSET".parse());
        assert_eq!(Ok(Command::Verify), "VRFY dib".parse());
        assert_eq!(Err(()), "VRFY".parse::<Command>());
        assert_eq!(Ok(Command::Expand), "EXPN staff".parse());
        assert_eq!(Ok(Command::Help), "HELP".parse());
        assert_eq!(Ok(Command::Help), "help DATA".parse());
        assert_eq!(Ok(Command::Noop), "NOOP".parse());
        assert_eq!(Ok(Command::Quit), "quit".parse());
        assert_eq!(Err(()), "QUIT please".parse::<Command>());
        assert_eq!(Ok(Command::Http), "GET / HTTP/1.1".parse());
        assert_eq!(Ok(Command::Http), "POST /login HTTP/1.0".parse());
        assert_eq!(Err(()), "STARTTLS".parse::<Command>());
        assert!(!looks_like_known_command("STARTTLS"));
    }

    #[test]
    fn auth() {
        assert_eq!(
            Ok(Command::Auth {
                mechanism: "PLAIN".to_owned(),
                initial_response: Some("AHppbQBpbnZhZGVy".to_owned()),
            }),
            "AUTH PLAIN AHppbQBpbnZhZGVy".parse()
        );
        assert_eq!(
            Ok(Command::Auth {
                mechanism: "LOGIN".to_owned(),
                initial_response: None,
            }),
            "auth login".parse()
        );
    }
}
