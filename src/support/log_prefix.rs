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

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

/// Tracks text that should be included at the start of every log statement
/// emitted on behalf of one connection.
///
/// Clones of a `LogPrefix` share the same underlying data.
#[derive(Clone)]
pub struct LogPrefix {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Clone)]
struct Inner {
    protocol: String,
    peer: String,
    helo: Option<String>,
    recipient: Option<String>,
}

impl LogPrefix {
    pub fn new(protocol: String, peer: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                protocol,
                peer: sanitise(peer),
                helo: None,
                recipient: None,
            })),
        }
    }

    pub fn set_helo(&self, helo: String) {
        self.with_inner(|inner| inner.helo = Some(sanitise(helo)));
    }

    pub fn set_recipient(&self, recipient: Option<String>) {
        self.with_inner(|inner| inner.recipient = recipient.map(sanitise));
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        // A panic while holding the lock can't leave Inner inconsistent.
        let mut inner =
            self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut inner)
    }
}

impl fmt::Display for LogPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.with_inner(|inner| inner.clone());
        write!(f, "{}:{}", inner.protocol, inner.peer)?;
        if inner.helo.is_some() || inner.recipient.is_some() {
            write!(f, "[")?;
            let mut first = true;
            if let Some(ref helo) = inner.helo {
                write!(f, "helo={helo}")?;
                first = false;
            }

            if let Some(ref recipient) = inner.recipient {
                if !mem::take(&mut first) {
                    write!(f, " ")?;
                }
                write!(f, "rcpt={recipient}")?;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

fn sanitise(mut s: String) -> String {
    s.retain(|c| !c.is_control());
    if let Some((truncate_len, _)) = s.char_indices().nth(64) {
        s.truncate(truncate_len);
    }

    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formatting() {
        let prefix = LogPrefix::new("smtp".to_owned(), "10.0.0.1:4567".to_owned());
        assert_eq!("smtp:10.0.0.1:4567", prefix.to_string());

        let shared = prefix.clone();
        shared.set_helo("mx.example.org\r\n".to_owned());
        assert_eq!("smtp:10.0.0.1:4567[helo=mx.example.org]", prefix.to_string());

        prefix.set_recipient(Some("zim@example.com".to_owned()));
        assert_eq!(
            "smtp:10.0.0.1:4567[helo=mx.example.org rcpt=zim@example.com]",
            prefix.to_string()
        );

        prefix.set_recipient(None);
        assert_eq!("smtp:10.0.0.1:4567[helo=mx.example.org]", prefix.to_string());
    }

    #[test]
    fn long_values_are_truncated() {
        let prefix = LogPrefix::new("smtp".to_owned(), "peer".to_owned());
        prefix.set_helo("x".repeat(200));
        assert_eq!(
            format!("smtp:peer[helo={}]", "x".repeat(64)),
            prefix.to_string()
        );
    }
}
