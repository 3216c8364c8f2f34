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

//! Reply codes from RFC 5321, and enhanced status codes from RFC 3463 and
//! RFC 4954.
//!
//! The module is designed to be wildcard-imported, and defines submodules with
//! short names for accessing the enum values in a consistent way.

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u16)]
pub enum PrimaryCode {
    HelpMessage = 214,
    ServiceReady = 220,
    ServiceClosing = 221,
    Ok = 250,
    CannotVerify = 252,
    StartMailInput = 354,
    ServiceNotAvailableClosing = 421,
    ActionAborted = 451,
    // Also TooManyRecipients
    InsufficientStorage = 452,
    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadSequenceOfCommands = 503,
    AuthenticationFailed = 535,
    ActionNotTakenPermanent = 550,
    ExceededStorageAllocation = 552,
    TransactionFailed = 554,
}

pub mod pc {
    pub use super::PrimaryCode::*;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClassCode {
    Success = 2,
    TempFail = 4,
    PermFail = 5,
}

pub mod cc {
    pub use super::ClassCode::*;
}

/// The second and third parts of an enhanced status code, as a two-digit
/// number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SubjectCode {
    Undefined = 0,
    BadDestinationMailboxAddress = 11,
    DestinationAddressValid = 15,
    OtherMailSystem = 30,
    SystemNotCapableOfSelectedFeatures = 33,
    MessageTooBigForSystem = 34,
    BadConnection = 42,
    InvalidCommand = 51,
    SyntaxError = 52,
    TooManyRecipients = 53,
    InvalidCommandArguments = 54,
    WrongProtocolVersion = 55,
    OtherMediaError = 60,
    OtherSecurity = 70,
    AuthenticationCredentialsInvalid = 78,
}

pub mod sc {
    pub use super::SubjectCode::*;
}

/// Format a complete reply line.
///
/// `last` is false for all but the final line of a multi-line reply.
pub fn reply_line(
    primary: PrimaryCode,
    last: bool,
    enhanced: Option<(ClassCode, SubjectCode)>,
    text: &str,
) -> String {
    use std::fmt::Write as _;

    let mut s = String::new();
    let _ = write!(s, "{}{}", primary as u16, if last { ' ' } else { '-' });
    if let Some((class, subject)) = enhanced {
        let subject = subject as u8;
        let _ = write!(s, "{}.{}.{} ", class as u8, subject / 10, subject % 10);
    }
    let _ = write!(s, "{}\r\n", text);
    s
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_formatting() {
        assert_eq!(
            "250 2.1.5 OK\r\n",
            reply_line(pc::Ok, true, Some((cc::Success, sc::DestinationAddressValid)), "OK")
        );
        assert_eq!(
            "250-PIPELINING\r\n",
            reply_line(pc::Ok, false, None, "PIPELINING")
        );
        assert_eq!(
            "535 5.7.8 No\r\n",
            reply_line(
                pc::AuthenticationFailed,
                true,
                Some((cc::PermFail, sc::AuthenticationCredentialsInvalid)),
                "No"
            )
        );
        assert_eq!(
            "452 4.5.3 Too many\r\n",
            reply_line(
                pc::InsufficientStorage,
                true,
                Some((cc::TempFail, sc::TooManyRecipients)),
                "Too many"
            )
        );
    }
}
