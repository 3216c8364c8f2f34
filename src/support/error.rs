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

use std::io;

use thiserror::Error;

use crate::mime::header::HeaderParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("A mailbox with that address already exists")]
    DuplicateMailbox,
    #[error("No such mailbox")]
    NoSuchMailbox,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Per-command failures of an inbound mail session.
///
/// None of these terminate the session; the transport translates them into
/// protocol-level rejections and carries on reading commands.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Recipient is not in the served domain")]
    InvalidRecipientDomain,
    #[error("No such mailbox")]
    UnknownMailbox,
    #[error("No recipient has been accepted")]
    NoRecipient,
    #[error("Malformed message header: {0}")]
    HeaderParse(#[from] HeaderParseError),
    #[error("Authentication is not supported")]
    AuthNotSupported,
    #[error("Unable to store message: {0}")]
    Store(#[from] Error),
}
