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

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

/// Mailbox and mail identifiers are UUID-format strings.
pub type MailboxId = String;
pub type MailId = String;

/// A mailbox which can receive mail.
///
/// Mail is addressed to `<address>@<domain>`, where `domain` is the serving
/// domain of the SMTP server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    pub id: MailboxId,
    pub name: String,
    /// The local part recipients use.
    pub address: String,
    /// Mail to a locked mailbox is accepted and then discarded.
    pub locked: bool,
    pub unread_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_email_at: Option<DateTime<Utc>>,
    /// If set, the mailbox and all its mail are removed once this passes.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Mailbox {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// The parameters for creating a new mailbox.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewMailbox {
    pub name: String,
    pub address: String,
    pub locked: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A message that has been received and stored.
///
/// The owning mailbox is not part of the serialised form; events carry it
/// alongside instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Mail {
    pub id: MailId,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub headers: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub mailbox_id: MailboxId,
}

/// The parameters for storing a received message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMail {
    pub mailbox_id: MailboxId,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub headers: String,
}
