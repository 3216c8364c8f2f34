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

//! Persistence of mailboxes and received mail.

pub mod memory;
pub mod model;

use chrono::prelude::*;

pub use self::memory::MemoryStore;
use self::model::*;
use crate::support::error::Error;

/// The operations the inbound mail path needs from persistent storage.
///
/// Implementations must tolerate concurrent callers; every inbound
/// connection shares the same store.
pub trait MailStore: Send + Sync {
    /// Look up a mailbox by the local part of its address.
    fn find_mailbox_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Mailbox>, Error>;

    /// Store a new message, assigning its identity and creation time.
    fn create_mail(&self, mail: NewMail) -> Result<Mail, Error>;

    /// Record that mail arrived for the mailbox at `at`.
    fn touch_mailbox_activity(
        &self,
        mailbox_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), Error>;

    fn increment_unread(&self, mailbox_id: &str) -> Result<(), Error>;
}
