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

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::prelude::*;
use log::{error, info};

use super::model::*;
use super::MailStore;
use crate::support::{error::Error, id::random_id};

/// A `MailStore` which keeps everything in memory.
///
/// Nothing survives a restart. Mailboxes are either provisioned from the
/// configuration at start-up or created through `create_mailbox`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    mailboxes: HashMap<MailboxId, Mailbox>,
    mails: Vec<Mail>,
}

impl Inner {
    fn mailbox_mut(&mut self, id: &str) -> Result<&mut Mailbox, Error> {
        self.mailboxes.get_mut(id).ok_or(Error::NoSuchMailbox)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation below is a single step, so a panicking holder cannot
        // leave a half-applied change behind.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new, empty mailbox.
    ///
    /// Fails with `DuplicateMailbox` if the address is already taken.
    pub fn create_mailbox(&self, new: NewMailbox) -> Result<Mailbox, Error> {
        let mut inner = self.lock();
        if inner.mailboxes.values().any(|m| m.address == new.address) {
            return Err(Error::DuplicateMailbox);
        }

        let mailbox = Mailbox {
            id: random_id(),
            name: new.name,
            address: new.address,
            locked: new.locked,
            unread_count: 0,
            created_at: Utc::now(),
            last_email_at: None,
            expires_at: new.expires_at,
        };
        inner.mailboxes.insert(mailbox.id.clone(), mailbox.clone());
        Ok(mailbox)
    }

    pub fn mailbox(&self, id: &str) -> Option<Mailbox> {
        self.lock().mailboxes.get(id).cloned()
    }

    /// All mail in the given mailbox, oldest first.
    pub fn mails(&self, mailbox_id: &str) -> Vec<Mail> {
        self.lock()
            .mails
            .iter()
            .filter(|m| m.mailbox_id == mailbox_id)
            .cloned()
            .collect()
    }

    pub fn mail(&self, id: &str) -> Option<Mail> {
        self.lock().mails.iter().find(|m| m.id == id).cloned()
    }

    /// Remove every mailbox which expired before `now`, along with its mail.
    ///
    /// Returns the number of mailboxes removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.lock();
        let before = inner.mailboxes.len();
        inner.mailboxes.retain(|_, m| !m.is_expired(now));
        let removed = before - inner.mailboxes.len();

        if removed > 0 {
            let inner = &mut *inner;
            let mailboxes = &inner.mailboxes;
            inner.mails.retain(|m| mailboxes.contains_key(&m.mailbox_id));
        }

        removed
    }
}

impl MailStore for MemoryStore {
    fn find_mailbox_by_address(
        &self,
        address: &str,
    ) -> Result<Option<Mailbox>, Error> {
        Ok(self
            .lock()
            .mailboxes
            .values()
            .find(|m| m.address == address)
            .cloned())
    }

    fn create_mail(&self, new: NewMail) -> Result<Mail, Error> {
        let mut inner = self.lock();
        if !inner.mailboxes.contains_key(&new.mailbox_id) {
            return Err(Error::NoSuchMailbox);
        }

        let mail = Mail {
            id: random_id(),
            subject: new.subject,
            from: new.from,
            to: new.to,
            body: new.body,
            headers: new.headers,
            read: false,
            created_at: Utc::now(),
            mailbox_id: new.mailbox_id,
        };
        inner.mails.push(mail.clone());
        Ok(mail)
    }

    fn touch_mailbox_activity(
        &self,
        mailbox_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.lock().mailbox_mut(mailbox_id)?.last_email_at = Some(at);
        Ok(())
    }

    fn increment_unread(&self, mailbox_id: &str) -> Result<(), Error> {
        let mut inner = self.lock();
        let mailbox = inner.mailbox_mut(mailbox_id)?;
        mailbox.unread_count = mailbox.unread_count.saturating_add(1);
        Ok(())
    }
}

/// Periodically purge expired mailboxes from `store`, forever.
///
/// The first sweep happens immediately.
pub async fn run_cleaner(store: Arc<MemoryStore>, interval: Duration) {
    if interval.is_zero() {
        error!("Mailbox cleaner interval is zero; cleaner disabled");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let removed = store.purge_expired(Utc::now());
        if removed > 0 {
            info!("Removed {} expired mailbox(es)", removed);
        }
    }
}
