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

//! The protocol-independent state of one inbound mail session.
//!
//! The transport drives a `Session` through sender, recipient and data, and
//! translates any `DeliveryError` into a rejection of that one command. A
//! failed command never ends the session.

use std::sync::Arc;

use log::{error, info, warn};

use crate::mime::content::{parse_message, parse_message_traced, RawMessage};
use crate::mime::header::read_headers;
use crate::notify::{NewEmail, Notifier, NEW_EMAIL};
use crate::store::model::{MailId, Mailbox, NewMail};
use crate::store::MailStore;
use crate::support::error::DeliveryError;
use crate::support::log_prefix::LogPrefix;

/// Everything a session needs from the rest of the system.
///
/// Cloning is cheap; all connections share one `Backend`.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn MailStore>,
    pub notifier: Arc<Notifier>,
    /// The domain mail is accepted for.
    pub domain: Arc<str>,
}

/// The outcome of a successful `receive_data`.
///
/// The two drop outcomes are indistinguishable to the sending client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered(MailId),
    /// The mailbox is locked; the message was discarded.
    DroppedLocked,
    /// No body could be extracted; the message was discarded.
    DroppedEmptyBody,
}

pub struct Session {
    backend: Backend,
    log_prefix: LogPrefix,
    from: Option<String>,
    to: Option<String>,
    mailbox: Option<Mailbox>,
}

impl Session {
    pub fn new(backend: Backend, log_prefix: LogPrefix) -> Self {
        Session {
            backend,
            log_prefix,
            from: None,
            to: None,
            mailbox: None,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn recipient(&self) -> Option<&str> {
        self.to.as_deref()
    }

    /// Reject an authentication attempt.
    ///
    /// There are no credentials which can succeed.
    pub fn auth(&self, mechanism: &str) -> Result<(), DeliveryError> {
        info!(
            "{} Rejected {} authentication attempt",
            self.log_prefix, mechanism
        );
        Err(DeliveryError::AuthNotSupported)
    }

    /// Record the envelope sender. Any address is accepted.
    pub fn set_sender(&mut self, address: String) {
        self.from = Some(address);
    }

    /// Resolve `address` to a mailbox in the served domain.
    ///
    /// On success, this replaces any recipient resolved earlier; only one
    /// recipient is kept per message.
    pub fn set_recipient(&mut self, address: &str) -> Result<(), DeliveryError> {
        let Some(local_part) = local_part_in_domain(address, &self.backend.domain)
        else {
            info!("{} Recipient outside served domain: {}", self.log_prefix, address);
            return Err(DeliveryError::InvalidRecipientDomain);
        };

        let Some(mailbox) =
            self.backend.store.find_mailbox_by_address(local_part)?
        else {
            info!("{} No mailbox for recipient: {}", self.log_prefix, address);
            return Err(DeliveryError::UnknownMailbox);
        };

        self.log_prefix.set_recipient(Some(address.to_owned()));
        self.to = Some(address.to_owned());
        self.mailbox = Some(mailbox);
        Ok(())
    }

    /// Parse and store a complete message for the current recipient.
    ///
    /// Locked mailboxes and messages with no extractable body are accepted
    /// and discarded without storing anything or notifying anyone.
    pub fn receive_data(
        &mut self,
        data: &[u8],
    ) -> Result<Delivery, DeliveryError> {
        let Some(ref bound) = self.mailbox else {
            return Err(DeliveryError::NoRecipient);
        };

        // The lock may have changed since RCPT; go by the current state.
        let Some(mailbox) =
            self.backend.store.find_mailbox_by_address(&bound.address)?
        else {
            warn!("{} Mailbox vanished before DATA", self.log_prefix);
            return Err(DeliveryError::UnknownMailbox);
        };

        if mailbox.locked {
            info!("{} Mailbox is locked; discarding message", self.log_prefix);
            return Ok(Delivery::DroppedLocked);
        }

        let message = RawMessage::new(data);
        let headers = read_headers(message.as_str()).map_err(|e| {
            warn!("{} Rejecting message: {}", self.log_prefix, e);
            e
        })?;

        let parsed = parse_message(&message);
        if parsed.body.is_empty() {
            warn!(
                "{} No body found in message; discarding it",
                self.log_prefix
            );
            parse_message_traced(&message, true);
            return Ok(Delivery::DroppedEmptyBody);
        }

        let mail = self.backend.store.create_mail(NewMail {
            mailbox_id: mailbox.id.clone(),
            subject: headers.subject().into_owned(),
            from: self.from.clone().unwrap_or_default(),
            to: self.to.clone().unwrap_or_default(),
            body: parsed.body,
            headers: parsed.headers,
        })?;

        if let Err(e) = self.backend.notifier.broadcast(
            NEW_EMAIL,
            &NewEmail {
                mailbox_id: &mailbox.id,
                email: &mail,
            },
        ) {
            warn!("{} Failed to announce new mail: {}", self.log_prefix, e);
        }

        // The mail is stored by now; these must not fail the command.
        if let Err(e) = self
            .backend
            .store
            .touch_mailbox_activity(&mailbox.id, mail.created_at)
        {
            error!(
                "{} Failed to record mailbox activity: {}",
                self.log_prefix, e
            );
        }
        if let Err(e) = self.backend.store.increment_unread(&mailbox.id) {
            error!(
                "{} Failed to increment unread count: {}",
                self.log_prefix, e
            );
        }

        info!(
            "{} Delivered {} ({} bytes)",
            self.log_prefix,
            mail.id,
            data.len()
        );
        Ok(Delivery::Delivered(mail.id))
    }

    /// Forget the sender and recipient of the current transaction.
    pub fn reset(&mut self) {
        self.from = None;
        self.to = None;
        self.mailbox = None;
        self.log_prefix.set_recipient(None);
    }
}

/// If `address` is `local@domain` (domain compared case-insensitively),
/// return `local`.
fn local_part_in_domain<'a>(address: &'a str, domain: &str) -> Option<&'a str> {
    let split = address.len().checked_sub(domain.len() + 1)?;
    let (local, at_domain) = (address.get(..split)?, address.get(split..)?);
    (at_domain.starts_with('@') && at_domain[1..].eq_ignore_ascii_case(domain))
        .then_some(local)
}
