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

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::main::{DeliverSubcommand, ParseSubcommand};
use crate::mime::content::{parse_message_traced, RawMessage};
use crate::mime::header::read_headers;
use crate::notify::Notifier;
use crate::smtp::session::{Backend, Delivery, Session};
use crate::store::MailStore;
use crate::support::{log_prefix::LogPrefix, system_config::SystemConfig};

fn read_input(path: &Path) -> Vec<u8> {
    let result = if Path::new("-") == path {
        let mut data = Vec::new();
        io::stdin().lock().read_to_end(&mut data).map(|_| data)
    } else {
        fs::read(path)
    };

    match result {
        Ok(data) => data,
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            die!(EX_NOINPUT, "{}: {}", path.display(), e)
        },
        Err(e) => die!(EX_IOERR, "Error reading {}: {}", path.display(), e),
    }
}

pub(super) fn parse(cmd: ParseSubcommand) {
    let message = RawMessage::new(&read_input(&cmd.input));
    let headers = match read_headers(message.as_str()) {
        Ok(headers) => headers,
        Err(e) => die!(EX_DATAERR, "Malformed header: {}", e),
    };

    let parsed = parse_message_traced(&message, cmd.trace);
    println!("Subject: {}", headers.subject());
    println!("Header fields: {}", headers.len());
    println!("\n--- Headers ---\n{}", parsed.headers);
    if parsed.body.is_empty() {
        println!("\n--- No body found ---");
    } else {
        println!("\n--- Body ---\n{}", parsed.body);
    }
}

pub(super) fn deliver(system_config: SystemConfig, cmd: DeliverSubcommand) {
    let store = super::main::provision_store(&system_config);
    let backend = Backend {
        store: Arc::clone(&store) as Arc<dyn MailStore>,
        notifier: Arc::new(Notifier::new(Duration::from_millis(
            system_config.notify.send_timeout_ms,
        ))),
        domain: Arc::from(system_config.smtp.domain.as_str()),
    };

    let mut session = Session::new(
        backend,
        LogPrefix::new("deliver".to_owned(), "local".to_owned()),
    );
    session.set_sender(cmd.from);
    if let Err(e) = session.set_recipient(&cmd.to) {
        die!(EX_NOUSER, "{}: {}", cmd.to, e);
    }

    let data = read_input(&cmd.input);
    match session.receive_data(&data) {
        Ok(Delivery::Delivered(id)) => {
            println!("Delivered as {}", id);
            if let Some(mail) = store.mail(&id) {
                println!("Subject: {}", mail.subject);
                println!("\n--- Body ---\n{}", mail.body);
            }
        },
        Ok(Delivery::DroppedLocked) => {
            println!("Mailbox is locked; message discarded");
        },
        Ok(Delivery::DroppedEmptyBody) => {
            println!("No body found; message discarded");
        },
        Err(e) => die!(EX_DATAERR, "Delivery failed: {}", e),
    }
}
