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

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::net::TcpListener;

use crate::notify::{feed::serve_feed, Notifier};
use crate::smtp::server::serve_smtp;
use crate::smtp::session::Backend;
use crate::store::{memory::run_cleaner, MailStore};
use crate::support::{log_prefix::LogPrefix, system_config::SystemConfig};

pub(super) fn serve(system_config: SystemConfig, port: Option<u16>) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => fatal!(EX_OSERR, "Failed to start async runtime: {}", e),
    };

    runtime.block_on(run(system_config, port));
}

async fn run(system_config: SystemConfig, port: Option<u16>) {
    let listen_addr = match system_config.smtp.listen_addr(port) {
        Ok(addr) => addr,
        Err(e) => fatal!(
            EX_CONFIG,
            "Bad SMTP listen address '{}': {}",
            system_config.smtp.listen,
            e
        ),
    };

    let store = super::main::provision_store(&system_config);
    info!(
        "Serving {} mailbox(es) for domain {}",
        system_config.mailboxes.len(),
        system_config.smtp.domain
    );

    let notifier = Arc::new(Notifier::new(Duration::from_millis(
        system_config.notify.send_timeout_ms,
    )));
    let backend = Backend {
        store: Arc::clone(&store) as Arc<dyn MailStore>,
        notifier: Arc::clone(&notifier),
        domain: Arc::from(system_config.smtp.domain.as_str()),
    };

    tokio::spawn(run_cleaner(
        store,
        Duration::from_secs(system_config.cleaner.interval_secs),
    ));

    if let Some(ref feed_addr) = system_config.notify.listen {
        match TcpListener::bind(feed_addr).await {
            Ok(listener) => {
                info!("Publishing events at {}", feed_addr);
                tokio::spawn(serve_feed(listener, notifier));
            },
            Err(e) => fatal!(
                EX_UNAVAILABLE,
                "Failed to listen on {}: {}",
                feed_addr,
                e
            ),
        }
    }

    let listener = match TcpListener::bind(listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            fatal!(EX_UNAVAILABLE, "Failed to listen on {}: {}", listen_addr, e)
        },
    };
    info!("Starting SMTP server at {}", listen_addr);

    let smtp_config = Arc::new(system_config.smtp);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    let log_prefix =
                        LogPrefix::new("smtp".to_owned(), peer.to_string());
                    info!("{} Connection accepted", log_prefix);
                    tokio::spawn(serve_smtp(
                        socket,
                        Arc::clone(&smtp_config),
                        backend.clone(),
                        log_prefix,
                    ));
                },
                Err(e) => warn!("Failed to accept connection: {}", e),
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            },
        }
    }
}
