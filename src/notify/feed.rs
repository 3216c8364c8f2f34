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

//! A plain TCP feed of events.
//!
//! Each client receives every event broadcast while it is connected, one JSON
//! object per line. Anything the client sends is ignored; the feed ends when
//! the client disconnects.

use std::io;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

use super::Notifier;
use crate::support::log_prefix::LogPrefix;

/// Accept feed clients on `listener` forever.
pub async fn serve_feed(listener: TcpListener, notifier: Arc<Notifier>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept feed connection: {}", e);
                continue;
            },
        };

        let log_prefix = LogPrefix::new("feed".to_owned(), peer.to_string());
        let notifier = Arc::clone(&notifier);
        tokio::spawn(async move {
            info!("{} Feed client connected", log_prefix);
            match run_feed_client(socket, &notifier).await {
                Ok(()) => info!("{} Feed client disconnected", log_prefix),
                Err(e) => warn!("{} Feed client lost: {}", log_prefix, e),
            }
        });
    }
}

/// Relay events to one client until it disconnects.
pub async fn run_feed_client(
    io: impl AsyncRead + AsyncWrite + Unpin,
    notifier: &Notifier,
) -> io::Result<()> {
    let mut subscription = notifier.subscribe();
    let result = relay(io, &mut subscription.events).await;
    notifier.unsubscribe(subscription.id);
    result
}

async fn relay(
    io: impl AsyncRead + AsyncWrite + Unpin,
    events: &mut tokio::sync::mpsc::Receiver<super::EventText>,
) -> io::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(io);
    let mut discard = [0u8; 256];

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                writer.write_all(event.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            },

            nread = reader.read(&mut discard) => {
                if 0 == nread? {
                    return Ok(());
                }
            },
        }
    }
}
