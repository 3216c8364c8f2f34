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
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The name of the configuration file under the Tmpbox root.
pub const CONFIG_FILE: &str = "tmpbox.toml";

/// The system-wide configuration for Tmpbox.
///
/// This is stored in a file named `tmpbox.toml` under the Tmpbox root. If the
/// file does not exist, everything takes its default value, which yields a
/// server for `localhost` on port 25 with no mailboxes.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Configuration for the inbound SMTP server.
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Configuration for the new-mail event feed.
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Configuration for removal of expired mailboxes.
    #[serde(default)]
    pub cleaner: CleanerConfig,

    /// Mailboxes to create at start-up.
    #[serde(default, rename = "mailbox")]
    pub mailboxes: Vec<MailboxConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// The domain mail is accepted for.
    ///
    /// Only recipients of the form `local@domain` are accepted, where `local`
    /// is the address of a known mailbox.
    pub domain: String,

    /// The address to listen on.
    pub listen: String,

    /// The host name to report in the greeting.
    ///
    /// If empty, `domain` is used.
    pub host_name: String,

    /// How long to wait for the client on any single read, in seconds.
    pub timeout_secs: u64,

    /// The maximum accepted size of a message, in bytes.
    pub max_message_bytes: usize,

    /// The maximum number of `RCPT TO` commands in one transaction.
    pub max_recipients: u32,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            domain: "localhost".to_owned(),
            listen: "0.0.0.0:25".to_owned(),
            host_name: String::new(),
            timeout_secs: 20,
            max_message_bytes: 1024 * 1024,
            max_recipients: 3,
        }
    }
}

impl SmtpConfig {
    pub fn host_name(&self) -> &str {
        if self.host_name.is_empty() {
            &self.domain
        } else {
            &self.host_name
        }
    }

    /// Parse `listen`, replacing the port with `port` if given.
    pub fn listen_addr(
        &self,
        port: Option<u16>,
    ) -> Result<SocketAddr, std::net::AddrParseError> {
        let mut addr = self.listen.parse::<SocketAddr>()?;
        if let Some(port) = port {
            addr.set_port(port);
        }
        Ok(addr)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// If set, serve the JSON event feed on this address.
    ///
    /// The feed has no authentication, so this should be a loopback address.
    pub listen: Option<String>,

    /// How long a single subscriber may take to accept an event, in
    /// milliseconds, before the event is dropped for that subscriber.
    pub send_timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            listen: None,
            send_timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Seconds between sweeps for expired mailboxes.
    pub interval_secs: u64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        CleanerConfig {
            interval_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MailboxConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// The local part recipients use, without `@` or domain.
    pub address: String,
    /// Locked mailboxes silently discard everything sent to them.
    #[serde(default)]
    pub locked: bool,
    /// When set, the mailbox and its mail are deleted after this instant.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Error reading '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] io::Error),
    #[error("Error in config file at '{}': {}", .0.display(), .1)]
    Syntax(PathBuf, #[source] toml::de::Error),
    #[error("Mailbox address '{0}' must not contain '@'")]
    BadMailboxAddress(String),
}

impl SystemConfig {
    /// Load `tmpbox.toml` from `root`.
    ///
    /// A missing file is not an error; the defaults are returned instead.
    pub fn load(root: &Path) -> Result<Self, LoadError> {
        let path = root.join(CONFIG_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if io::ErrorKind::NotFound == e.kind() => {
                return Ok(SystemConfig::default())
            },
            Err(e) => return Err(LoadError::Io(path, e)),
        };

        let config: SystemConfig = toml::from_slice(&data)
            .map_err(|e| LoadError::Syntax(path, e))?;
        if let Some(bad) =
            config.mailboxes.iter().find(|m| m.address.contains('@'))
        {
            return Err(LoadError::BadMailboxAddress(bad.address.clone()));
        }

        Ok(config)
    }
}
