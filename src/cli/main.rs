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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::LevelFilter;
use structopt::StructOpt;

use crate::store::{model::NewMailbox, MemoryStore};
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
enum Command {
    Serve(ServeSubcommand),
    Parse(ParseSubcommand),
    Deliver(DeliverSubcommand),
}

#[derive(StructOpt)]
pub(super) struct CommonOptions {
    /// The directory containing `tmpbox.toml` and, optionally,
    /// `logging.toml`.
    #[structopt(long, parse(from_os_str), default_value = ".")]
    pub(super) root: PathBuf,

    /// Accept mail for this domain instead of the configured one.
    #[structopt(long, env = "SMTP_DOMAIN")]
    pub(super) domain: Option<String>,

    /// Log at debug level. Also enabled by setting DEBUG=true.
    #[structopt(long)]
    pub(super) debug: bool,
}

/// Run the SMTP server.
///
/// Mailboxes are provisioned from the `[[mailbox]]` entries in the
/// configuration and live in memory until the server stops. If
/// `[notify] listen` is set, new-mail events are also published there as
/// one JSON object per line.
#[derive(StructOpt)]
pub(super) struct ServeSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Listen on this port instead of the configured one.
    #[structopt(long, env = "SMTP_PORT")]
    pub(super) port: Option<u16>,
}

/// Parse a message and print what would be stored for it.
///
/// Nothing is delivered. With `--trace`, every decision the body extractor
/// makes is logged to standard error.
#[derive(StructOpt)]
pub(super) struct ParseSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// Log the body extraction process.
    #[structopt(long)]
    pub(super) trace: bool,

    /// The message to parse. "-" reads from stdin.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) input: PathBuf,
}

/// Deliver a message as if it had been received over SMTP.
///
/// The recipient is checked against the configured domain and mailboxes
/// exactly as the server would, and the outcome is reported. Since mailboxes
/// only live in memory, this is mainly useful for checking how a particular
/// message would be handled.
#[derive(StructOpt)]
pub(super) struct DeliverSubcommand {
    #[structopt(flatten)]
    pub(super) common: CommonOptions,

    /// The envelope sender.
    #[structopt(long, default_value = "")]
    pub(super) from: String,

    /// The envelope recipient, e.g. `box@example.com`.
    #[structopt(long)]
    pub(super) to: String,

    /// The message to deliver. "-" reads from stdin.
    #[structopt(parse(from_os_str), default_value = "-")]
    pub(super) input: PathBuf,
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        },
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        },
    });

    let common = match cmd {
        Command::Serve(ref c) => &c.common,
        Command::Parse(ref c) => &c.common,
        Command::Deliver(ref c) => &c.common,
    };

    let mut system_config = match SystemConfig::load(&common.root) {
        Ok(config) => config,
        Err(e) => die!(EX_CONFIG, "{}", e),
    };
    if let Some(ref domain) = common.domain {
        system_config.smtp.domain = domain.clone();
    }

    let debug = common.debug
        || std::env::var("DEBUG").map_or(false, |v| "true" == v);
    init_logging(&common.root, debug);

    match cmd {
        Command::Serve(cmd) => super::serve::serve(system_config, cmd.port),
        Command::Parse(cmd) => super::deliver::parse(cmd),
        Command::Deliver(cmd) => super::deliver::deliver(system_config, cmd),
    }
}

fn init_logging(root: &Path, debug: bool) {
    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::config::Deserializers::default(),
        ) {
            die!(
                EX_CONFIG,
                "Failed to load '{}': {}",
                log_config_file.display(),
                e
            );
        }
    } else {
        let level = if debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        if let Err(e) = crate::init_simple_log(level) {
            die!(EX_SOFTWARE, "Failed to initialise logging: {}", e);
        }
    }
}

/// Create an in-memory store holding the configured mailboxes.
pub(super) fn provision_store(config: &SystemConfig) -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    for mailbox in &config.mailboxes {
        if let Err(e) = store.create_mailbox(NewMailbox {
            name: mailbox.name.clone(),
            address: mailbox.address.clone(),
            locked: mailbox.locked,
            expires_at: mailbox.expires_at,
        }) {
            die!(EX_CONFIG, "Mailbox '{}': {}", mailbox.address, e);
        }
    }

    Arc::new(store)
}
