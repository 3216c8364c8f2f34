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

//! The SMTP transport.
//!
//! One `Server` handles one connection, feeding a `Session` from the
//! commands it reads and turning session outcomes into replies.

use std::borrow::Cow;
use std::future::Future;
use std::io::{self, Write};
use std::str;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite,
    AsyncWriteExt, BufStream,
};

use super::codes::*;
use super::session::{Backend, Delivery, Session};
use super::syntax::*;
use crate::support::{
    error::{DeliveryError, Error},
    log_prefix::LogPrefix,
    system_config::SmtpConfig,
};

/// Serve one SMTP connection until the client quits or the connection fails.
pub async fn serve_smtp(
    io: impl AsyncRead + AsyncWrite + Unpin,
    config: Arc<SmtpConfig>,
    backend: Backend,
    log_prefix: LogPrefix,
) {
    let mut server = Server::new(io, config, backend, log_prefix.clone());
    match server.run().await {
        Ok(_) => info!("{} Normal client disconnect", log_prefix),
        Err(e) => warn!("{} Abnormal client disconnect: {}", log_prefix, e),
    }
}

macro_rules! require {
    ($this:expr, $($fns:ident = $arg:expr),*) => {
        $(if let Some(r) = $this.$fns($arg).await { return r; })*
    };
}

const MAX_LINE: usize = 1024;
/// The most read from a DATA payload in one go.
const MAX_DATA_CHUNK: u64 = 8192;

struct Server<IO> {
    io: BufStream<IO>,
    config: Arc<SmtpConfig>,
    log_prefix: LogPrefix,
    session: Session,
    timeout: Duration,

    /// The self-reported name of the peer given in HELO or EHLO.
    peer_id: Option<String>,
    has_return_path: bool,
    recipients: u32,
    quit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseKind {
    /// The last in a series of responses.
    ///
    /// Indicates no continuation and forces a flush.
    Final,
    /// A non-final response that is safe to buffer.
    Delayable,
}

impl ResponseKind {
    fn or_final(self, phinal: bool) -> Self {
        if phinal {
            ResponseKind::Final
        } else {
            self
        }
    }
}

use self::ResponseKind::*;

impl<IO: AsyncRead + AsyncWrite + Unpin> Server<IO> {
    fn new(
        io: IO,
        config: Arc<SmtpConfig>,
        backend: Backend,
        log_prefix: LogPrefix,
    ) -> Self {
        Server {
            io: BufStream::new(io),
            timeout: Duration::from_secs(config.timeout_secs),
            config,
            session: Session::new(backend, log_prefix.clone()),
            log_prefix,
            peer_id: None,
            has_return_path: false,
            recipients: 0,
            quit: false,
        }
    }

    async fn run(&mut self) -> Result<(), Error> {
        self.send_greeting().await?;

        let mut buffer = Vec::new();
        while !self.quit {
            match self.run_command(&mut buffer).await {
                Err(Error::Io(e)) if io::ErrorKind::TimedOut == e.kind() => {
                    let _ = self
                        .send_response(
                            Final,
                            pc::ServiceNotAvailableClosing,
                            Some((cc::TempFail, sc::BadConnection)),
                            Cow::Borrowed("Timed out waiting for client"),
                        )
                        .await;
                    return Err(Error::Io(e));
                },
                r => r?,
            }
        }

        Ok(())
    }

    async fn read_line(&mut self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.clear();
        with_timeout(
            self.timeout,
            (&mut self.io)
                .take(MAX_LINE as u64)
                .read_until(b'\n', buffer),
        )
        .await
        .map(|_| ())
    }

    async fn run_command(&mut self, buffer: &mut Vec<u8>) -> Result<(), Error> {
        self.read_line(buffer).await?;
        if buffer.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF reached at start of command",
            )));
        }

        if !buffer.ends_with(b"\n") {
            if buffer.len() >= MAX_LINE {
                self.send_response(
                    Final,
                    pc::CommandSyntaxError,
                    Some((cc::PermFail, sc::SyntaxError)),
                    Cow::Borrowed("Command line too long"),
                )
                .await?;

                // Skip the rest of the line
                while !buffer.is_empty() && !buffer.ends_with(b"\n") {
                    self.read_line(buffer).await?;
                }

                return Ok(());
            } else {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "EOF reached within command",
                )));
            }
        }

        // Bare LF is tolerated; plenty of clients send it.
        let line = buffer
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(&buffer[..]);

        let command_line = match str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                return self
                    .send_response(
                        Final,
                        pc::CommandSyntaxError,
                        Some((cc::PermFail, sc::SyntaxError)),
                        Cow::Borrowed("Malformed UTF-8"),
                    )
                    .await;
            },
        };

        let command = match command_line.parse::<Command>() {
            Ok(c) => c,
            Err(_) => {
                return if looks_like_known_command(command_line) {
                    self.send_response(
                        Final,
                        pc::ParameterSyntaxError,
                        Some((cc::PermFail, sc::InvalidCommandArguments)),
                        Cow::Borrowed("Unknown command syntax"),
                    )
                    .await
                } else {
                    self.send_response(
                        Final,
                        pc::CommandSyntaxError,
                        Some((cc::PermFail, sc::InvalidCommand)),
                        Cow::Borrowed("Unrecognised command"),
                    )
                    .await
                };
            },
        };

        match command {
            Command::Helo { extended, origin } => {
                self.cmd_helo(extended, origin).await
            },
            Command::Auth { mechanism, .. } => self.cmd_auth(mechanism).await,
            Command::MailFrom {
                return_path,
                size,
                warnings,
            } => self.cmd_mail_from(return_path, size, warnings).await,
            Command::Recipient {
                forward_path,
                warnings,
            } => self.cmd_recipient(forward_path, warnings).await,
            Command::Data => self.cmd_data().await,
            Command::Reset => self.cmd_reset().await,
            Command::Verify => self.cmd_verify().await,
            Command::Expand => self.cmd_expand().await,
            Command::Help => self.cmd_help().await,
            Command::Noop => self.cmd_noop().await,
            Command::Quit => self.cmd_quit().await,
            Command::Http => self.cmd_http().await,
        }
    }

    async fn cmd_helo(
        &mut self,
        extended: bool,
        origin: String,
    ) -> Result<(), Error> {
        // A repeated greeting abandons any transaction in progress.
        self.reset();
        self.log_prefix.set_helo(origin.clone());

        let greeting = format!(
            "{} greets {}",
            self.config.host_name(),
            origin
        );
        self.peer_id = Some(origin);

        if !extended {
            return self
                .send_response(Final, pc::Ok, None, Cow::Owned(greeting))
                .await;
        }

        let extensions = [
            Cow::Borrowed("8BITMIME"),
            Cow::Borrowed("PIPELINING"),
            Cow::Owned(format!("SIZE {}", self.config.max_message_bytes)),
            Cow::Borrowed("AUTH PLAIN LOGIN"),
            Cow::Borrowed("HELP"),
        ];

        self.send_response(Delayable, pc::Ok, None, Cow::Owned(greeting))
            .await?;
        let count = extensions.len();
        for (ix, ext) in extensions.into_iter().enumerate() {
            self.send_response(
                Delayable.or_final(ix + 1 == count),
                pc::Ok,
                None,
                ext,
            )
            .await?;
        }

        Ok(())
    }

    async fn cmd_auth(&mut self, mechanism: String) -> Result<(), Error> {
        require!(self, need_helo = true, need_return_path = false);

        match self.session.auth(&mechanism) {
            Ok(()) => self.send_ok().await,
            Err(e) => self.send_delivery_error(e).await,
        }
    }

    async fn cmd_mail_from(
        &mut self,
        return_path: String,
        approx_size: Option<u64>,
        warnings: Vec<String>,
    ) -> Result<(), Error> {
        require!(self, need_helo = true, need_return_path = false);

        for warning in warnings {
            warn!("{} {}", self.log_prefix, warning);
        }

        if approx_size.unwrap_or(0) > self.config.max_message_bytes as u64 {
            return self.send_message_too_big().await;
        }

        info!("{} Mail from <{}>", self.log_prefix, return_path);
        self.session.set_sender(return_path);
        self.has_return_path = true;
        self.send_ok().await
    }

    async fn cmd_recipient(
        &mut self,
        forward_path: String,
        warnings: Vec<String>,
    ) -> Result<(), Error> {
        require!(self, need_helo = true, need_return_path = true);

        for warning in warnings {
            warn!("{} {}", self.log_prefix, warning);
        }

        if self.recipients >= self.config.max_recipients {
            return self
                .send_response(
                    Final,
                    pc::InsufficientStorage,
                    Some((cc::TempFail, sc::TooManyRecipients)),
                    Cow::Borrowed("Too many recipients"),
                )
                .await;
        }

        match self.session.set_recipient(&forward_path) {
            Ok(()) => {
                self.recipients += 1;
                self.send_response(
                    Final,
                    pc::Ok,
                    Some((cc::Success, sc::DestinationAddressValid)),
                    Cow::Borrowed("OK"),
                )
                .await
            },
            Err(e) => self.send_delivery_error(e).await,
        }
    }

    async fn cmd_data(&mut self) -> Result<(), Error> {
        require!(
            self,
            need_helo = true,
            need_return_path = true,
            need_recipients = true
        );

        self.send_response(
            Final,
            pc::StartMailInput,
            None,
            Cow::Borrowed("Go ahead; end data with <CRLF>.<CRLF>"),
        )
        .await?;

        let mut data = MessageBuffer::new(self.config.max_message_bytes);
        copy_with_dot_stuffing(&mut data, &mut self.io, self.timeout).await?;

        let result = if data.overflowed() {
            info!(
                "{} Rejected message of {} bytes as too big",
                self.log_prefix,
                data.total()
            );
            self.send_message_too_big().await
        } else {
            match self.session.receive_data(data.contents()) {
                Ok(delivery) => {
                    if Delivery::DroppedEmptyBody == delivery {
                        info!("{} Message accepted but empty", self.log_prefix);
                    }
                    self.send_ok().await
                },
                Err(e) => self.send_delivery_error(e).await,
            }
        };

        self.reset();
        result
    }

    async fn cmd_reset(&mut self) -> Result<(), Error> {
        self.reset();
        self.send_ok().await
    }

    async fn cmd_verify(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::CannotVerify,
            Some((cc::Success, sc::OtherSecurity)),
            Cow::Borrowed("VRFY not supported; try RCPT"),
        )
        .await
    }

    async fn cmd_expand(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::CommandNotImplemented,
            Some((cc::PermFail, sc::SystemNotCapableOfSelectedFeatures)),
            Cow::Borrowed("There are no mailing lists here"),
        )
        .await
    }

    async fn cmd_help(&mut self) -> Result<(), Error> {
        static LINES: &[&str] = &[
            "This is the Tmpbox SMTP server.",
            "It accepts mail for its own mailboxes and nothing else.",
            "Commands: HELO EHLO MAIL RCPT DATA RSET VRFY NOOP QUIT",
            "End of HELP",
        ];

        for (ix, &line) in LINES.iter().enumerate() {
            self.send_response(
                Delayable.or_final(ix + 1 == LINES.len()),
                pc::HelpMessage,
                Some((cc::Success, sc::Undefined)),
                Cow::Borrowed(line),
            )
            .await?;
        }

        Ok(())
    }

    async fn cmd_noop(&mut self) -> Result<(), Error> {
        self.send_ok().await
    }

    async fn cmd_quit(&mut self) -> Result<(), Error> {
        self.quit = true;
        let _ = self
            .send_response(
                Final,
                pc::ServiceClosing,
                Some((cc::Success, sc::Undefined)),
                Cow::Borrowed("Bye"),
            )
            .await;
        Ok(())
    }

    async fn cmd_http(&mut self) -> Result<(), Error> {
        warn!("{} Client appears to be speaking HTTP", self.log_prefix);
        self.quit = true;
        let _ = self
            .send_response(
                Final,
                pc::CommandSyntaxError,
                Some((cc::PermFail, sc::WrongProtocolVersion)),
                Cow::Borrowed("This is an SMTP server, not HTTP"),
            )
            .await;
        Ok(())
    }

    async fn need_helo(&mut self, present: bool) -> Option<Result<(), Error>> {
        self.check_need(
            self.peer_id.is_some(),
            present,
            "Already got HELO",
            "Still waiting for HELO or EHLO",
        )
        .await
    }

    async fn need_return_path(
        &mut self,
        present: bool,
    ) -> Option<Result<(), Error>> {
        self.check_need(
            self.has_return_path,
            present,
            "Already got MAIL FROM",
            "Still waiting for MAIL FROM",
        )
        .await
    }

    async fn need_recipients(
        &mut self,
        present: bool,
    ) -> Option<Result<(), Error>> {
        self.check_need(
            self.recipients > 0,
            present,
            "Already have recipients",
            "No valid recipients",
        )
        .await
    }

    async fn check_need(
        &mut self,
        current_status: bool,
        desired_status: bool,
        message_if_already_present: &str,
        message_if_missing: &str,
    ) -> Option<Result<(), Error>> {
        if current_status != desired_status {
            Some(
                self.send_response(
                    Final,
                    pc::BadSequenceOfCommands,
                    Some((cc::PermFail, sc::InvalidCommand)),
                    Cow::Borrowed(if current_status {
                        message_if_already_present
                    } else {
                        message_if_missing
                    }),
                )
                .await,
            )
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.session.reset();
        self.has_return_path = false;
        self.recipients = 0;
    }

    async fn send_ok(&mut self) -> Result<(), Error> {
        self.send_response(
            Final,
            pc::Ok,
            Some((cc::Success, sc::Undefined)),
            Cow::Borrowed("OK"),
        )
        .await
    }

    async fn send_message_too_big(&mut self) -> Result<(), Error> {
        let text = format!(
            "Maximum message size is {} bytes",
            self.config.max_message_bytes
        );
        self.send_response(
            Final,
            pc::ExceededStorageAllocation,
            Some((cc::PermFail, sc::MessageTooBigForSystem)),
            Cow::Owned(text),
        )
        .await
    }

    async fn send_delivery_error(
        &mut self,
        e: DeliveryError,
    ) -> Result<(), Error> {
        let (primary, class, subject) = match e {
            DeliveryError::InvalidRecipientDomain
            | DeliveryError::UnknownMailbox => (
                pc::ActionNotTakenPermanent,
                cc::PermFail,
                sc::BadDestinationMailboxAddress,
            ),
            DeliveryError::NoRecipient => (
                pc::BadSequenceOfCommands,
                cc::PermFail,
                sc::InvalidCommand,
            ),
            DeliveryError::HeaderParse(_) => {
                (pc::TransactionFailed, cc::PermFail, sc::OtherMediaError)
            },
            DeliveryError::AuthNotSupported => (
                pc::AuthenticationFailed,
                cc::PermFail,
                sc::AuthenticationCredentialsInvalid,
            ),
            DeliveryError::Store(ref inner) => {
                error!("{} Storage failure: {}", self.log_prefix, inner);
                (pc::ActionAborted, cc::TempFail, sc::OtherMailSystem)
            },
        };

        self.send_response(
            Final,
            primary,
            Some((class, subject)),
            Cow::Owned(e.to_string()),
        )
        .await
    }

    async fn send_greeting(&mut self) -> Result<(), Error> {
        let greeting = format!(
            "{} ESMTP {} {} ready",
            self.config.host_name(),
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        );
        self.send_response(Final, pc::ServiceReady, None, Cow::Owned(greeting))
            .await
    }

    async fn send_response(
        &mut self,
        kind: ResponseKind,
        primary_code: PrimaryCode,
        secondary_code: Option<(ClassCode, SubjectCode)>,
        quip: Cow<'_, str>,
    ) -> Result<(), Error> {
        let line =
            reply_line(primary_code, Final == kind, secondary_code, &quip);
        self.io.write_all(line.as_bytes()).await?;
        if Final == kind {
            with_timeout(self.timeout, self.io.flush()).await?;
        }

        Ok(())
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "Connection timed out",
        ))
    })
}

/// Collects a DATA payload up to a size limit.
///
/// Once the limit is exceeded, everything collected is discarded and further
/// data is only counted.
struct MessageBuffer {
    data: Vec<u8>,
    limit: usize,
    total: usize,
}

impl MessageBuffer {
    fn new(limit: usize) -> Self {
        MessageBuffer {
            data: Vec::new(),
            limit,
            total: 0,
        }
    }

    fn overflowed(&self) -> bool {
        self.total > self.limit
    }

    fn total(&self) -> usize {
        self.total
    }

    fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl Write for MessageBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.total = self.total.saturating_add(buf.len());
        if self.overflowed() {
            self.data = Vec::new();
        } else {
            self.data.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn copy_with_dot_stuffing(
    mut dst: impl Write,
    src: &mut (impl AsyncBufRead + Unpin),
    timeout: Duration,
) -> io::Result<()> {
    // Copy src to dst until a line which is just ".\r\n" is encountered. If a
    // line which is not ".\r\n" is found which begins with '.', the first '.'
    // on the line is removed. The "\r\n" before ".\r\n" is part of the
    // content.
    //
    // To be binary-safe, we need to handle CRLFs strictly, and not treat just
    // any LF as a line ending. E.g., the sequence "\n.\n" may occur by itself
    // in the input and should be part of the message.

    // Whether the next read is reading from the start of the line; i.e., true
    // at the beginning of text and after each CRLF.
    let mut start_of_line = true;
    // Whether the last read ended with CR. This means that if the next read is
    // just \n, we still treat it as a line ending.
    let mut has_trailing_cr = false;

    let mut buffer = Vec::new();

    loop {
        buffer.clear();
        with_timeout(
            timeout,
            (&mut *src)
                .take(MAX_DATA_CHUNK)
                .read_until(b'\n', &mut buffer),
        )
        .await?;

        if buffer.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "EOF encountered in DATA payload",
            ));
        }

        if b".\r\n" == &buffer[..] && start_of_line {
            break;
        }

        if b'.' == buffer[0] && start_of_line {
            dst.write_all(&buffer[1..])?;
        } else {
            dst.write_all(&buffer)?;
        }

        start_of_line = buffer.ends_with(b"\r\n")
            || (b"\n" == &buffer[..] && has_trailing_cr);
        has_trailing_cr = buffer.ends_with(b"\r");
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn unstuff(stuffed: &[u8], buffer_size: usize) -> io::Result<Vec<u8>> {
        let mut decoded = Vec::<u8>::new();
        let mut reader =
            tokio::io::BufReader::with_capacity(buffer_size, stuffed);
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(copy_with_dot_stuffing(
                &mut decoded,
                &mut reader,
                Duration::from_secs(5),
            ))?;
        Ok(decoded)
    }

    #[test]
    fn dot_stuffing_edge_cases() {
        assert_eq!(b"".to_vec(), unstuff(b".\r\n", 64).unwrap());
        assert_eq!(
            b"a\r\n.b\r\n".to_vec(),
            unstuff(b"a\r\n..b\r\n.\r\n", 64).unwrap()
        );
        assert_eq!(
            b"x\n.\nstill content\r\n".to_vec(),
            unstuff(b"x\n.\nstill content\r\n.\r\n", 64).unwrap()
        );
        assert_eq!(
            io::ErrorKind::UnexpectedEof,
            unstuff(b"no terminator\r\n", 64).unwrap_err().kind()
        );
    }

    #[test]
    fn message_buffer_limit() {
        let mut buffer = MessageBuffer::new(10);
        buffer.write_all(b"12345").unwrap();
        buffer.write_all(b"67890").unwrap();
        assert!(!buffer.overflowed());
        assert_eq!(b"1234567890", buffer.contents());

        buffer.write_all(b"x").unwrap();
        assert!(buffer.overflowed());
        assert_eq!(11, buffer.total());
        assert!(buffer.contents().is_empty());

        buffer.write_all(b"more").unwrap();
        assert_eq!(15, buffer.total());
        assert!(buffer.contents().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 2048,
            ..ProptestConfig::default()
        })]

        #[test]
        fn dot_stuffing_decodes_properly(
            content in "[x.\r\n]{0,100}\r\n",
            buffer_size in 1usize..=32,
        ) {
            let mut stuffed = content.replace("\r\n.", "\r\n..");
            if stuffed.starts_with('.') {
                stuffed = format!(".{}", stuffed);
            }
            stuffed.push_str(".\r\n");

            let decoded = unstuff(stuffed.as_bytes(), buffer_size).unwrap();
            prop_assert_eq!(content, str::from_utf8(&decoded).unwrap());
        }
    }
}
