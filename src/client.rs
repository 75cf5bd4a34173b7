//! # Client
//!
//! The public client: file transfers with automatic resumption, directory
//! listings and the simple file actions, all multiplexed over the
//! connection pool. Any number of threads may share one `Client`; each
//! operation borrows a control connection for its own command sequence.

use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::command::Command;
use crate::hosts::lookup_hosts;
use crate::list::{self, FileInfo};
use crate::pool::Pool;
use crate::regex::MDTM_RE;
use crate::status::{is_positive_completion, Expect, ReplyGroup, Status};
use crate::types::{Config, FileType, FtpError, FtpResult};

/// An FTP client multiplexing operations over a pool of control
/// connections, one per host endpoint times `connections_per_host`.
///
/// ```no_run
/// use muxftp::Client;
///
/// let client = Client::dial(["ftp.example.com"]).unwrap();
/// let mut buf = Vec::new();
/// client.retrieve("pub/README", &mut buf).unwrap();
/// ```
pub struct Client {
    pool: Pool,
}

/// The local end of a transfer: a sink for downloads, a source for uploads.
/// The other side is always the data connection.
enum TransferSide<'a> {
    Dest(&'a mut dyn Write),
    Src(&'a mut dyn Read),
}

impl Client {
    /// Connect with the default [`Config`]. `hosts` entries are `host`,
    /// `host:port` or `[v6addr]:port`; hostnames expand to all addresses
    /// they resolve to and the pool round-robins over the full set.
    pub fn dial<S, I>(hosts: I) -> FtpResult<Self>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        Self::dial_config(Config::default(), hosts)
    }

    /// Connect with the given config. No connection is opened until the
    /// first operation needs one.
    pub fn dial_config<S, I>(config: Config, hosts: I) -> FtpResult<Self>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        let config = config.normalized();
        let hosts: Vec<String> = hosts
            .into_iter()
            .map(|host| host.as_ref().to_string())
            .collect();
        let endpoints = lookup_hosts(&hosts, config.ipv6_lookup)?;
        Ok(Self {
            pool: Pool::new(config, endpoints),
        })
    }

    /// Close all server connections, interrupting transfers in progress.
    /// Subsequent operations fail with [`FtpError::ClientClosed`].
    pub fn close(&self) -> FtpResult<()> {
        self.pool.close()
    }

    /// Retrieve file `path` and write its bytes to `dest`. If the server
    /// advertises `REST STREAM`, a failed download is resumed as long as it
    /// keeps making progress. The result is verified against `SIZE` when
    /// supported.
    pub fn retrieve<W: Write>(&self, path: &str, dest: &mut W) -> FtpResult<()> {
        self.retrieve_offset(path, dest, 0)
    }

    /// As [`Self::retrieve`], starting `offset` bytes into the remote file.
    pub fn retrieve_offset<W: Write>(
        &self,
        path: &str,
        dest: &mut W,
        offset: u64,
    ) -> FtpResult<()> {
        // fetch the size up front to check against how much we transfer
        let size = self.size(path)?;
        let can_resume = self.can_resume();

        let mut bytes_so_far = offset;
        loop {
            let (n, result) =
                self.transfer_from_offset(path, TransferSide::Dest(&mut *dest), bytes_so_far);
            bytes_so_far += n;
            match result {
                Ok(()) => break,
                Err(err) if n == 0 => return Err(err),
                Err(err) if !can_resume => {
                    return Err(FtpError::CannotResume {
                        source: Box::new(err),
                    })
                }
                Err(_) => continue,
            }
        }

        match size {
            Some(size) if size != bytes_so_far => Err(FtpError::SizeMismatch {
                expected: size,
                actual: bytes_so_far,
            }),
            _ => Ok(()),
        }
    }

    /// Read bytes from `src` and store them as file `path`. Uploads from a
    /// plain reader are never resumed; use [`Self::store_resumable`] for a
    /// seekable source. The result is verified against `SIZE` when
    /// supported.
    pub fn store<R: Read>(&self, path: &str, src: &mut R) -> FtpResult<()> {
        self.store_loop(path, &mut PlainSource(src))
    }

    /// As [`Self::store`], but a failed upload is resumed while it keeps
    /// making progress, by querying the server's `SIZE` and seeking `src`
    /// to it. Resumption requires the server to advertise `REST STREAM` and
    /// the client to target a single endpoint (after a partial upload to
    /// one of several endpoints the remote state is ambiguous).
    pub fn store_resumable<R: Read + Seek>(&self, path: &str, src: &mut R) -> FtpResult<()> {
        self.store_loop(path, &mut SeekSource(src))
    }

    /// Fetch the contents of directory `path` as names via `NLST`.
    pub fn name_list(&self, path: &str) -> FtpResult<Vec<String>> {
        let lines = self.data_string_list(Command::Nlst(path.to_string()))?;
        Ok(lines
            .iter()
            .map(|line| list::base_name(line).to_string())
            .collect())
    }

    /// Fetch the contents of directory `path` via `MLSD`. Entries for the
    /// listed directory itself and its parent are skipped. Requires the
    /// server to support RFC 3659.
    pub fn read_dir(&self, path: &str) -> FtpResult<Vec<FileInfo>> {
        let lines = self.data_string_list(Command::Mlsd(path.to_string()))?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            match list::parse_mlst(&line, true) {
                Ok(Some(info)) => entries.push(info),
                Ok(None) => continue,
                Err(err) => {
                    self.pool.debug(format_args!("error in read_dir: {err}"));
                    return Err(FtpError::Parse(err.to_string()));
                }
            }
        }
        Ok(entries)
    }

    /// Fetch details for a single file via `MLST`, which replies on the
    /// control connection only.
    pub fn stat(&self, path: &str) -> FtpResult<FileInfo> {
        let response = {
            let mut conn = self.pool.acquire()?;
            let response = conn.send_command(Command::Mlst(path.to_string()))?;
            if !is_positive_completion(response.code) {
                return Err(FtpError::UnexpectedResponse(response));
            }
            response
        };

        // the entry sits on its own indented line between the reply lines
        let lines: Vec<&str> = response.body.lines().collect();
        if lines.len() != 3 {
            return Err(FtpError::Parse(format!(
                "unexpected MLST response: {:?}",
                response.body
            )));
        }
        match list::parse_mlst(lines[1].trim_start(), false) {
            Ok(Some(info)) => Ok(info),
            Ok(None) => Err(FtpError::Parse(format!(
                "unexpected MLST response: {:?}",
                response.body
            ))),
            Err(err) => Err(FtpError::Parse(err.to_string())),
        }
    }

    /// Remove the file at `path`.
    pub fn delete(&self, path: &str) -> FtpResult<()> {
        let mut conn = self.pool.acquire()?;
        conn.send_command_expected(
            Expect::Exact(Status::RequestedFileActionOk),
            Command::Dele(path.to_string()),
        )
        .map(|_| ())
    }

    /// Rename the file `from` to `to`.
    pub fn rename(&self, from: &str, to: &str) -> FtpResult<()> {
        let mut conn = self.pool.acquire()?;
        conn.send_command_expected(
            Expect::Exact(Status::RequestFilePending),
            Command::RenameFrom(from.to_string()),
        )?;
        conn.send_command_expected(
            Expect::Exact(Status::RequestedFileActionOk),
            Command::RenameTo(to.to_string()),
        )
        .map(|_| ())
    }

    /// Create directory `path`.
    pub fn mkdir(&self, path: &str) -> FtpResult<()> {
        let mut conn = self.pool.acquire()?;
        conn.send_command_expected(
            Expect::Exact(Status::PathCreated),
            Command::Mkd(path.to_string()),
        )
        .map(|_| ())
    }

    /// Remove directory `path`.
    pub fn rmdir(&self, path: &str) -> FtpResult<()> {
        let mut conn = self.pool.acquire()?;
        conn.send_command_expected(
            Expect::Exact(Status::RequestedFileActionOk),
            Command::Rmd(path.to_string()),
        )
        .map(|_| ())
    }

    /// The server's current directory, extracted from the quoted `PWD`
    /// reply with the RFC 959 escape convention (`""` means one `"`).
    pub fn getwd(&self) -> FtpResult<String> {
        let response = {
            let mut conn = self.pool.acquire()?;
            conn.send_command_expected(Expect::Exact(Status::PathCreated), Command::Pwd)?
        };
        parse_pwd_path(&response.body)
    }

    /// The size of the file at `path`, when the server advertises `SIZE`.
    /// An unsupported feature, a refusal or an unparseable reply all yield
    /// `None` without error; only connection failures surface.
    pub fn size(&self, path: &str) -> FtpResult<Option<u64>> {
        let mut conn = self.pool.acquire()?;
        if !conn.has_feature("SIZE") {
            conn.debug(format_args!("server doesn't support SIZE"));
            return Ok(None);
        }

        let response = conn.send_command(Command::Size(path.to_string()))?;
        if response.code != Status::File.code() {
            conn.debug(format_args!("unexpected SIZE response: {response}"));
            return Ok(None);
        }
        match response.body.trim().parse::<u64>() {
            Ok(size) => Ok(Some(size)),
            Err(_) => {
                conn.debug(format_args!("failed parsing SIZE response: {response}"));
                Ok(None)
            }
        }
    }

    /// The modification time of the file at `path` (UTC), via `MDTM`.
    pub fn modified_time(&self, path: &str) -> FtpResult<NaiveDateTime> {
        let response = {
            let mut conn = self.pool.acquire()?;
            conn.send_command_expected(
                Expect::Exact(Status::File),
                Command::Mdtm(path.to_string()),
            )?
        };

        let parse_error = || FtpError::Parse(format!("invalid MDTM response ({})", response.body));
        let caps = MDTM_RE
            .captures(&response.body)
            .ok_or_else(parse_error)?;
        let date = NaiveDate::from_ymd_opt(
            caps[1].parse().map_err(|_| parse_error())?,
            caps[2].parse().map_err(|_| parse_error())?,
            caps[3].parse().map_err(|_| parse_error())?,
        );
        let time = NaiveTime::from_hms_opt(
            caps[4].parse().map_err(|_| parse_error())?,
            caps[5].parse().map_err(|_| parse_error())?,
            caps[6].parse().map_err(|_| parse_error())?,
        );
        match (date, time) {
            (Some(date), Some(time)) => Ok(NaiveDateTime::new(date, time)),
            _ => Err(parse_error()),
        }
    }

    // -- transfer engine

    /// One transfer attempt at `offset`, on one borrowed connection:
    /// `TYPE I`, `REST` when resuming, data connection, `RETR`/`STOR`
    /// expecting a preliminary reply, counted stream copy, final completion
    /// reply. Returns the bytes moved either way; a copy failure leaves the
    /// server state ambiguous, so it breaks the connection.
    fn transfer_from_offset(
        &self,
        path: &str,
        side: TransferSide<'_>,
        offset: u64,
    ) -> (u64, FtpResult<()>) {
        let mut conn = match self.pool.acquire() {
            Ok(conn) => conn,
            Err(err) => return (0, Err(err)),
        };

        if let Err(err) = conn.set_type(FileType::Binary) {
            return (0, Err(err));
        }

        // the server may reset the offset after any command, so REST goes
        // out immediately before the data connection is established
        if offset > 0 {
            if let Err(err) = conn.send_command_expected(
                Expect::Exact(Status::RequestFilePending),
                Command::Rest(offset),
            ) {
                return (0, Err(err));
            }
        }

        let setup = match conn.open_data_conn() {
            Ok(setup) => setup,
            Err(err) => {
                conn.debug(format_args!("error opening data connection: {err}"));
                return (0, Err(err));
            }
        };

        let command = match &side {
            TransferSide::Dest(_) => Command::Retr(path.to_string()),
            TransferSide::Src(_) => Command::Store(path.to_string()),
        };
        if let Err(err) =
            conn.send_command_expected(Expect::Group(ReplyGroup::Preliminary), command)
        {
            return (0, Err(err));
        }

        let mut data = match conn.finish_data_conn(setup) {
            Ok(data) => data,
            Err(err) => return (0, Err(err)),
        };

        let (n, copied) = match side {
            TransferSide::Dest(dest) => copy_counted(&mut data, dest),
            TransferSide::Src(src) => copy_counted(src, &mut data),
        };

        if let Err(err) = copied {
            conn.set_broken();
            drop(data);
            conn.note_data_closed();
            return (n, Err(FtpError::from_io(err)));
        }

        // close the data connection so the server can finalize the transfer
        let _ = data.flush();
        drop(data);
        conn.note_data_closed();

        let response = match conn.read_response() {
            Ok(response) => response,
            Err(err) => {
                conn.debug(format_args!("error reading response after transfer: {err}"));
                return (n, Err(err));
            }
        };
        if !is_positive_completion(response.code) {
            conn.debug(format_args!("unexpected response after transfer: {response}"));
            return (n, Err(FtpError::UnexpectedResponse(response)));
        }

        (n, Ok(()))
    }

    fn store_loop<S: StoreSource>(&self, path: &str, source: &mut S) -> FtpResult<()> {
        let can_resume = source.can_seek() && self.pool.single_endpoint() && self.can_resume();

        let mut bytes_so_far = 0u64;
        loop {
            let (n, result) =
                self.transfer_from_offset(path, TransferSide::Src(&mut *source), bytes_so_far);
            bytes_so_far += n;
            let err = match result {
                Ok(()) => break,
                Err(err) => err,
            };
            if n == 0 {
                return Err(err);
            }
            if !can_resume {
                return Err(FtpError::CannotResume {
                    source: Box::new(err),
                });
            }

            // the server's idea of the stored size wins; align the source
            let size = match self.size(path) {
                Ok(Some(size)) => size,
                Ok(None) => {
                    return Err(FtpError::ResumeFailed {
                        source: Box::new(err),
                    })
                }
                Err(size_err) => return Err(size_err),
            };
            if let Err(seek_err) = source.seek_to(size) {
                self.pool.debug(format_args!(
                    "failed seeking to {size} while resuming upload to {path}: {seek_err}"
                ));
                return Err(FtpError::ResumeFailed {
                    source: Box::new(err),
                });
            }
            bytes_so_far = size;
        }

        // fetch the stored size to check against how much we sent
        match self.size(path)? {
            Some(size) if size != bytes_so_far => Err(FtpError::SizeMismatch {
                expected: bytes_so_far,
                actual: size,
            }),
            _ => Ok(()),
        }
    }

    /// Downloads resume only when the server advertises stream restarts.
    fn can_resume(&self) -> bool {
        match self.pool.acquire() {
            Ok(conn) => conn.has_feature_arg("REST", "STREAM"),
            Err(_) => false,
        }
    }

    /// Run a command whose reply arrives line-by-line on a data connection.
    /// A data-side read error is remembered, the final control reply is
    /// still read, and the server's verdict wins over the data error.
    fn data_string_list(&self, command: Command) -> FtpResult<Vec<String>> {
        let mut conn = self.pool.acquire()?;

        let setup = conn.open_data_conn()?;
        conn.send_command_expected(Expect::Group(ReplyGroup::Preliminary), command)?;
        let data = conn.finish_data_conn(setup)?;

        let mut reader = BufReader::new(data);
        let mut lines: Vec<String> = Vec::new();
        let mut data_error: Option<FtpError> = None;
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                        buf.pop();
                    }
                    if buf.is_empty() {
                        continue;
                    }
                    lines.push(String::from_utf8_lossy(&buf).into_owned());
                }
                Err(err) => {
                    conn.debug(format_args!("error reading listing data: {err}"));
                    data_error = Some(FtpError::from_io(err));
                    break;
                }
            }
        }
        drop(reader);
        conn.note_data_closed();

        let response = conn.read_response()?;
        if !is_positive_completion(response.code) {
            return Err(FtpError::UnexpectedResponse(response));
        }
        conn.debug(format_args!("finished listing: {response}"));

        match data_error {
            Some(err) => Err(err),
            None => Ok(lines),
        }
    }

    #[cfg(test)]
    pub(crate) fn open_connections(&self) -> usize {
        self.pool.open_count()
    }

    #[cfg(test)]
    pub(crate) fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    /// Shut down every live connection socket without closing the client.
    #[cfg(test)]
    pub(crate) fn break_connections(&self) {
        self.pool.shutdown_sockets();
    }
}

/// An upload source: a reader that may additionally support the absolute
/// positioning resumption needs.
trait StoreSource: Read {
    fn can_seek(&self) -> bool;
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
}

struct PlainSource<'a, R: Read>(&'a mut R);

impl<R: Read> Read for PlainSource<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read> StoreSource for PlainSource<'_, R> {
    fn can_seek(&self) -> bool {
        false
    }

    fn seek_to(&mut self, _offset: u64) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }
}

struct SeekSource<'a, R: Read + Seek>(&'a mut R);

impl<R: Read + Seek> Read for SeekSource<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Read + Seek> StoreSource for SeekSource<'_, R> {
    fn can_seek(&self) -> bool {
        true
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.0.seek(SeekFrom::Start(offset)).map(|_| ())
    }
}

/// Copy until EOF, reporting the bytes moved even when the copy fails
/// midway (resumption needs the count).
fn copy_counted(reader: &mut dyn Read, writer: &mut dyn Write) -> (u64, io::Result<()>) {
    let mut buf = [0u8; 32 * 1024];
    let mut total = 0u64;
    loop {
        let len = match reader.read(&mut buf) {
            Ok(0) => return (total, Ok(())),
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return (total, Err(err)),
        };
        let mut written = 0;
        while written < len {
            match writer.write(&buf[written..len]) {
                Ok(0) => {
                    return (
                        total,
                        Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "failed to write whole buffer",
                        )),
                    )
                }
                Ok(n) => {
                    written += n;
                    total += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return (total, Err(err)),
            }
        }
    }
}

/// Extract the quoted path of a 257 reply, honoring the RFC 959 escape
/// convention: a doubled double-quote stands for one double-quote.
fn parse_pwd_path(body: &str) -> FtpResult<String> {
    let parse_error = || FtpError::Parse(format!("no quoted path in PWD response ({body})"));
    let start = body.find('"').ok_or_else(parse_error)?;

    let mut path = String::new();
    let mut chars = body[start + 1..].chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            path.push(c);
            continue;
        }
        if chars.peek() == Some(&'"') {
            chars.next();
            path.push('"');
        } else {
            return Ok(path);
        }
    }
    Err(parse_error())
}
