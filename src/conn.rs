//! # Conn
//!
//! A single control connection to an FTP server, from dial through teardown:
//! the reply codec, login and TLS negotiation, FEAT, and the passive/active
//! data-connection handshake. Connections are owned by the pool and loaned
//! to one caller at a time; once `broken` they are never reused.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::command::{feat, Command, ProtectionLevel};
use crate::data_stream::DataStream;
use crate::regex::{EPSV_PORT_RE, PASV_PORT_RE};
use crate::status::{is_positive_completion, Expect, ReplyGroup, Status};
use crate::types::{Config, Features, FileType, FtpError, FtpResult, Response, TlsMode};

/// Clones of the connection's live sockets, shared with the pool so that
/// closing the client can interrupt I/O in progress on loaned connections.
#[derive(Debug, Default)]
pub(crate) struct SocketHandles {
    pub(crate) control: Option<TcpStream>,
    pub(crate) data: Option<TcpStream>,
}

impl SocketHandles {
    pub(crate) fn shutdown_all(&mut self) {
        if let Some(data) = self.data.take() {
            let _ = data.shutdown(std::net::Shutdown::Both);
        }
        if let Some(control) = self.control.take() {
            let _ = control.shutdown(std::net::Shutdown::Both);
        }
    }
}

/// A passive data connection is dialed before the transfer command; an
/// active one can only be accepted after it. Both finish in
/// [`PersistentConn::finish_data_conn`].
pub(crate) enum DataConnSetup {
    Dialed(TcpStream),
    Listening(TcpListener),
}

/// Represents a single connection to an FTP server.
pub(crate) struct PersistentConn {
    /// index of this connection, used for logging context and round-robin
    /// endpoint selection
    idx: usize,
    /// address the control socket was dialed to
    remote: SocketAddr,
    /// control socket; commands are written through the BufReader's inner
    stream: BufReader<DataStream>,
    /// map of ftp features available on the server
    features: Features,
    /// has this connection encountered an unrecoverable error
    broken: bool,
    config: Arc<Config>,
    t0: Instant,
    handles: Arc<Mutex<SocketHandles>>,
}

impl PersistentConn {
    /// Dial and fully set up a control connection: greet, negotiate TLS if
    /// configured, log in, read features. Any failure drops the partially
    /// set up connection, closing its sockets.
    pub(crate) fn open(
        idx: usize,
        addr: SocketAddr,
        config: Arc<Config>,
        t0: Instant,
    ) -> FtpResult<Self> {
        let tcp = dial_stream(&config, addr)?;
        let handles = Arc::new(Mutex::new(SocketHandles {
            control: tcp.try_clone().ok(),
            data: None,
        }));

        let mut conn = Self {
            idx,
            remote: addr,
            stream: BufReader::new(DataStream::Tcp(tcp)),
            features: Features::new(),
            broken: false,
            config,
            t0,
            handles,
        };

        let implicit = matches!(&conn.config.tls, Some(tls) if tls.mode == TlsMode::Implicit);
        if implicit {
            conn.debug(format_args!("opened TLS control connection to {addr}"));
            conn = conn.wrap_tls()?;
        } else {
            conn.debug(format_args!("opened control connection to {addr}"));
        }

        let greeting = conn.read_response_expected(Expect::Exact(Status::Ready))?;
        conn.debug(format_args!("server ready: {greeting}"));

        let explicit = matches!(&conn.config.tls, Some(tls) if tls.mode == TlsMode::Explicit);
        if explicit {
            conn = conn.auth_tls()?;
        } else {
            conn.login()?;
        }

        conn.fetch_features()?;
        Ok(conn)
    }

    pub(crate) fn idx(&self) -> usize {
        self.idx
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.broken
    }

    pub(crate) fn set_broken(&mut self) {
        self.broken = true;
    }

    pub(crate) fn handles(&self) -> Arc<Mutex<SocketHandles>> {
        Arc::clone(&self.handles)
    }

    pub(crate) fn has_feature(&self, name: &str) -> bool {
        self.features.contains_key(name)
    }

    pub(crate) fn has_feature_arg(&self, name: &str, arg: &str) -> bool {
        matches!(self.features.get(name), Some(Some(value)) if value.eq_ignore_ascii_case(arg))
    }

    /// Send a command and read the reply. Stubbed commands are answered
    /// without touching the wire. Any I/O failure marks the connection
    /// broken and surfaces a temporary error.
    pub(crate) fn send_command(&mut self, command: Command) -> FtpResult<Response> {
        if let Some(stub) = self.config.stub_responses.get(command.word()) {
            let response = Response::new(stub.code, stub.message.clone());
            self.debug(format_args!(
                "sending command {} (stubbed {})",
                command.redacted(),
                response.code
            ));
            return Ok(response);
        }

        self.debug(format_args!("sending command {}", command.redacted()));

        if let Err(e) = self.control().set_write_timeout(Some(self.config.timeout)) {
            return Err(self.fail_io(e));
        }
        let line = format!("{command}\r\n");
        if let Err(e) = self.stream.get_mut().write_all(line.as_bytes()) {
            let redacted = command.redacted();
            let err = self.fail_io(e);
            self.debug(format_args!("error sending command {redacted}: {err}"));
            return Err(err);
        }

        let response = self.read_response()?;
        self.debug(format_args!(
            "sent command {}, got {}",
            command.redacted(),
            response
        ));
        Ok(response)
    }

    /// As [`Self::send_command`], but the reply must match `expect`.
    pub(crate) fn send_command_expected(
        &mut self,
        expect: Expect,
        command: Command,
    ) -> FtpResult<Response> {
        let response = self.send_command(command)?;
        if expect.matches(response.code) {
            Ok(response)
        } else {
            Err(FtpError::UnexpectedResponse(response))
        }
    }

    /// Read one reply, joining multi-line replies per RFC 959 §4.2: a first
    /// line `ddd-...` opens the reply, a line `ddd ...` with the same digits
    /// closes it; continuation lines in between are kept verbatim (FEAT
    /// relies on their leading spaces).
    pub(crate) fn read_response(&mut self) -> FtpResult<Response> {
        if let Err(e) = self.control().set_read_timeout(Some(self.config.timeout)) {
            return Err(self.fail_io(e));
        }

        let line = self.read_line()?;
        let bytes = line.as_bytes();
        if bytes.len() < 4
            || !bytes[..3].iter().all(|b| b.is_ascii_digit())
            || !matches!(bytes[3], b' ' | b'-')
        {
            self.broken = true;
            return Err(FtpError::BadResponse);
        }
        // the guard above makes 3 and 4 char boundaries
        let code: u32 = match line[..3].parse() {
            Ok(code) => code,
            Err(_) => {
                self.broken = true;
                return Err(FtpError::BadResponse);
            }
        };
        let digits = line[..3].to_string();
        let mut body = line[4..].to_string();

        if bytes[3] == b'-' {
            loop {
                let next = self.read_line()?;
                let next_bytes = next.as_bytes();
                let coded = next_bytes.len() >= 4
                    && next_bytes.starts_with(digits.as_bytes())
                    && matches!(next_bytes[3], b' ' | b'-');
                body.push('\n');
                if coded {
                    body.push_str(&next[4..]);
                    if next_bytes[3] == b' ' {
                        break;
                    }
                } else {
                    body.push_str(&next);
                }
            }
        }

        Ok(Response::new(code, body))
    }

    /// As [`Self::read_response`], but the reply must match `expect`.
    pub(crate) fn read_response_expected(&mut self, expect: Expect) -> FtpResult<Response> {
        let response = self.read_response()?;
        if expect.matches(response.code) {
            Ok(response)
        } else {
            Err(FtpError::UnexpectedResponse(response))
        }
    }

    /// Sets the type of file to be transferred, i.e. the `TYPE` command.
    pub(crate) fn set_type(&mut self, file_type: FileType) -> FtpResult<()> {
        self.send_command_expected(Expect::Exact(Status::CommandOk), Command::Type(file_type))
            .map(|_| ())
    }

    /// Open the data-connection endpoint that must exist before the
    /// transfer command: dial the passive address, or bind a listener and
    /// announce it with EPRT (falling back to PORT).
    pub(crate) fn open_data_conn(&mut self) -> FtpResult<DataConnSetup> {
        if self.config.active_transfers {
            return self.open_active_listener();
        }

        let addr = self.request_passive()?;
        self.debug(format_args!("opening data connection to {addr}"));
        let stream = dial_stream(&self.config, addr)?;
        self.handles.lock().data = stream.try_clone().ok();
        Ok(DataConnSetup::Dialed(stream))
    }

    /// Complete the data connection once the transfer command is on the
    /// wire: accept on the active listener if any, then wrap in TLS when the
    /// control connection is secured. Failing here leaves the server mid
    /// transfer, so the connection is marked broken.
    pub(crate) fn finish_data_conn(&mut self, setup: DataConnSetup) -> FtpResult<DataStream> {
        match self.try_finish_data_conn(setup) {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.broken = true;
                Err(err)
            }
        }
    }

    fn try_finish_data_conn(&mut self, setup: DataConnSetup) -> FtpResult<DataStream> {
        let stream = match setup {
            DataConnSetup::Dialed(stream) => stream,
            DataConnSetup::Listening(listener) => self.accept_active(listener)?,
        };
        stream
            .set_read_timeout(Some(self.config.timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.config.timeout)))
            .map_err(FtpError::from_io)?;
        self.handles.lock().data = stream.try_clone().ok();

        if !self.stream.get_ref().is_ssl() {
            return Ok(DataStream::Tcp(stream));
        }
        let Some(tls) = self.config.tls.clone() else {
            return Err(FtpError::Secure("TLS context is missing".to_string()));
        };
        self.debug(format_args!("upgrading data connection to TLS"));
        let secured = tls
            .connector
            .connect(&tls.domain, stream)
            .map_err(|e| FtpError::Secure(e.to_string()))?;
        Ok(DataStream::Ssl(secured))
    }

    /// Forget the data socket handle once the transfer is over.
    pub(crate) fn note_data_closed(&self) {
        self.handles.lock().data = None;
    }

    /// Request that the server enters passive mode, allowing us to connect
    /// to it. This lets transfers work with the client behind NAT, so you
    /// almost always want it. First try EPSV, then fall back to PASV.
    fn request_passive(&mut self) -> FtpResult<SocketAddr> {
        if let Some(addr) = self.try_epsv()? {
            return Ok(addr);
        }

        let response =
            self.send_command_expected(Expect::Exact(Status::PassiveMode), Command::Pasv)?;
        parse_passive_address(&response.body)
    }

    /// Extended PaSsiVe (same idea as PASV, but works with IPv6), RFC 2428.
    /// Any unusable reply downgrades to PASV; only I/O errors propagate.
    fn try_epsv(&mut self) -> FtpResult<Option<SocketAddr>> {
        let response = self.send_command(Command::Epsv)?;
        if response.code != Status::ExtendedPassiveMode.code() {
            self.debug(format_args!("server doesn't support EPSV: {response}"));
            return Ok(None);
        }
        let port = EPSV_PORT_RE
            .captures(&response.body)
            .and_then(|caps| caps[1].parse::<u16>().ok());
        let Some(port) = port else {
            self.debug(format_args!("failed parsing EPSV response: {response}"));
            return Ok(None);
        };
        // EPSV replies only carry the port; reuse the control peer address
        Ok(Some(SocketAddr::new(self.remote.ip(), port)))
    }

    /// Bind a local listener for an active-mode transfer and announce it
    /// with EPRT, falling back to PORT for servers that predate RFC 2428.
    fn open_active_listener(&mut self) -> FtpResult<DataConnSetup> {
        let local_ip = self.control().local_addr().map_err(FtpError::from_io)?.ip();
        let listener = TcpListener::bind((local_ip, 0)).map_err(FtpError::from_io)?;
        listener.set_nonblocking(true).map_err(FtpError::from_io)?;
        let addr = listener.local_addr().map_err(FtpError::from_io)?;
        self.debug(format_args!("listening for data connection on {addr}"));

        let response = self.send_command(Command::Eprt(addr))?;
        if !is_positive_completion(response.code) {
            self.debug(format_args!("server doesn't support EPRT: {response}"));
            let std::net::IpAddr::V4(v4) = addr.ip() else {
                return Err(FtpError::UnexpectedResponse(response));
            };
            let [a, b, c, d] = v4.octets();
            let port = addr.port();
            let host_port = format!("{a},{b},{c},{d},{},{}", port / 256, port % 256);
            self.send_command_expected(Expect::Exact(Status::CommandOk), Command::Port(host_port))?;
        }

        Ok(DataConnSetup::Listening(listener))
    }

    fn accept_active(&mut self, listener: TcpListener) -> FtpResult<TcpStream> {
        let start = Instant::now();
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    self.debug(format_args!("accepted data connection from {peer}"));
                    stream.set_nonblocking(false).map_err(FtpError::from_io)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() > self.config.timeout {
                        return Err(FtpError::Io {
                            source: io::ErrorKind::TimedOut.into(),
                            timeout: true,
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(FtpError::from_io(e)),
            }
        }
    }

    /// Log in to the FTP server: USER, then PASS if prompted with 331, then
    /// ACCT if prompted with 332. The final reply must be a positive
    /// completion (typically 230).
    fn login(&mut self) -> FtpResult<()> {
        if self.config.user.is_empty() {
            return Ok(());
        }

        let mut response = self.send_command(Command::User(self.config.user.clone()))?;
        if response.code == Status::NeedPassword.code() {
            response = self.send_command(Command::Pass(self.config.password.clone()))?;
        }
        if response.code == Status::NeedAccount.code() {
            let Some(account) = self.config.account.clone() else {
                return Err(FtpError::UnexpectedResponse(response));
            };
            response = self.send_command(Command::Acct(account))?;
        }

        if !is_positive_completion(response.code) {
            return Err(FtpError::UnexpectedResponse(response));
        }
        Ok(())
    }

    /// Upgrade the control connection per RFC 4217: AUTH TLS, rewrap the
    /// socket, log in, then PBSZ 0 and PROT P so data connections are
    /// encrypted too.
    fn auth_tls(mut self) -> FtpResult<Self> {
        self.send_command_expected(Expect::Exact(Status::AuthOk), Command::Auth)?;
        let mut conn = self.wrap_tls()?;
        conn.login()?;
        conn.send_command_expected(Expect::Group(ReplyGroup::Completion), Command::Pbsz(0))?;
        conn.send_command_expected(
            Expect::Group(ReplyGroup::Completion),
            Command::Prot(ProtectionLevel::Private),
        )?;
        conn.debug(format_args!("successfully upgraded to TLS"));
        Ok(conn)
    }

    /// Rebind the control socket under TLS without reopening TCP.
    fn wrap_tls(self) -> FtpResult<Self> {
        let Self {
            idx,
            remote,
            stream,
            features,
            broken,
            config,
            t0,
            handles,
        } = self;
        let Some(tls) = config.tls.clone() else {
            return Err(FtpError::Secure("TLS is not configured".to_string()));
        };
        let tcp = stream
            .into_inner()
            .into_tcp_stream()
            .map_err(FtpError::from_io)?;
        let secured = tls
            .connector
            .connect(&tls.domain, tcp)
            .map_err(|e| FtpError::Secure(e.to_string()))?;
        Ok(Self {
            idx,
            remote,
            stream: BufReader::new(DataStream::Ssl(secured)),
            features,
            broken,
            config,
            t0,
            handles,
        })
    }

    /// Ask the server what it supports. An unsupported FEAT leaves the map
    /// empty without error.
    fn fetch_features(&mut self) -> FtpResult<()> {
        let response = self.send_command(Command::Feat)?;
        if !is_positive_completion(response.code) {
            self.debug(format_args!("server doesn't support FEAT: {response}"));
            return Ok(());
        }
        self.features = feat::parse_features(&response.body);
        Ok(())
    }

    /// Shut down the sockets and drop the connection. Idempotent through
    /// the shared handles.
    pub(crate) fn close(self) {
        self.debug(format_args!("closing"));
        self.handles.lock().shutdown_all();
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        debug!("#{} {}", self.idx, args);
        if let Some(logger) = &self.config.logger {
            let mut sink = logger.lock();
            let _ = writeln!(
                &mut *sink,
                "muxftp: {:.3} #{} {}",
                self.t0.elapsed().as_secs_f64(),
                self.idx,
                args
            );
        }
    }

    fn control(&self) -> &TcpStream {
        self.stream.get_ref().get_ref()
    }

    fn fail_io(&mut self, source: io::Error) -> FtpError {
        self.broken = true;
        FtpError::from_io(source)
    }

    fn read_line(&mut self) -> FtpResult<String> {
        let mut buf = Vec::new();
        match self.stream.read_until(b'\n', &mut buf) {
            Ok(0) => Err(self.fail_io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            ))),
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
            Err(e) => {
                let err = self.fail_io(e);
                self.debug(format_args!("error reading response: {err}"));
                Err(err)
            }
        }
    }
}

fn dial_stream(config: &Config, addr: SocketAddr) -> FtpResult<TcpStream> {
    let stream = match &config.dialer {
        Some(dialer) => dialer(addr, config.timeout),
        None => TcpStream::connect_timeout(&addr, config.timeout),
    }
    .map_err(FtpError::from_io)?;
    // cover the TLS handshake and anything else before the first command
    stream
        .set_read_timeout(Some(config.timeout))
        .and_then(|_| stream.set_write_timeout(Some(config.timeout)))
        .map_err(FtpError::from_io)?;
    Ok(stream)
}

/// Extract the data address from a PASV 227 reply:
/// `(h1,h2,h3,h4,p1,p2)` means ip `h1.h2.h3.h4`, port `p1*256 + p2`.
pub(crate) fn parse_passive_address(body: &str) -> FtpResult<SocketAddr> {
    let parse_error = || FtpError::Parse(format!("error parsing PASV response ({body})"));
    let caps = PASV_PORT_RE.captures(body).ok_or_else(parse_error)?;

    let mut parts = [0u8; 6];
    for (i, part) in parts.iter_mut().enumerate() {
        *part = caps[i + 1].parse().map_err(|_| parse_error())?;
    }
    let ip = std::net::Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    let port = (u16::from(parts[4]) << 8) | u16::from(parts[5]);
    Ok(SocketAddr::new(ip.into(), port))
}
