//! # Test server
//!
//! A scripted in-process FTP server backed by an in-memory file map, enough
//! protocol for the client tests: login, FEAT, EPSV/PASV and EPRT/PORT data
//! connections, RETR/STOR with REST, listings and the simple file actions.
//! A fault knob can cut a transfer after a given byte count to exercise
//! resumption.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

const MODIFY_STAMP: &str = "20240301120000";

#[derive(Default)]
struct ServerState {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    /// when set, the next RETR sends only this many bytes and then drops
    /// both sockets
    drop_retr_after: Option<usize>,
}

pub(crate) struct StubServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
}

impl StubServer {
    pub(crate) fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let conn_state = Arc::clone(&accept_state);
                thread::spawn(move || {
                    let _ = ConnHandler::new(stream, conn_state).run();
                });
            }
        });

        Self { addr, state }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn add_file(&self, path: &str, bytes: &[u8]) {
        self.state
            .lock()
            .files
            .insert(path.to_string(), bytes.to_vec());
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    pub(crate) fn has_dir(&self, path: &str) -> bool {
        self.state.lock().dirs.contains(path)
    }

    /// Cut the next RETR after `bytes`, dropping the data and control
    /// sockets. One-shot.
    pub(crate) fn drop_next_retr_after(&self, bytes: usize) {
        self.state.lock().drop_retr_after = Some(bytes);
    }
}

struct ConnHandler {
    control: TcpStream,
    state: Arc<Mutex<ServerState>>,
    passive: Option<TcpListener>,
    active_target: Option<SocketAddr>,
    rest_offset: usize,
    rename_from: Option<String>,
}

impl ConnHandler {
    fn new(control: TcpStream, state: Arc<Mutex<ServerState>>) -> Self {
        Self {
            control,
            state,
            passive: None,
            active_target: None,
            rest_offset: 0,
            rename_from: None,
        }
    }

    fn run(mut self) -> std::io::Result<()> {
        self.reply("220 muxftp stub server ready")?;

        let reader = self.control.try_clone()?;
        let mut lines = BufReader::new(reader);
        let mut line = String::new();
        loop {
            line.clear();
            if lines.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb.to_uppercase(), arg.to_string()),
                None => (line.to_uppercase(), String::new()),
            };
            self.dispatch(&verb, &arg)?;
        }
    }

    fn dispatch(&mut self, verb: &str, arg: &str) -> std::io::Result<()> {
        match verb {
            "USER" => self.reply("331 User name okay, need password"),
            "PASS" => self.reply("230 User logged in, proceed"),
            "ACCT" => self.reply("230 Account accepted"),
            "FEAT" => self.reply(
                "211-Extensions supported:\r\n MDTM\r\n MLST type*;size*;modify*;UNIX.mode*;\r\n REST STREAM\r\n SIZE\r\n\r\n211 END",
            ),
            "TYPE" => self.reply("200 Type set"),
            "EPSV" => {
                let listener = TcpListener::bind("127.0.0.1:0")?;
                let port = listener.local_addr()?.port();
                self.passive = Some(listener);
                self.reply(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0")?;
                let port = listener.local_addr()?.port();
                self.passive = Some(listener);
                self.reply(&format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port / 256,
                    port % 256
                ))
            }
            "EPRT" => {
                let parts: Vec<&str> = arg.split('|').collect();
                if parts.len() >= 4 {
                    if let (Ok(ip), Ok(port)) =
                        (parts[2].parse::<std::net::IpAddr>(), parts[3].parse::<u16>())
                    {
                        self.active_target = Some(SocketAddr::new(ip, port));
                        return self.reply("200 EPRT command successful");
                    }
                }
                self.reply("501 Bad EPRT argument")
            }
            "PORT" => {
                let parts: Vec<u16> = arg.split(',').filter_map(|p| p.parse().ok()).collect();
                if parts.len() == 6 {
                    let ip = std::net::Ipv4Addr::new(
                        parts[0] as u8,
                        parts[1] as u8,
                        parts[2] as u8,
                        parts[3] as u8,
                    );
                    let port = parts[4] * 256 + parts[5];
                    self.active_target = Some(SocketAddr::new(ip.into(), port));
                    return self.reply("200 PORT command successful");
                }
                self.reply("501 Bad PORT argument")
            }
            "REST" => match arg.parse::<usize>() {
                Ok(offset) => {
                    self.rest_offset = offset;
                    self.reply(&format!("350 Restarting at {offset}"))
                }
                Err(_) => self.reply("501 Bad REST argument"),
            },
            "RETR" => self.handle_retr(arg),
            "STOR" => self.handle_stor(arg),
            "NLST" => self.handle_nlst(arg),
            "MLSD" => self.handle_mlsd(arg),
            "MLST" => self.handle_mlst(arg),
            "SIZE" => {
                let size = self.state.lock().files.get(arg).map(Vec::len);
                match size {
                    Some(size) => self.reply(&format!("213 {size}")),
                    None => self.reply("550 No such file"),
                }
            }
            "MDTM" => {
                let known = self.state.lock().files.contains_key(arg);
                if known {
                    self.reply(&format!("213 {MODIFY_STAMP}"))
                } else {
                    self.reply("550 No such file")
                }
            }
            "DELE" => {
                let removed = self.state.lock().files.remove(arg).is_some();
                if removed {
                    self.reply("250 File deleted")
                } else {
                    self.reply("550 No such file")
                }
            }
            "RNFR" => {
                let known = self.state.lock().files.contains_key(arg);
                if known {
                    self.rename_from = Some(arg.to_string());
                    self.reply("350 Ready for RNTO")
                } else {
                    self.reply("550 No such file")
                }
            }
            "RNTO" => match self.rename_from.take() {
                Some(from) => {
                    let mut state = self.state.lock();
                    match state.files.remove(&from) {
                        Some(bytes) => {
                            state.files.insert(arg.to_string(), bytes);
                            drop(state);
                            self.reply("250 Rename successful")
                        }
                        None => {
                            drop(state);
                            self.reply("550 No such file")
                        }
                    }
                }
                None => self.reply("503 Bad sequence of commands"),
            },
            "MKD" => {
                self.state.lock().dirs.insert(arg.to_string());
                self.reply(&format!("257 \"{arg}\" created"))
            }
            "RMD" => {
                let removed = self.state.lock().dirs.remove(arg);
                if removed {
                    self.reply("250 Directory removed")
                } else {
                    self.reply("550 No such directory")
                }
            }
            "PWD" => self.reply("257 \"/\" is the current directory"),
            _ => self.reply("502 Command not implemented"),
        }
    }

    fn reply(&mut self, text: &str) -> std::io::Result<()> {
        self.control.write_all(text.as_bytes())?;
        self.control.write_all(b"\r\n")
    }

    /// Open the data connection announced by the last EPSV/PASV/EPRT/PORT.
    fn data_conn(&mut self) -> std::io::Result<TcpStream> {
        if let Some(target) = self.active_target.take() {
            return TcpStream::connect_timeout(&target, Duration::from_secs(5));
        }
        match self.passive.take() {
            Some(listener) => listener.accept().map(|(stream, _)| stream),
            None => Err(std::io::ErrorKind::NotConnected.into()),
        }
    }

    fn handle_retr(&mut self, path: &str) -> std::io::Result<()> {
        let offset = std::mem::take(&mut self.rest_offset);
        let (bytes, drop_after) = {
            let mut state = self.state.lock();
            let drop_after = state.drop_retr_after.take();
            (state.files.get(path).cloned(), drop_after)
        };
        let Some(bytes) = bytes else {
            return self.reply("550 No such file");
        };
        if offset > bytes.len() {
            return self.reply("550 Restart offset beyond file size");
        }

        self.reply("150 Opening BINARY mode data connection")?;
        let mut data = self.data_conn()?;
        let remaining = &bytes[offset..];

        if let Some(limit) = drop_after {
            let cut = limit.min(remaining.len());
            data.write_all(&remaining[..cut])?;
            data.flush()?;
            // cut the transfer: both sockets vanish under the client
            drop(data);
            self.control.shutdown(std::net::Shutdown::Both)?;
            return Err(std::io::ErrorKind::ConnectionAborted.into());
        }

        data.write_all(remaining)?;
        drop(data);
        self.reply("226 Transfer complete")
    }

    fn handle_stor(&mut self, path: &str) -> std::io::Result<()> {
        let offset = std::mem::take(&mut self.rest_offset);
        self.reply("150 Opening BINARY mode data connection")?;
        let mut data = self.data_conn()?;

        let mut received = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match data.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                // keep what arrived before the cut
                Err(_) => break,
            }
        }
        drop(data);

        let mut state = self.state.lock();
        let entry = state.files.entry(path.to_string()).or_default();
        entry.truncate(offset);
        entry.extend_from_slice(&received);
        drop(state);

        self.reply("226 Transfer complete")
    }

    fn handle_nlst(&mut self, path: &str) -> std::io::Result<()> {
        let names = self.entries_under(path);
        self.reply("150 Here comes the directory listing")?;
        let mut data = self.data_conn()?;
        for name in names {
            data.write_all(name.as_bytes())?;
            data.write_all(b"\r\n")?;
        }
        drop(data);
        self.reply("226 Directory send OK")
    }

    fn handle_mlsd(&mut self, path: &str) -> std::io::Result<()> {
        let names = self.entries_under(path);
        let entries: Vec<String> = {
            let state = self.state.lock();
            names
                .into_iter()
                .map(|name| {
                    let full = join_path(path, &name);
                    let size = state.files.get(&full).map(Vec::len).unwrap_or(0);
                    format!("type=file;size={size};modify={MODIFY_STAMP};UNIX.mode=0644; {name}")
                })
                .collect()
        };
        self.reply("150 Here comes the directory listing")?;
        let mut data = self.data_conn()?;
        data.write_all(format!("type=cdir;modify={MODIFY_STAMP};UNIX.mode=0755; .\r\n").as_bytes())?;
        for entry in entries {
            data.write_all(entry.as_bytes())?;
            data.write_all(b"\r\n")?;
        }
        drop(data);
        self.reply("226 Directory send OK")
    }

    fn handle_mlst(&mut self, path: &str) -> std::io::Result<()> {
        let size = self.state.lock().files.get(path).map(Vec::len);
        match size {
            Some(size) => self.reply(&format!(
                "250-Listing {path}\r\n type=file;size={size};modify={MODIFY_STAMP};UNIX.mode=0644; {path}\r\n250 End"
            )),
            None => self.reply("550 No such file"),
        }
    }

    /// Names of files directly under `path` ("" means the root).
    fn entries_under(&self, path: &str) -> Vec<String> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .files
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        names
    }
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
