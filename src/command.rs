//! # Command
//!
//! The set of FTP commands this client issues

pub(crate) mod feat;

use std::fmt;
use std::net::SocketAddr;

use crate::types::FileType;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ftp commands with their arguments
pub(crate) enum Command {
    /// Provide account information
    Acct(String),
    /// Set auth to TLS
    Auth,
    /// Remove file at specified path
    Dele(String),
    /// Extended address for the data connection (active mode), RFC 2428
    Eprt(SocketAddr),
    /// Extended passive mode, RFC 2428
    Epsv,
    /// List server features, RFC 2389
    Feat,
    /// Get modification time for file at specified path
    Mdtm(String),
    /// Make directory
    Mkd(String),
    /// Machine-readable listing of a directory, RFC 3659
    Mlsd(String),
    /// Machine-readable facts for a single path, RFC 3659
    Mlst(String),
    /// Get the list of file names at specified path
    Nlst(String),
    /// Provide login password
    Pass(String),
    /// Passive mode
    Pasv,
    /// Protection buffer size
    Pbsz(usize),
    /// Address and port the server should connect to (active mode)
    Port(String),
    /// Set protection level for the data channel
    Prot(ProtectionLevel),
    /// Print working directory
    Pwd,
    /// Select file to rename
    RenameFrom(String),
    /// Rename selected file to
    RenameTo(String),
    /// Resume transfer from byte offset
    Rest(u64),
    /// Retrieve file
    Retr(String),
    /// Remove directory
    Rmd(String),
    /// Get file size of specified path
    Size(String),
    /// Put file at specified path
    Store(String),
    /// Set transfer type
    Type(FileType),
    /// Provide user to login as
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Protection level; argument for `Prot` command
pub(crate) enum ProtectionLevel {
    Clear,
    Private,
}

impl Command {
    /// The command keyword, as matched against stubbed responses.
    pub(crate) fn word(&self) -> &'static str {
        match self {
            Self::Acct(_) => "ACCT",
            Self::Auth => "AUTH",
            Self::Dele(_) => "DELE",
            Self::Eprt(_) => "EPRT",
            Self::Epsv => "EPSV",
            Self::Feat => "FEAT",
            Self::Mdtm(_) => "MDTM",
            Self::Mkd(_) => "MKD",
            Self::Mlsd(_) => "MLSD",
            Self::Mlst(_) => "MLST",
            Self::Nlst(_) => "NLST",
            Self::Pass(_) => "PASS",
            Self::Pasv => "PASV",
            Self::Pbsz(_) => "PBSZ",
            Self::Port(_) => "PORT",
            Self::Prot(_) => "PROT",
            Self::Pwd => "PWD",
            Self::RenameFrom(_) => "RNFR",
            Self::RenameTo(_) => "RNTO",
            Self::Rest(_) => "REST",
            Self::Retr(_) => "RETR",
            Self::Rmd(_) => "RMD",
            Self::Size(_) => "SIZE",
            Self::Store(_) => "STOR",
            Self::Type(_) => "TYPE",
            Self::User(_) => "USER",
        }
    }

    /// The command as it may appear in a log line. Passwords never reach
    /// the log: `PASS` arguments are replaced with `******`.
    pub(crate) fn redacted(&self) -> String {
        match self {
            Self::Pass(_) => "PASS ******".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acct(a) => write!(f, "ACCT {a}"),
            Self::Auth => write!(f, "AUTH TLS"),
            Self::Dele(p) => write!(f, "DELE {p}"),
            Self::Eprt(addr) => {
                let proto = if addr.is_ipv4() { 1 } else { 2 };
                write!(f, "EPRT |{}|{}|{}|", proto, addr.ip(), addr.port())
            }
            Self::Epsv => write!(f, "EPSV"),
            Self::Feat => write!(f, "FEAT"),
            Self::Mdtm(p) => write!(f, "MDTM {p}"),
            Self::Mkd(p) => write!(f, "MKD {p}"),
            Self::Mlsd(p) => write_with_arg(f, "MLSD", p),
            Self::Mlst(p) => write_with_arg(f, "MLST", p),
            Self::Nlst(p) => write_with_arg(f, "NLST", p),
            Self::Pass(p) => write!(f, "PASS {p}"),
            Self::Pasv => write!(f, "PASV"),
            Self::Pbsz(sz) => write!(f, "PBSZ {sz}"),
            Self::Port(p) => write!(f, "PORT {p}"),
            Self::Prot(level) => write!(f, "PROT {level}"),
            Self::Pwd => write!(f, "PWD"),
            Self::RenameFrom(p) => write!(f, "RNFR {p}"),
            Self::RenameTo(p) => write!(f, "RNTO {p}"),
            Self::Rest(offset) => write!(f, "REST {offset}"),
            Self::Retr(p) => write!(f, "RETR {p}"),
            Self::Rmd(p) => write!(f, "RMD {p}"),
            Self::Size(p) => write!(f, "SIZE {p}"),
            Self::Store(p) => write!(f, "STOR {p}"),
            Self::Type(t) => write!(f, "TYPE {t}"),
            Self::User(u) => write!(f, "USER {u}"),
        }
    }
}

/// Commands whose path argument may be empty omit the trailing space
fn write_with_arg(f: &mut fmt::Formatter<'_>, cmd: &str, arg: &str) -> fmt::Result {
    if arg.is_empty() {
        write!(f, "{cmd}")
    } else {
        write!(f, "{cmd} {arg}")
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => write!(f, "C"),
            Self::Private => write!(f, "P"),
        }
    }
}
