//! # muxftp
//!
//! muxftp is an FTP (RFC 959) client library that multiplexes file
//! operations over a pool of long-lived control connections. It speaks the
//! modern extensions (EPSV from RFC 2428, FEAT from RFC 2389, MLST/MLSD/SIZE
//! and `REST STREAM` resumption from RFC 3659) and supports FTPS (RFC 4217)
//! in both explicit (`AUTH TLS`) and implicit modes, wrapping control and
//! data connections alike.
//!
//! Each user-level operation borrows an idle control connection from the
//! pool (up to `connections_per_host` per resolved endpoint), opens a fresh
//! data connection when bytes need to flow, and returns the control
//! connection when done. Interrupted transfers resume automatically while
//! they keep making progress, for downloads whenever the server advertises
//! `REST STREAM`, and for uploads from seekable sources targeting a single
//! endpoint.
//!
//! ## Get started
//!
//! ```no_run
//! use muxftp::Client;
//!
//! let client = Client::dial(["ftp.example.com"]).unwrap();
//! let mut buf = Vec::new();
//! client.retrieve("pub/README", &mut buf).unwrap();
//! for name in client.name_list("pub").unwrap() {
//!     println!("{name}");
//! }
//! ```
//!
//! ## FTPS
//!
//! ```no_run
//! use muxftp::native_tls::TlsConnector;
//! use muxftp::{Client, Config, TlsMode, TlsOptions};
//!
//! let config = Config {
//!     user: "demo".to_string(),
//!     password: "password".to_string(),
//!     tls: Some(TlsOptions {
//!         connector: TlsConnector::new().unwrap(),
//!         domain: "ftp.example.com".to_string(),
//!         mode: TlsMode::Explicit,
//!     }),
//!     ..Default::default()
//! };
//! let client = Client::dial_config(config, ["ftp.example.com"]).unwrap();
//! ```
//!
//! ## Concurrency
//!
//! A [`Client`] is `Send + Sync`; any number of threads may run operations
//! concurrently and the pool hands out connections round-robin over the
//! resolved endpoints, blocking once every connection is busy.

// -- common deps
#[macro_use]
extern crate lazy_regex;
#[macro_use]
extern crate log;

// -- private
mod client;
pub(crate) mod command;
mod conn;
mod data_stream;
mod hosts;
mod pool;
mod regex;
mod status;
#[cfg(test)]
mod test_server;

// -- public
pub mod list;
pub mod types;

// -- secure deps
pub extern crate native_tls;

pub use client::Client;
pub use status::Status;
pub use types::{
    Config, Dialer, Features, FileType, FormatControl, FtpError, FtpResult, Logger, Response,
    StubResponse, TlsMode, TlsOptions,
};

// -- test logging
#[cfg(test)]
pub fn log_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}
