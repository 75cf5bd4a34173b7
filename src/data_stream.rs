//! # Data Stream
//!
//! The socket a transfer reads from or writes to: plain TCP, or TLS when
//! FTPS is active

use std::io::{Read, Result, Write};
use std::net::TcpStream;

use native_tls::TlsStream;

/// Stream used for communications. It can be of type Tcp in case of plain
/// communication or Ssl in case of FTPS
#[derive(Debug)]
pub(crate) enum DataStream {
    Tcp(TcpStream),
    Ssl(TlsStream<TcpStream>),
}

impl DataStream {
    /// Returns a reference to the underlying TcpStream, e.g. to set socket
    /// deadlines or query the peer address.
    pub(crate) fn get_ref(&self) -> &TcpStream {
        match self {
            DataStream::Tcp(ref stream) => stream,
            DataStream::Ssl(ref stream) => stream.get_ref(),
        }
    }

    /// Unwrap the stream into TcpStream, in order to rewrap it after a TLS
    /// upgrade of the control connection.
    pub(crate) fn into_tcp_stream(self) -> Result<TcpStream> {
        match self {
            DataStream::Tcp(stream) => Ok(stream),
            DataStream::Ssl(stream) => stream.get_ref().try_clone(),
        }
    }

    /// Test if the stream is secured
    pub(crate) fn is_ssl(&self) -> bool {
        matches!(self, DataStream::Ssl(_))
    }
}

impl Read for DataStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            DataStream::Tcp(ref mut stream) => stream.read(buf),
            DataStream::Ssl(ref mut stream) => stream.read(buf),
        }
    }
}

impl Write for DataStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            DataStream::Tcp(ref mut stream) => stream.write(buf),
            DataStream::Ssl(ref mut stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            DataStream::Tcp(ref mut stream) => stream.flush(),
            DataStream::Ssl(ref mut stream) => stream.flush(),
        }
    }
}
