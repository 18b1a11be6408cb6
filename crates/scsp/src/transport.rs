//! Byte transport underneath a session: plain TCP or TLS over TCP.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use scsp_core::Error;
use scsp_core::error::{ConnectionError, ConnectionErrorKind};

use crate::config::Config;
#[cfg(feature = "tls")]
use crate::tls::TlsStream;

/// An open connection to a server.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Resolve `host`, connect with the configured timeout and, unless the
    /// configuration is `insecure`, run the TLS handshake.
    pub fn open(config: &Config, host: &str, port: u16) -> Result<Self, Error> {
        let stream = connect_tcp(config, host, port)?;
        stream.set_nodelay(true).ok();
        stream
            .set_read_timeout(config.timeout)
            .map_err(|e| io_error(ConnectionErrorKind::Connect, "set read timeout", e))?;
        stream
            .set_write_timeout(config.timeout)
            .map_err(|e| io_error(ConnectionErrorKind::Connect, "set write timeout", e))?;

        if config.insecure {
            return Ok(Transport::Plain(stream));
        }
        wrap_tls(stream, config, host)
    }

    /// The TCP socket carrying this transport.
    pub fn socket(&self) -> &TcpStream {
        match self {
            Transport::Plain(stream) => stream,
            #[cfg(feature = "tls")]
            Transport::Tls(tls) => tls.get_ref(),
        }
    }

    /// Independent handle to the socket, used to shut it down from another
    /// thread.
    pub fn shutdown_handle(&self) -> io::Result<TcpStream> {
        self.socket().try_clone()
    }

    /// Close both directions of the socket. Errors are ignored.
    pub fn shutdown(&self) {
        let _ = self.socket().shutdown(Shutdown::Both);
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain(_))
    }
}

#[cfg(feature = "tls")]
fn wrap_tls(stream: TcpStream, config: &Config, host: &str) -> Result<Transport, Error> {
    let tls = TlsStream::new(stream, &config.tls, host)?;
    Ok(Transport::Tls(Box::new(tls)))
}

#[cfg(not(feature = "tls"))]
fn wrap_tls(stream: TcpStream, config: &Config, host: &str) -> Result<Transport, Error> {
    // the placeholder stream always reports the missing feature
    let _ = crate::tls::TlsStream::new(stream, &config.tls, host)?;
    Err(Error::config("TLS support is not compiled in"))
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            Transport::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            Transport::Tls(tls) => tls.flush(),
        }
    }
}

fn connect_tcp(config: &Config, host: &str, port: u16) -> Result<TcpStream, Error> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            io_error(
                ConnectionErrorKind::DnsResolution,
                &format!("resolve {}:{}", host, port),
                e,
            )
        })?
        .collect();

    let mut last_err = None;
    for addr in &addrs {
        tracing::trace!(%addr, "connecting");
        match TcpStream::connect_timeout(addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(e) => {
            let kind = match e.kind() {
                io::ErrorKind::ConnectionRefused => ConnectionErrorKind::Refused,
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                    ConnectionErrorKind::Timeout
                }
                _ => ConnectionErrorKind::Connect,
            };
            Err(io_error(kind, &format!("connect to {}:{}", host, port), e))
        }
        None => Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::DnsResolution,
            message: format!("No addresses found for {}:{}", host, port),
            source: None,
        })),
    }
}

/// Map an I/O error on the socket to a connection error.
pub(crate) fn io_error(kind: ConnectionErrorKind, action: &str, e: io::Error) -> Error {
    Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to {}: {}", action, e),
        source: Some(Box::new(e)),
    })
}
