//! SCSP connection implementation.
//!
//! A [`Connection`] owns one transport and runs the strictly sequential
//! request/response cycle: write one command frame, read until the buffer
//! holds a complete reply, decode, act on any server directive.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

use scsp_core::Error;
use scsp_core::error::{ConnectionError, ConnectionErrorKind, ProtocolError, ProtocolErrorKind};

use crate::config::Config;
use crate::protocol::{
    CommandPayload, Decoded, Directive, MAX_REDISPATCH_DEPTH, Response, RowsetContext, decode,
    frame_len,
};
use crate::pubsub::{self, ChannelKind, Listener, PubSubCallback, SharedCallback};
use crate::template::{Params, interpolate};
use crate::transport::{Transport, io_error};

/// Socket read size.
const READ_CHUNK: usize = 8192;

/// SCSP connection.
///
/// Not safe for concurrent use; a connection serves one command at a time.
pub struct Connection {
    transport: Option<Transport>,
    config: Config,
    /// Address currently connected to (may differ from the configured one
    /// after a server-driven reconnect)
    host: String,
    port: u16,
    rowset_ctx: RowsetContext,
    pubsub_callback: Option<SharedCallback>,
    listener: Option<Listener>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.config.account.database)
            .field("connected", &self.is_connected())
            .field("tls", &self.transport.as_ref().map(Transport::is_tls))
            .field("pubsub", &self.listener)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Open a connection and run the configuration handshake.
    ///
    /// This performs:
    /// 1. configuration validation
    /// 2. TCP connect (and TLS handshake unless `insecure`)
    /// 3. the concatenated auth / database / client-key command
    #[tracing::instrument(level = "debug", skip(config), fields(host = %config.account.host, port = config.account.port))]
    pub fn connect(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let host = config.account.host.clone();
        let port = config.account.port;

        let mut conn = Self {
            transport: None,
            config,
            host,
            port,
            rowset_ctx: RowsetContext::new(),
            pubsub_callback: None,
            listener: None,
        };
        conn.open()?;
        Ok(conn)
    }

    /// Parse a connection string and connect.
    pub fn connect_url(url: &str) -> Result<Self, Error> {
        Self::connect(Config::from_url(url)?)
    }

    /// The configuration this connection was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if the main transport is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Check if the pub/sub listener is running.
    pub fn is_pubsub_connected(&self) -> bool {
        self.listener.as_ref().is_some_and(Listener::is_running)
    }

    /// Execute a command and return its reply.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn execute(&mut self, command: &str) -> Result<Response, Error> {
        self.run(CommandPayload::Text(command), 0)
    }

    /// Bind `params` into `sql` and execute the result.
    pub fn execute_statement(&mut self, sql: &str, params: &Params) -> Result<Response, Error> {
        let command = interpolate(sql, params);
        self.execute(&command)
    }

    /// Send a raw byte payload as a `$` frame and return the reply.
    pub fn execute_blob(&mut self, data: &[u8]) -> Result<Response, Error> {
        self.run(CommandPayload::Blob(data), 0)
    }

    /// Reopen the transport to the configured address and replay the
    /// handshake.
    pub fn reconnect(&mut self) -> Result<(), Error> {
        self.close_transport();
        self.host = self.config.account.host.clone();
        self.port = self.config.account.port;
        self.open()
    }

    /// Close the connection and the pub/sub listener, if any.
    ///
    /// Calling this more than once is harmless.
    pub fn disconnect(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
        if self.transport.is_some() {
            tracing::debug!(host = %self.host, port = self.port, "disconnecting");
        }
        self.close_transport();
    }

    /// Subscribe to a channel or table.
    ///
    /// The callback receives every notification decoded on the pub/sub
    /// transport, and any error that stops the listener. It replaces a
    /// previously registered callback.
    pub fn listen<F>(&mut self, kind: ChannelKind, name: &str, callback: F) -> Result<Response, Error>
    where
        F: FnMut(Result<Response, Error>) + Send + 'static,
    {
        let callback: PubSubCallback = Box::new(callback);
        match &self.pubsub_callback {
            Some(shared) => match shared.lock() {
                Ok(mut current) => *current = callback,
                Err(poisoned) => *poisoned.into_inner() = callback,
            },
            None => self.pubsub_callback = Some(Arc::new(Mutex::new(callback))),
        }
        self.execute(&pubsub::listen_command(kind, name))
    }

    /// Stop receiving notifications for a channel or table.
    pub fn unlisten(&mut self, kind: ChannelKind, name: &str) -> Result<Response, Error> {
        self.execute(&pubsub::unlisten_command(kind, name))
    }

    /// Publish a notification, optionally with a payload.
    pub fn notify(&mut self, channel: &str, payload: Option<&str>) -> Result<Response, Error> {
        self.execute(&pubsub::notify_command(channel, payload))
    }

    pub fn create_channel(&mut self, name: &str, if_not_exists: bool) -> Result<Response, Error> {
        self.execute(&pubsub::create_channel_command(name, if_not_exists))
    }

    /// Turn this connection into a notification-only one.
    ///
    /// The main transport is closed once the server acknowledges; the
    /// pub/sub listener keeps running until [`Connection::disconnect`].
    pub fn pubsub_only(&mut self) -> Result<Response, Error> {
        if !self.is_pubsub_connected() {
            return Err(unexpected("PUBSUB ONLY requires an active subscription"));
        }
        let response = self.execute("PUBSUB ONLY;")?;
        self.close_transport();
        Ok(response)
    }

    fn open(&mut self) -> Result<(), Error> {
        let mut transport = Transport::open(&self.config, &self.host, self.port)?;
        tracing::debug!(
            host = %self.host,
            port = self.port,
            tls = transport.is_tls(),
            "transport open"
        );

        let handshake = self.config.handshake_command();
        if !handshake.is_empty() {
            write_command(&mut transport, CommandPayload::Text(&handshake))?;
            let reply = read_reply(&mut transport, &mut self.rowset_ctx)?;
            tracing::debug!(?reply, "handshake complete");
        }

        self.transport = Some(transport);
        Ok(())
    }

    fn close_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.shutdown();
        }
        self.rowset_ctx.clear();
    }

    fn run(&mut self, payload: CommandPayload<'_>, depth: usize) -> Result<Response, Error> {
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;

        let decoded =
            write_command(transport, payload).and_then(|()| read_reply(transport, &mut self.rowset_ctx));
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                if e.is_connection_error() {
                    tracing::debug!(error = %e, "connection lost");
                    self.close_transport();
                }
                return Err(e);
            }
        };

        match decoded {
            Decoded::Response(response) => Ok(response),
            Decoded::Pending => Err(unexpected("reply ended inside a chunked row set")),
            Decoded::Directive(directive) => self.follow(directive, depth),
        }
    }

    fn follow(&mut self, directive: Directive, depth: usize) -> Result<Response, Error> {
        match directive {
            Directive::Command(body) => {
                if depth + 1 > MAX_REDISPATCH_DEPTH {
                    return Err(Error::Protocol(ProtocolError::new(
                        ProtocolErrorKind::RecursionLimit,
                        format!(
                            "server-driven commands nested deeper than {}",
                            MAX_REDISPATCH_DEPTH
                        ),
                    )));
                }
                let command = String::from_utf8_lossy(&body).into_owned();
                tracing::debug!(depth = depth + 1, %command, "running server-driven command");
                self.run(CommandPayload::Text(&command), depth + 1)
            }
            Directive::PubSub(body) => {
                self.start_listener(&body)?;
                Ok(Response::Ok)
            }
            Directive::Reconnect(body) => {
                let (host, port) = self.reconnect_target(&body);
                tracing::warn!(%host, port, "server requested a reconnect");
                self.close_transport();
                self.host = host;
                self.port = port;
                self.open()?;
                Ok(Response::Ok)
            }
        }
    }

    fn start_listener(&mut self, body: &[u8]) -> Result<(), Error> {
        if self.is_pubsub_connected() {
            return Ok(());
        }
        let callback = self
            .pubsub_callback
            .clone()
            .ok_or_else(|| unexpected("pub/sub directive received without a registered callback"))?;
        let listener = Listener::start(&self.config, &self.host, self.port, body, callback)?;
        self.listener = Some(listener);
        Ok(())
    }

    /// Parse `<host> <port>` from a reconnect directive, falling back to
    /// the configured address.
    fn reconnect_target(&self, body: &[u8]) -> (String, u16) {
        let text = String::from_utf8_lossy(body);
        let mut parts = text.split_whitespace();
        match (parts.next(), parts.next().and_then(|p| p.parse::<u16>().ok())) {
            (Some(host), Some(port)) => (host.to_string(), port),
            (Some(host), None) => (host.to_string(), self.config.account.port),
            _ => (
                self.config.account.host.clone(),
                self.config.account.port,
            ),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Write one command frame: the header, then the payload.
pub(crate) fn write_command<W: Write>(
    stream: &mut W,
    payload: CommandPayload<'_>,
) -> Result<(), Error> {
    let body = payload.as_bytes();
    tracing::trace!(
        tag = %char::from(payload.delimiter()),
        len = body.len(),
        "writing command"
    );

    stream
        .write_all(&payload.header())
        .map_err(|e| write_error("write command header", e))?;
    if !body.is_empty() {
        stream
            .write_all(body)
            .map_err(|e| write_error("write command payload", e))?;
    }
    stream
        .flush()
        .map_err(|e| write_error("flush stream", e))
}

/// Read one reply on a request/response transport.
///
/// Bytes left over after the reply are not part of any request and are
/// dropped.
fn read_reply<R: Read>(stream: &mut R, ctx: &mut RowsetContext) -> Result<Decoded, Error> {
    let mut pending = Vec::new();
    let decoded = read_frames(stream, ctx, &mut pending)?;
    if !pending.is_empty() {
        tracing::trace!(trailing = pending.len(), "ignoring bytes after the reply");
    }
    Ok(decoded)
}

/// Decode frames from `pending`, reading more as needed, until one yields
/// a reply or a directive.
///
/// Frames are cut off the front of `pending` one at a time. Chunk frames
/// absorbed by the assembler are consumed and decoding moves on to the
/// next frame; anything after the returned frame stays in `pending`.
pub(crate) fn read_frames<R: Read>(
    stream: &mut R,
    ctx: &mut RowsetContext,
    pending: &mut Vec<u8>,
) -> Result<Decoded, Error> {
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        while let Some(len) = frame_len(pending.as_slice()) {
            let decoded = decode(&pending[..len], ctx);
            pending.drain(..len);
            match decoded? {
                Decoded::Pending => continue,
                decoded => return Ok(decoded),
            }
        }

        let n = match stream.read(&mut chunk) {
            Ok(0) => {
                ctx.clear();
                return Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: "Server closed the connection".to_string(),
                    source: None,
                }));
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                ctx.clear();
                let kind = match e.kind() {
                    ErrorKind::WouldBlock | ErrorKind::TimedOut => ConnectionErrorKind::Timeout,
                    _ => ConnectionErrorKind::Disconnected,
                };
                return Err(io_error(kind, "read reply", e));
            }
        };
        pending.extend_from_slice(&chunk[..n]);
    }
}

fn write_error(action: &str, e: std::io::Error) -> Error {
    let kind = match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => ConnectionErrorKind::Timeout,
        _ => ConnectionErrorKind::Disconnected,
    };
    io_error(kind, action, e)
}

fn unexpected(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError::new(ProtocolErrorKind::Unexpected, msg))
}
