//! Publish/subscribe support.
//!
//! Notifications travel on a second socket. The server asks the client to
//! open it by answering a `LISTEN` with a `|` directive whose body must be
//! sent on the new socket; from then on a dedicated thread reads frames
//! from it and hands each one to the registered callback.

use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use scsp_core::error::Result;

use crate::config::Config;
use crate::connection::{read_frames, write_command};
use crate::protocol::{CommandPayload, Decoded, Response, RowsetContext};
use crate::template::escape;
use crate::transport::Transport;

/// Callback invoked for each notification or listener failure.
pub type PubSubCallback = Box<dyn FnMut(Result<Response>) + Send + 'static>;

pub(crate) type SharedCallback = Arc<Mutex<PubSubCallback>>;

/// What a subscription refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// A named channel created with `CREATE CHANNEL`
    Channel,
    /// Changes to a database table
    Table,
}

impl ChannelKind {
    fn target(self, name: &str) -> String {
        match self {
            ChannelKind::Channel => name.to_string(),
            ChannelKind::Table => format!("TABLE {}", name),
        }
    }
}

pub(crate) fn listen_command(kind: ChannelKind, name: &str) -> String {
    format!("LISTEN {};", kind.target(name))
}

pub(crate) fn unlisten_command(kind: ChannelKind, name: &str) -> String {
    format!("UNLISTEN {};", kind.target(name))
}

pub(crate) fn notify_command(channel: &str, payload: Option<&str>) -> String {
    match payload {
        Some(payload) => format!("NOTIFY {} {};", channel, escape(&payload.into())),
        None => format!("NOTIFY {};", channel),
    }
}

pub(crate) fn create_channel_command(name: &str, if_not_exists: bool) -> String {
    if if_not_exists {
        format!("CREATE CHANNEL {} IF NOT EXISTS;", name)
    } else {
        format!("CREATE CHANNEL {};", name)
    }
}

/// The secondary transport and the thread reading from it.
pub(crate) struct Listener {
    socket: TcpStream,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("peer", &self.socket.peer_addr().ok())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Listener {
    /// Open the secondary transport, send `body` on it and start reading.
    pub fn start(
        config: &Config,
        host: &str,
        port: u16,
        body: &[u8],
        callback: SharedCallback,
    ) -> Result<Self> {
        let mut transport = Transport::open(config, host, port)?;
        let mut ctx = RowsetContext::new();
        // notifications may follow the reply in the same read
        let mut pending = Vec::new();

        write_command(&mut transport, CommandPayload::Text(&String::from_utf8_lossy(body)))?;
        let reply = read_frames(&mut transport, &mut ctx, &mut pending)?;
        tracing::debug!(?reply, "pub/sub transport ready");

        // reads block without a deadline; the socket is shut down to stop
        transport.socket().set_read_timeout(None).ok();
        let socket = transport.socket().try_clone().map_err(|e| {
            crate::transport::io_error(
                scsp_core::ConnectionErrorKind::Connect,
                "clone pub/sub socket",
                e,
            )
        })?;

        let stopping = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopping);
        let handle = std::thread::Builder::new()
            .name("scsp-pubsub".to_string())
            .spawn(move || run(transport, ctx, pending, callback, &flag))
            .map_err(|e| {
                crate::transport::io_error(
                    scsp_core::ConnectionErrorKind::Connect,
                    "spawn pub/sub listener",
                    e,
                )
            })?;

        tracing::info!(host, port, "pub/sub listener started");
        Ok(Self {
            socket,
            stopping,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Close the socket and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("pub/sub callback panicked");
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut transport: Transport,
    mut ctx: RowsetContext,
    mut pending: Vec<u8>,
    callback: SharedCallback,
    stopping: &AtomicBool,
) {
    loop {
        let decoded = read_frames(&mut transport, &mut ctx, &mut pending);
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match decoded {
            Ok(Decoded::Response(Response::Ok)) => {
                tracing::debug!("server ended the pub/sub stream");
                break;
            }
            Ok(Decoded::Response(response)) => deliver(&callback, Ok(response)),
            Ok(other) => tracing::warn!(?other, "ignoring directive on the pub/sub transport"),
            Err(e) => {
                tracing::warn!(error = %e, "pub/sub listener failed");
                let fatal = e.is_connection_error();
                deliver(&callback, Err(e));
                if fatal {
                    break;
                }
            }
        }
    }
    transport.shutdown();
    tracing::info!("pub/sub listener stopped");
}

fn deliver(callback: &SharedCallback, result: Result<Response>) {
    match callback.lock() {
        Ok(mut cb) => (*cb)(result),
        Err(poisoned) => {
            let mut cb = poisoned.into_inner();
            (*cb)(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands() {
        assert_eq!(listen_command(ChannelKind::Channel, "news"), "LISTEN news;");
        assert_eq!(
            listen_command(ChannelKind::Table, "albums"),
            "LISTEN TABLE albums;"
        );
        assert_eq!(
            unlisten_command(ChannelKind::Table, "albums"),
            "UNLISTEN TABLE albums;"
        );
        assert_eq!(
            notify_command("news", Some("it's here")),
            "NOTIFY news 'it''s here';"
        );
        assert_eq!(notify_command("news", None), "NOTIFY news;");
        assert_eq!(
            create_channel_command("news", true),
            "CREATE CHANNEL news IF NOT EXISTS;"
        );
        assert_eq!(create_channel_command("news", false), "CREATE CHANNEL news;");
    }
}
