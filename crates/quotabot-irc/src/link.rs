use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use quotabot_crypto::EnvelopeError;
use quotabot_crypto::keys::is_valid_key;

use crate::protocol::{IrcEvent, LineBuffer, parse_line};
use crate::tls;

const READ_CHUNK: usize = 4096;

/// Idle time before the OS starts probing a silent connection.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(120);

/// How long a QUIT gets to reach the server on shutdown.
const QUIT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("key length {0} is outside 4..=56")]
    InvalidKey(usize),
    #[error(transparent)]
    Encode(#[from] EnvelopeError),
    #[error("connection closed")]
    Closed,
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub accept_invalid_certs: bool,
    pub nickname: String,
    /// Sent as `PASS` before registering, when set.
    pub password: Option<String>,
}

/// A decrypted-later chat line addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: String,
    pub channel: String,
    pub text: String,
}

/// Cloneable outbound side of a connection. Lines are queued and written by
/// the connection's writer task with a CRLF terminator.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<String>,
}

impl LinkHandle {
    /// A handle whose lines land in the returned receiver instead of a socket.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_raw(&self, line: impl Into<String>) -> Result<(), LinkError> {
        let mut line = line.into();
        // One protocol line per call.
        line.retain(|c| c != '\r' && c != '\n');
        self.tx.send(line).map_err(|_| LinkError::Closed)
    }

    /// Encrypt `text` with `key` and send it to `target` as a PRIVMSG.
    pub fn send_encrypted(&self, target: &str, key: &str, text: &str) -> Result<(), LinkError> {
        if !is_valid_key(key) {
            return Err(LinkError::InvalidKey(key.len()));
        }
        let envelope = quotabot_crypto::encode(text, key)?;
        self.send_raw(format!("PRIVMSG {} :{}", target, envelope))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// One live server connection.
pub struct Link {
    reader: ReadHalf<Box<dyn Transport>>,
    handle: LinkHandle,
    writer: JoinHandle<()>,
}

/// Open the TCP (and optionally TLS) connection and start the writer task.
pub async fn connect(config: &LinkConfig) -> Result<Link> {
    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Connecting to {}:{}", config.host, config.port))?;

    stream.set_nodelay(true)?;
    let sock_ref = SockRef::from(&stream);
    sock_ref.set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_IDLE))?;

    let transport: Box<dyn Transport> = if config.tls {
        let connector = tls::connector(config.accept_invalid_certs)?;
        let name = tls::server_name(&config.host)?;
        let tls_stream = connector
            .connect(name, stream)
            .await
            .with_context(|| format!("TLS handshake with {}", config.host))?;
        Box::new(tls_stream)
    } else {
        Box::new(stream)
    };

    info!(
        "Connected to {}:{}{}",
        config.host,
        config.port,
        if config.tls { " (TLS)" } else { "" }
    );

    let (reader, writer) = tokio::io::split(transport);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(writer, rx));

    Ok(Link {
        reader,
        handle: LinkHandle { tx },
        writer,
    })
}

async fn write_loop(mut writer: WriteHalf<Box<dyn Transport>>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        trace!(">> {}", line);
        let quitting = line.starts_with("QUIT");
        let mut bytes = line.into_bytes();
        bytes.extend_from_slice(b"\r\n");
        if let Err(e) = writer.write_all(&bytes).await {
            warn!("Write to server failed: {}", e);
            break;
        }
        if quitting {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Authenticate and register the nickname.
pub fn register(handle: &LinkHandle, config: &LinkConfig) -> Result<(), LinkError> {
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        handle.send_raw(format!("PASS {}", password))?;
    }
    handle.send_raw(format!("NICK {}", config.nickname))?;
    handle.send_raw(format!("USER {} 0 * :quotabot", config.nickname))?;
    Ok(())
}

pub fn join_all<'a>(
    handle: &LinkHandle,
    channels: impl IntoIterator<Item = &'a str>,
) -> Result<(), LinkError> {
    for channel in channels {
        info!("Joining {}", channel);
        handle.send_raw(format!("JOIN {}", channel))?;
    }
    Ok(())
}

impl Link {
    pub fn handle(&self) -> LinkHandle {
        self.handle.clone()
    }

    /// Read until the server goes away or `shutdown` fires.
    ///
    /// Keepalives in a chunk are answered before any other line of that
    /// chunk is looked at. Channel messages are forwarded to `inbound`
    /// without waiting for them to be handled.
    pub async fn run(
        mut self,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut buffer = LineBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        let result = loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = self.handle.send_raw("QUIT :shutting down");
                    let _ = tokio::time::timeout(QUIT_GRACE, &mut self.writer).await;
                    break Ok(());
                }
                read = self.reader.read(&mut chunk) => read,
            };

            let n = match read {
                Ok(0) => break Err(LinkError::Closed.into()),
                Ok(n) => n,
                Err(e) => break Err(anyhow::Error::new(e).context("Reading from server")),
            };

            let events: Vec<IrcEvent> = buffer
                .push(&chunk[..n])
                .iter()
                .inspect(|line| trace!("<< {}", line))
                .map(|line| parse_line(line))
                .collect();

            let pong_failed = events
                .iter()
                .filter_map(|event| match event {
                    IrcEvent::Keepalive { token } => Some(token),
                    _ => None,
                })
                .inspect(|token| debug!("PING {}", token))
                .any(|token| self.handle.send_raw(format!("PONG :{}", token)).is_err());
            if pong_failed {
                break Err(LinkError::Closed.into());
            }

            for event in events {
                if let IrcEvent::ChannelMessage { sender, channel, text } = event {
                    if inbound.send(InboundMessage { sender, channel, text }).is_err() {
                        warn!("Inbound consumer is gone, dropping message");
                    }
                }
            }
        };

        self.writer.abort();
        result
    }
}
