//! Line grammar for the subset of IRC the bot speaks.
//!
//! Inbound lines look like `[:prefix ]COMMAND params[ :trailing]`. Only two
//! shapes matter here: `PING` (answered immediately) and `PRIVMSG` to a
//! channel. Everything else parses to [`IrcEvent::Other`].

use bytes::{Buf, BytesMut};
use tracing::warn;

/// A partial line longer than this is discarded rather than buffered forever.
const MAX_PENDING: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEvent {
    /// Server keepalive; must be answered with `PONG :<token>`.
    Keepalive { token: String },
    ChannelMessage {
        /// Nick only, with the `!user@host` suffix removed.
        sender: String,
        channel: String,
        text: String,
    },
    Other,
}

/// Parse one trimmed line. Never fails; anything unrecognised is `Other`.
pub fn parse_line(line: &str) -> IrcEvent {
    let line = line.trim();

    let (prefix, rest) = match line.strip_prefix(':') {
        Some(stripped) => match stripped.split_once(' ') {
            Some((prefix, rest)) => (Some(prefix), rest.trim_start()),
            None => return IrcEvent::Other,
        },
        None => (None, line),
    };

    let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));

    if command.eq_ignore_ascii_case("PING") {
        let token = params.strip_prefix(':').unwrap_or(params);
        return IrcEvent::Keepalive {
            token: token.to_string(),
        };
    }

    if !command.eq_ignore_ascii_case("PRIVMSG") {
        return IrcEvent::Other;
    }

    let Some(prefix) = prefix else {
        return IrcEvent::Other;
    };
    let Some((target, text)) = params.split_once(" :") else {
        return IrcEvent::Other;
    };
    let target = target.trim();
    if !is_channel(target) || text.is_empty() {
        return IrcEvent::Other;
    }

    let sender = prefix.split('!').next().unwrap_or(prefix);
    if sender.is_empty() {
        return IrcEvent::Other;
    }

    IrcEvent::ChannelMessage {
        sender: sender.to_string(),
        channel: target.to_string(),
        text: text.to_string(),
    }
}

fn is_channel(target: &str) -> bool {
    target.len() > 1 && target.starts_with(['#', '&', '+', '!'])
}

/// Reassembles lines from arbitrarily split reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete line it finished, trimmed,
    /// with empty lines dropped. A trailing partial line stays buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw = self.pending.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }

        if self.pending.len() > MAX_PENDING {
            warn!("Discarding {} bytes of unterminated input", self.pending.len());
            self.pending.advance(self.pending.len());
        }

        lines
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
