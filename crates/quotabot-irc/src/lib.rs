//! IRC connection for the bot: line framing, keepalive, registration,
//! channel joins and per-channel key lookup. Outbound messages go through a
//! [`LinkHandle`], which encrypts with the FiSH envelope.

pub mod keys;
pub mod link;
pub mod protocol;
pub mod tls;

pub use keys::ChannelKeys;
pub use link::{InboundMessage, Link, LinkConfig, LinkError, LinkHandle, connect, join_all, register};
pub use protocol::{IrcEvent, LineBuffer, parse_line};
